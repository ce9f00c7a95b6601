//! Container agent service: configuration and HTTP surface

pub mod api;
pub mod config;
