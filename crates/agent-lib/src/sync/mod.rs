//! Delivery of metric batches to the remote monitor
//!
//! This module provides:
//! - The per-app transport abstraction and its gRPC implementation
//! - A consistent-hash ring that pins every app to one transfer endpoint

mod client;
mod ring;
mod transport;

pub use client::{GrpcTransport, GrpcTransportFactory, TransferClientConfig};
pub use ring::TransferRing;
pub use transport::{MetricTransport, TransferAck, TransportFactory};
