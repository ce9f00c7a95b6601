//! Remote-monitor transport abstraction

use crate::error::TransportError;
use crate::models::{MetricRecord, MetricValue};
use crate::proto;
use async_trait::async_trait;
use std::sync::Arc;

/// Acknowledgement returned by the remote monitor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferAck {
    pub message: String,
    pub total: i32,
    pub invalid: i32,
    pub latency: i64,
}

/// A dedicated connection from one app to the remote monitor.
///
/// Delivery is best-effort: a failed call is reported to the caller and the
/// batch is not retried or buffered.
#[async_trait]
pub trait MetricTransport: Send + Sync {
    /// Push one batch of records
    async fn update(&self, records: Vec<MetricRecord>) -> Result<TransferAck, TransportError>;

    /// Release the underlying connection
    async fn close(&self);
}

/// Creates one transport per app
pub trait TransportFactory: Send + Sync {
    fn connect(&self, container_id: &str) -> Result<Arc<dyn MetricTransport>, TransportError>;
}

impl From<MetricRecord> for proto::MetricValue {
    fn from(record: MetricRecord) -> Self {
        let value = match record.value {
            MetricValue::Int(v) => proto::metric_value::Value::IntValue(v),
            MetricValue::Float(v) => proto::metric_value::Value::FloatValue(v),
        };

        proto::MetricValue {
            endpoint: record.endpoint,
            metric: record.metric,
            value: Some(value),
            step: record.step,
            counter_type: record.counter_type,
            tags: record.tags,
            timestamp: record.timestamp,
        }
    }
}

impl From<proto::TransferResponse> for TransferAck {
    fn from(resp: proto::TransferResponse) -> Self {
        Self {
            message: resp.message,
            total: resp.total,
            invalid: resp.invalid,
            latency: resp.latency,
        }
    }
}
