//! gRPC transport to a transfer endpoint
//!
//! Each app owns one `GrpcTransport`. The channel is created lazily on the
//! first call, reused afterwards, and dropped after a failed call so the next
//! batch reconnects. Every call is bounded by the configured timeout.

use super::ring::TransferRing;
use super::transport::{MetricTransport, TransferAck, TransportFactory};
use crate::error::TransportError;
use crate::models::MetricRecord;
use crate::proto::{TransferClient, UpdateRequest};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tonic::transport::Channel;
use tracing::{debug, info};

/// Configuration for transfer connections
#[derive(Debug, Clone)]
pub struct TransferClientConfig {
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Per-call timeout
    pub request_timeout: Duration,
    /// Keepalive interval
    pub keepalive_interval: Duration,
}

impl Default for TransferClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_millis(1000),
            keepalive_interval: Duration::from_secs(30),
        }
    }
}

/// Persistent connection to one transfer endpoint
pub struct GrpcTransport {
    endpoint: String,
    config: TransferClientConfig,
    channel: RwLock<Option<Channel>>,
}

impl GrpcTransport {
    /// Create a transport for `endpoint` (`host:port` or a full URL).
    /// No connection is made until the first call.
    pub fn new(endpoint: &str, config: TransferClientConfig) -> Result<Self, TransportError> {
        Ok(Self {
            endpoint: normalize_endpoint(endpoint)?,
            config,
            channel: RwLock::new(None),
        })
    }

    /// Get the endpoint URL
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Whether a channel is currently held
    pub async fn is_connected(&self) -> bool {
        self.channel.read().await.is_some()
    }

    async fn create_channel(&self) -> Result<Channel, TransportError> {
        let connect_err = |e: &dyn std::fmt::Display| TransportError::Connect {
            endpoint: self.endpoint.clone(),
            message: e.to_string(),
        };

        Channel::from_shared(self.endpoint.clone())
            .map_err(|e| connect_err(&e))?
            .connect_timeout(self.config.connect_timeout)
            .timeout(self.config.request_timeout)
            .http2_keep_alive_interval(self.config.keepalive_interval)
            .connect()
            .await
            .map_err(|e| connect_err(&e))
    }

    /// Get or create a connected channel
    async fn get_channel(&self) -> Result<Channel, TransportError> {
        {
            let channel = self.channel.read().await;
            if let Some(ch) = channel.as_ref() {
                return Ok(ch.clone());
            }
        }

        let new_channel = self.create_channel().await?;
        let mut channel = self.channel.write().await;
        *channel = Some(new_channel.clone());

        debug!(endpoint = %self.endpoint, "Connected to transfer");
        Ok(new_channel)
    }

    async fn call(&self, records: Vec<MetricRecord>) -> Result<TransferAck, TransportError> {
        let channel = self.get_channel().await?;
        let mut client = TransferClient::new(channel);

        let request = tonic::Request::new(UpdateRequest {
            values: records.into_iter().map(Into::into).collect(),
        });

        match tokio::time::timeout(self.config.request_timeout, client.update(request)).await {
            Ok(Ok(response)) => Ok(response.into_inner().into()),
            Ok(Err(status)) => Err(TransportError::Call(status.to_string())),
            Err(_) => Err(TransportError::Timeout(self.config.request_timeout)),
        }
    }
}

#[async_trait]
impl MetricTransport for GrpcTransport {
    async fn update(&self, records: Vec<MetricRecord>) -> Result<TransferAck, TransportError> {
        let result = self.call(records).await;
        if result.is_err() {
            *self.channel.write().await = None;
        }
        result
    }

    async fn close(&self) {
        if self.channel.write().await.take().is_some() {
            debug!(endpoint = %self.endpoint, "Closed transfer connection");
        }
    }
}

/// Hands every app a dedicated transport to the transfer chosen for it on
/// the consistent-hash ring
pub struct GrpcTransportFactory {
    ring: TransferRing,
    config: TransferClientConfig,
}

impl GrpcTransportFactory {
    pub fn new(ring: TransferRing, config: TransferClientConfig) -> Self {
        info!(transfers = ring.len(), "Transfer ring configured");
        Self { ring, config }
    }
}

impl TransportFactory for GrpcTransportFactory {
    fn connect(&self, container_id: &str) -> Result<Arc<dyn MetricTransport>, TransportError> {
        let endpoint = self.ring.get(container_id).ok_or(TransportError::NoEndpoints)?;
        Ok(Arc::new(GrpcTransport::new(endpoint, self.config.clone())?))
    }
}

/// Turn `host:port` into an `http://` URL and validate it
fn normalize_endpoint(endpoint: &str) -> Result<String, TransportError> {
    let candidate = if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("http://{}", endpoint)
    };

    let url = url::Url::parse(&candidate).map_err(|e| TransportError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        message: e.to_string(),
    })?;

    if url.host_str().is_none() {
        return Err(TransportError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            message: "no host".to_string(),
        });
    }

    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_default() {
        let config = TransferClientConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.request_timeout, Duration::from_millis(1000));
    }

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(
            normalize_endpoint("10.0.0.1:8433").unwrap(),
            "http://10.0.0.1:8433"
        );
        assert_eq!(
            normalize_endpoint("https://transfer:8433").unwrap(),
            "https://transfer:8433"
        );
        assert!(normalize_endpoint("http://").is_err());
    }

    #[tokio::test]
    async fn test_transport_is_lazy() {
        let transport = GrpcTransport::new("127.0.0.1:1", TransferClientConfig::default()).unwrap();
        assert_eq!(transport.endpoint(), "http://127.0.0.1:1");
        assert!(!transport.is_connected().await);
    }

    #[tokio::test]
    async fn test_update_unreachable_endpoint_fails() {
        let config = TransferClientConfig {
            connect_timeout: Duration::from_millis(200),
            request_timeout: Duration::from_millis(200),
            ..Default::default()
        };
        let transport = GrpcTransport::new("127.0.0.1:1", config).unwrap();

        let result = transport.update(vec![]).await;
        assert!(result.is_err());
        assert!(!transport.is_connected().await);
    }

    #[test]
    fn test_factory_without_endpoints() {
        let factory = GrpcTransportFactory::new(
            TransferRing::new(Vec::<String>::new()),
            TransferClientConfig::default(),
        );
        assert!(matches!(
            factory.connect("abc"),
            Err(TransportError::NoEndpoints)
        ));
    }

    #[test]
    fn test_factory_picks_ring_endpoint() {
        let ring = TransferRing::new(["t1:8433", "t2:8433"]);
        let expected = ring.get("abc").unwrap().to_string();
        let factory = GrpcTransportFactory::new(ring, TransferClientConfig::default());

        assert!(factory.connect("abc").is_ok());
        assert!(expected == "t1:8433" || expected == "t2:8433");
    }
}
