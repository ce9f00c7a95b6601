//! Generated protobuf code
//!
//! This module contains the Rust code for `proto/transfer/v1/transfer.proto`.
//! With the `proto-gen` feature it is generated at build time by tonic-build;
//! otherwise the equivalent hand-maintained types below are used.

#[cfg(feature = "proto-gen")]
pub mod transfer {
    pub mod v1 {
        tonic::include_proto!("transfer.v1");
    }
}

#[cfg(not(feature = "proto-gen"))]
pub mod transfer {
    pub mod v1 {
        use prost::Message;

        #[derive(Clone, PartialEq, Message)]
        pub struct MetricValue {
            #[prost(string, tag = "1")]
            pub endpoint: String,
            #[prost(string, tag = "2")]
            pub metric: String,
            #[prost(oneof = "metric_value::Value", tags = "3, 4")]
            pub value: Option<metric_value::Value>,
            #[prost(int64, tag = "5")]
            pub step: i64,
            #[prost(string, tag = "6")]
            pub counter_type: String,
            #[prost(string, tag = "7")]
            pub tags: String,
            #[prost(int64, tag = "8")]
            pub timestamp: i64,
        }

        pub mod metric_value {
            #[derive(Clone, Copy, PartialEq, prost::Oneof)]
            pub enum Value {
                #[prost(uint64, tag = "3")]
                IntValue(u64),
                #[prost(double, tag = "4")]
                FloatValue(f64),
            }
        }

        #[derive(Clone, PartialEq, Message)]
        pub struct UpdateRequest {
            #[prost(message, repeated, tag = "1")]
            pub values: Vec<MetricValue>,
        }

        #[derive(Clone, PartialEq, Message)]
        pub struct TransferResponse {
            #[prost(string, tag = "1")]
            pub message: String,
            #[prost(int32, tag = "2")]
            pub total: i32,
            #[prost(int32, tag = "3")]
            pub invalid: i32,
            #[prost(int64, tag = "4")]
            pub latency: i64,
        }

        pub mod transfer_client {
            use super::*;
            use tonic::codegen::*;
            use tonic::transport::Uri;

            #[derive(Debug, Clone)]
            pub struct TransferClient<T> {
                inner: tonic::client::Grpc<T>,
            }

            impl TransferClient<tonic::transport::Channel> {
                pub fn new(channel: tonic::transport::Channel) -> Self {
                    let inner = tonic::client::Grpc::new(channel);
                    Self { inner }
                }
            }

            impl<T> TransferClient<T>
            where
                T: tonic::client::GrpcService<tonic::body::BoxBody>,
                T::Error: Into<StdError>,
                T::ResponseBody: Body<Data = Bytes> + Send + 'static,
                <T::ResponseBody as Body>::Error: Into<StdError> + Send,
            {
                pub fn with_origin(inner: T, origin: Uri) -> Self {
                    let inner = tonic::client::Grpc::with_origin(inner, origin);
                    Self { inner }
                }

                pub async fn update(
                    &mut self,
                    request: impl tonic::IntoRequest<UpdateRequest>,
                ) -> Result<tonic::Response<TransferResponse>, tonic::Status> {
                    self.inner.ready().await.map_err(|e| {
                        tonic::Status::new(
                            tonic::Code::Unknown,
                            format!("Service was not ready: {}", e.into()),
                        )
                    })?;
                    let codec = tonic::codec::ProstCodec::default();
                    let path =
                        http::uri::PathAndQuery::from_static("/transfer.v1.Transfer/Update");
                    self.inner.unary(request.into_request(), path, codec).await
                }
            }
        }
    }
}

pub use transfer::v1::transfer_client::TransferClient;
pub use transfer::v1::*;
