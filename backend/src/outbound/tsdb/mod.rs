//! HTTP outbound adapter for TSDB endpoints.

mod dto;
mod http_client;

pub use http_client::{InfluxHttpClient, InfluxHttpIdentity};
