//! Domain ports for the hexagonal boundary.

mod macros;
pub(crate) use macros::define_port_error;

pub mod tsdb_client;

pub use tsdb_client::{DataPoint, QueryResult, Row, SeriesBlock, TsdbClient, TsdbError};
