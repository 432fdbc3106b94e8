//! Outbound adapters implementing domain ports for external infrastructure.
//!
//! This module follows the hexagonal architecture pattern: `tsdb`
//! holds the one concrete implementation of [`crate::domain::ports::TsdbClient`],
//! a `reqwest`-backed adapter against a TSDB's HTTP API. Adapters are
//! thin translators between domain types and wire representations;
//! they contain no retry or filtering policy (that lives in
//! `crate::domain::backup_manager` and `crate::domain::retry`).

pub mod tsdb;
