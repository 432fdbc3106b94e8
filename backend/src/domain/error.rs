//! Domain error types shared across the backup pipeline.
//!
//! Each error enum below names the failure modes of one component from
//! the system design and classifies which are retryable. Transport and
//! port-level errors live next to the ports that raise them
//! ([`crate::domain::ports::tsdb_client`]); the enums here are the
//! ones the policy core and orchestrator itself raise.

use thiserror::Error;

/// Errors raised while loading or validating a worker configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The file could not be read from disk.
    #[error("failed to read config file {path}: {message}")]
    Io {
        /// Path that could not be read.
        path: String,
        /// Underlying I/O failure message.
        message: String,
    },
    /// The file is not valid YAML.
    #[error("failed to parse config file {path} as YAML: {message}")]
    Parse {
        /// Path that failed to parse.
        path: String,
        /// Underlying parser message.
        message: String,
    },
    /// A required key is absent.
    #[error("missing required config key: {key}")]
    MissingKey {
        /// Dotted path of the missing key.
        key: String,
    },
    /// A key holds a value outside its accepted enum/range.
    #[error("invalid value for {key}: {message}")]
    InvalidValue {
        /// Dotted path of the offending key.
        key: String,
        /// Explanation of why the value is invalid.
        message: String,
    },
}

/// Errors raised by the backup policy core while processing one measurement.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackupError {
    /// The underlying TSDB transport or query failed.
    #[error(transparent)]
    Tsdb(#[from] crate::domain::ports::tsdb_client::TsdbError),
    /// The retry budget for an operation was exhausted.
    #[error("retry budget exhausted after {attempts} attempts: {message}")]
    RetryExhausted {
        /// Total attempts made, including the first.
        attempts: u32,
        /// Message from the final failed attempt.
        message: String,
    },
    /// A worker config passed validation at load time but is missing data
    /// a later stage requires (e.g. range bounds for `BackupMode::Range`).
    #[error("invalid worker configuration: {message}")]
    InvalidConfig {
        /// Explanation of the missing or inconsistent data.
        message: String,
    },
}

impl BackupError {
    /// Whether this error should be retried by the Retry Executor.
    ///
    /// Per spec.md §7, only `Unreachable` is retryable; `QueryError`,
    /// `WriteRejected`, and `AuthFailed` are fatal for the current
    /// operation scope.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Tsdb(error) => error.is_retryable(),
            Self::RetryExhausted { .. } | Self::InvalidConfig { .. } => false,
        }
    }
}

/// Errors raised by the orchestrator itself (not attributable to a single worker).
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The config discovery directory could not be read.
    #[error("failed to read config directory {path}: {source}")]
    DiscoverConfigs {
        /// Directory that could not be read.
        path: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// Spawning a worker process failed.
    #[error("failed to spawn worker for {config}: {source}")]
    SpawnWorker {
        /// Config file the worker was spawned for.
        config: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::tsdb_client::TsdbError;

    #[test]
    fn backup_error_inherits_tsdb_retryability() {
        let retryable = BackupError::Tsdb(TsdbError::unreachable("timed out"));
        assert!(retryable.is_retryable());

        let fatal = BackupError::Tsdb(TsdbError::query_error("bad syntax"));
        assert!(!fatal.is_retryable());
    }

    #[test]
    fn retry_exhausted_is_never_retryable() {
        let error = BackupError::RetryExhausted {
            attempts: 3,
            message: "still unreachable".to_owned(),
        };
        assert!(!error.is_retryable());
    }
}
