//! # Error types used by the supervisor runtime and per-service operations.
//!
//! This module defines two main error enums:
//!
//! - [`SupervisorError`] errors raised by the supervisor runtime itself.
//! - [`ServiceError`] errors raised while driving an individual service.
//!
//! Both types provide an `as_label` helper returning a short stable
//! snake_case label for logs.

use std::path::PathBuf;

use thiserror::Error;

/// # Errors produced by the supervisor runtime.
///
/// These represent failures in the orchestration system itself. Per the
/// error policy, none of them abort a running supervisor: they surface
/// through logs and events, and the affected operation is skipped or
/// retried on the next reconciliation.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// The services-config file could not be read.
    #[error("config file {path:?} unreadable: {source}")]
    ConfigRead {
        /// Path of the config document.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },
    /// The services-config document failed JSON parsing or the structural check.
    #[error("config file {path:?} invalid: {reason}")]
    ConfigInvalid {
        /// Path of the config document.
        path: PathBuf,
        /// What the validator rejected.
        reason: String,
    },
    /// Registering the filesystem watcher failed; hot reload is unavailable.
    #[error("config watcher failed: {0}")]
    Watch(#[from] notify::Error),
}

impl SupervisorError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            SupervisorError::ConfigRead { .. } => "config_read",
            SupervisorError::ConfigInvalid { .. } => "config_invalid",
            SupervisorError::Watch(_) => "watch_failed",
        }
    }
}

/// # Errors produced while driving a single service.
///
/// These cover spawn, module resolution, hook execution, and the message
/// channel. A service error never takes the supervisor down; the desired
/// entry stays in place and the next reconciliation retries.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ServiceError {
    /// No module file matched the resolution probe order.
    #[error("service '{service}': no module found under {dir:?}")]
    ModuleNotFound {
        /// Service whose module was probed.
        service: String,
        /// Directory the probes ran against.
        dir: PathBuf,
    },
    /// The OS refused to spawn the child process.
    #[error("service '{service}': spawn failed: {source}")]
    SpawnFailed {
        /// Service being started.
        service: String,
        /// Underlying spawn failure.
        source: std::io::Error,
    },
    /// The child was spawned without the expected stdio pipes.
    #[error("service '{service}': child stdio unavailable")]
    ChannelUnavailable {
        /// Service whose pipes were missing.
        service: String,
    },
    /// A public-API descriptor list failed validation.
    #[error("invalid public api list: {reason}")]
    InvalidApiList {
        /// What the validator rejected.
        reason: String,
    },
    /// An inbound message could not be interpreted.
    #[error("protocol fault: {reason}")]
    Protocol {
        /// What was malformed.
        reason: String,
    },
}

impl ServiceError {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            ServiceError::ModuleNotFound { .. } => "module_not_found",
            ServiceError::SpawnFailed { .. } => "spawn_failed",
            ServiceError::ChannelUnavailable { .. } => "channel_unavailable",
            ServiceError::InvalidApiList { .. } => "invalid_api_list",
            ServiceError::Protocol { .. } => "protocol_fault",
        }
    }

    /// Indicates whether the next reconciliation pass may succeed where
    /// this attempt failed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServiceError::ModuleNotFound { .. } | ServiceError::SpawnFailed { .. }
        )
    }
}
