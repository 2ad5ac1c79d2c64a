//! # Runtime events emitted by the supervisor kernel.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Config events**: snapshot loads and rejections
//! - **Lifecycle events**: per-service flow (starting, started, stopping,
//!   stopped, crashed, spawn failure, kill escalation)
//! - **Restart events**: crash-restart scheduling and cancellation
//! - **Control events**: control-plane serving/denial, sub-service
//!   adoption/rejection, shutdown
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases
//! monotonically, so consumers can order events correctly even when they
//! arrive through async channels out of order.

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Config events ===
    /// A desired-state snapshot was loaded and applied.
    ConfigLoaded,
    /// The on-disk document was rejected; the empty snapshot was used.
    ConfigInvalid,

    // === Service lifecycle events ===
    /// Hooks and spawn are about to run for a service.
    ServiceStarting,
    /// The child process is up and its channel is attached.
    ServiceStarted,
    /// A graceful stop was issued.
    ServiceStopping,
    /// The service exited (stop path or clean exit).
    ServiceStopped,
    /// The service exited unexpectedly with a non-zero code.
    ServiceCrashed,
    /// Module resolution or process spawn failed.
    SpawnFailed,
    /// The graceful-stop timer expired; the kill escalated.
    KillEscalated,
    /// A lifecycle hook command ran.
    HookRun,
    /// A hook exceeded its kill-timeout and was terminated.
    HookTimeout,

    // === Restart events ===
    /// A crash-restart was scheduled after the back-off delay.
    RestartScheduled,
    /// A pending crash-restart was cancelled by a stop.
    RestartCanceled,

    // === Control-plane events ===
    /// A control-plane call passed its capability check and was served.
    ApiServed,
    /// A control-plane call failed its capability check; no reply is sent.
    ApiDenied,
    /// A sub-service registration was accepted.
    ChildAdopted,
    /// A sub-service registration was rejected (bound or contention).
    ChildRejected,
    /// Full shutdown was requested (OS signal or `restartServer`).
    ShutdownRequested,
}

/// Runtime event with optional metadata.
///
/// Carries information about service lifecycle, crashes, restart delays,
/// and control-plane decisions.
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp (may go backwards, use for logging only).
    pub at: SystemTime,
    /// The kind of event.
    pub kind: EventKind,
    /// Name of the service, if applicable.
    pub service: Option<String>,
    /// Error message, if the event represents a failure.
    pub error: Option<String>,
    /// Delay before a scheduled restart, if relevant.
    pub delay: Option<Duration>,
    /// Child exit code, if relevant.
    pub exit_code: Option<i32>,
    /// Control-plane method name, if relevant.
    pub method: Option<String>,
}

impl Event {
    /// Creates a new event of the given kind with the current timestamp
    /// and the next sequence number.
    pub fn now(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            service: None,
            error: None,
            delay: None,
            exit_code: None,
            method: None,
        }
    }

    /// Attaches a service name.
    pub fn with_service(mut self, name: impl Into<String>) -> Self {
        self.service = Some(name.into());
        self
    }

    /// Attaches an error message.
    pub fn with_error(mut self, msg: impl Into<String>) -> Self {
        self.error = Some(msg.into());
        self
    }

    /// Attaches a restart delay.
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay = Some(d);
        self
    }

    /// Attaches a child exit code.
    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    /// Attaches a control-plane method name.
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_is_strictly_increasing() {
        let a = Event::now(EventKind::ServiceStarting);
        let b = Event::now(EventKind::ServiceStarted);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn builders_attach_metadata() {
        let ev = Event::now(EventKind::ServiceCrashed)
            .with_service("auth")
            .with_exit_code(2)
            .with_delay(Duration::from_secs(3));
        assert_eq!(ev.service.as_deref(), Some("auth"));
        assert_eq!(ev.exit_code, Some(2));
        assert_eq!(ev.delay, Some(Duration::from_secs(3)));
    }
}
