//! # Per-service runtime record and the supervisor state it lives in.
//!
//! A [`ServiceHandle`] is the sole owner of one child: its applied config,
//! the writer half of its message channel, the stop and pending-restart
//! tokens, and the join handle of its waiter task. [`SupervisorState`] is
//! the process-wide singleton holding every handle plus the key registry,
//! the sub-service lists, and the current desired snapshot.
//!
//! ## Rules
//! - `dead` implies the process is absent (no pid, no writer).
//! - `generation` increases on every spawn; events stamped with an older
//!   generation are stale and rejected.
//! - State is mutated only inside the kernel task; no locks are needed.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigSnapshot, ServiceConfig};
use crate::keys::KeyRegistry;
use crate::proto::PublicApiEntry;

/// Supervisor-side record owning one service.
pub(crate) struct ServiceHandle {
    /// Current applied configuration; refreshed in place on reloads.
    pub config: ServiceConfig,
    /// True iff no running process is currently attached.
    pub dead: bool,
    /// Spawn generation for stale-event rejection.
    pub generation: u64,
    /// OS process id, when running.
    pub pid: Option<u32>,
    /// Advertised public-method list, validated on receipt.
    pub api: Vec<PublicApiEntry>,
    /// Sender of pre-encoded lines into the child's stdin writer task.
    pub writer: Option<mpsc::Sender<String>>,
    /// Cancelling this token starts the graceful-stop escalation.
    pub stop: Option<CancellationToken>,
    /// Waiter task; joins when the child has fully exited.
    pub child_task: Option<JoinHandle<()>>,
    /// Armed crash-restart timer, cancellable by a stop.
    pub pending_restart: Option<CancellationToken>,
}

impl ServiceHandle {
    /// True while a process is attached.
    pub fn is_running(&self) -> bool {
        !self.dead
    }

    /// Clears every process-bound field after an exit. The config, the
    /// advertised api, and the generation stay for the restart path.
    pub fn mark_dead(&mut self) {
        self.dead = true;
        self.pid = None;
        self.writer = None;
        self.stop = None;
        self.child_task = None;
    }

    /// Cancels an armed restart timer, if any. Returns whether one was armed.
    pub fn cancel_pending_restart(&mut self) -> bool {
        match self.pending_restart.take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

/// Process-wide supervisor state, owned exclusively by the kernel task.
#[derive(Default)]
pub(crate) struct SupervisorState {
    /// Live children keyed by service name.
    pub services: HashMap<String, ServiceHandle>,
    /// Sub-service configs registered by each parent, in registration order.
    pub childs: HashMap<String, Vec<ServiceConfig>>,
    /// Per-service api-keys, stable for supervisor uptime.
    pub keys: KeyRegistry,
    /// Current desired snapshot.
    pub config: ConfigSnapshot,
}

impl SupervisorState {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when a non-dead handle exists for `name`.
    pub fn is_live(&self, name: &str) -> bool {
        self.services.get(name).is_some_and(ServiceHandle::is_running)
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    /// Fabricates a running handle without a real process; the returned
    /// receiver captures every line the kernel writes to the "child".
    pub(crate) fn running_handle(
        config: ServiceConfig,
        generation: u64,
    ) -> (ServiceHandle, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(16);
        let handle = ServiceHandle {
            config,
            dead: false,
            generation,
            pid: None,
            api: Vec::new(),
            writer: Some(tx),
            stop: Some(CancellationToken::new()),
            child_task: None,
            pending_restart: None,
        };
        (handle, rx)
    }

    pub(crate) fn service_config(name: &str, api_port: u16) -> ServiceConfig {
        ServiceConfig {
            name: name.to_string(),
            api_port,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::*;
    use super::*;

    #[test]
    fn mark_dead_clears_process_fields() {
        let (mut handle, _rx) = running_handle(service_config("a", 1), 1);
        handle.pid = Some(42);
        handle.mark_dead();

        assert!(handle.dead);
        assert!(handle.pid.is_none());
        assert!(handle.writer.is_none());
        assert!(handle.stop.is_none());
        assert_eq!(handle.generation, 1);
    }

    #[test]
    fn cancel_pending_restart_is_idempotent() {
        let (mut handle, _rx) = running_handle(service_config("a", 1), 1);
        let token = CancellationToken::new();
        handle.pending_restart = Some(token.clone());

        assert!(handle.cancel_pending_restart());
        assert!(token.is_cancelled());
        assert!(!handle.cancel_pending_restart());
    }

    #[test]
    fn is_live_reflects_dead_flag() {
        let mut state = SupervisorState::new();
        let (handle, _rx) = running_handle(service_config("a", 1), 1);
        state.services.insert("a".to_string(), handle);
        assert!(state.is_live("a"));

        state.services.get_mut("a").unwrap().mark_dead();
        assert!(!state.is_live("a"));
        assert!(!state.is_live("ghost"));
    }
}
