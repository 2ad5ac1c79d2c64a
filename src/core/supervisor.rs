//! # Supervisor: the kernel actor and its public facade.
//!
//! The [`Supervisor`] owns the runtime components (event bus, subscriber
//! fan-out, config store and watcher) and drives the kernel loop. The
//! kernel is one task owning [`SupervisorState`]; everything that mutates
//! state arrives as a [`Command`] through the mailbox:
//!
//! ```text
//! child pumps ──► Command::ChildRequest ──┐
//! child waiters ─► Command::ChildExited ──┤
//! restart timers ► Command::RestartDue ───┼──► kernel loop ──► state
//! config watcher ► reload marker ─────────┤
//! OS SIGINT ────► shutdown ───────────────┘
//! ```
//!
//! ## Rules
//! - At most one control operation executes at a time; awaits inside a
//!   handler are the only suspension points, and queued commands wait.
//! - Stale commands (older spawn generation, unknown service) are dropped.
//! - A reply is written only while the target's handle is live; denied or
//!   unroutable replies are discarded and the caller times out.
//! - Nothing here is fatal except an explicit `restartServer`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigSnapshot, ConfigStore, ConfigWatcher};
use crate::error::SupervisorError;
use crate::events::{Bus, Event, EventKind};
use crate::proto::{encode_line, reply_value, validate_public_api, ChildCommand, ChildRequest};
use crate::subscribers::{Subscribe, SubscriberSet};

use super::handle::SupervisorState;
use super::router::ApiOutcome;

/// Tunable knobs of the supervisor runtime.
///
/// The defaults are the contract: a 5 s graceful-stop window, a 3 s
/// crash-restart delay. Tests shorten them; production leaves them alone.
#[derive(Clone, Debug)]
pub struct SupervisorOptions {
    /// Path of the services-config JSON document.
    pub config_path: PathBuf,
    /// Directory probed for service modules.
    pub services_dir: PathBuf,
    /// Graceful-stop window before the kill escalates.
    pub stop_grace: Duration,
    /// Delay before a crash-restart attempt.
    pub restart_delay: Duration,
    /// Capacity of the event bus ring buffer.
    pub bus_capacity: usize,
}

impl SupervisorOptions {
    /// Conventional layout under a root directory:
    /// `<root>/services/services-config.json` next to `<root>/services`.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        let root = root_dir.into();
        let services_dir = root.join("services");
        Self {
            config_path: services_dir.join("services-config.json"),
            services_dir,
            stop_grace: Duration::from_millis(5000),
            restart_delay: Duration::from_millis(3000),
            bus_capacity: 1024,
        }
    }
}

/// Kernel mailbox messages.
pub(crate) enum Command {
    /// Decoded message from a child's reader pump.
    ChildRequest {
        service: String,
        generation: u64,
        request: ChildRequest,
    },
    /// A child process fully exited (any path).
    ChildExited {
        service: String,
        generation: u64,
        code: Option<i32>,
    },
    /// A crash-restart timer fired without being cancelled.
    RestartDue { service: String, generation: u64 },
}

/// Whether the kernel loop keeps running after a command.
#[derive(PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Shutdown,
}

/// The kernel: exclusive owner of [`SupervisorState`].
pub(crate) struct Kernel {
    pub(crate) options: SupervisorOptions,
    pub(crate) state: SupervisorState,
    pub(crate) bus: Bus,
    pub(crate) tx: mpsc::UnboundedSender<Command>,
    next_generation: u64,
}

impl Kernel {
    pub(crate) fn new(
        options: SupervisorOptions,
        bus: Bus,
        tx: mpsc::UnboundedSender<Command>,
    ) -> Self {
        Self {
            options,
            state: SupervisorState::new(),
            bus,
            tx,
            next_generation: 0,
        }
    }

    /// Allocates a spawn generation; strictly increasing for the kernel's
    /// lifetime so stale events can never match a newer handle.
    pub(crate) fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    /// Dispatches one mailbox command.
    pub(crate) async fn handle_command(&mut self, cmd: Command) -> Flow {
        match cmd {
            Command::ChildRequest {
                service,
                generation,
                request,
            } => self.handle_child_request(&service, generation, request).await,
            Command::ChildExited {
                service,
                generation,
                code,
            } => {
                self.handle_exit(&service, generation, code).await;
                Flow::Continue
            }
            Command::RestartDue {
                service,
                generation,
            } => {
                self.handle_restart_due(&service, generation).await;
                Flow::Continue
            }
        }
    }

    /// Handles one inbound child message per the command table: every
    /// recognised `_reqId` is answered, unknown commands included.
    async fn handle_child_request(
        &mut self,
        service: &str,
        generation: u64,
        request: ChildRequest,
    ) -> Flow {
        {
            let Some(handle) = self.state.services.get(service) else {
                debug!(service, "message from unknown service dropped");
                return Flow::Continue;
            };
            if handle.generation != generation || handle.dead {
                debug!(service, "stale message dropped");
                return Flow::Continue;
            }
        }

        let req_id = request.req_id;
        match request.cmd {
            ChildCommand::GetConfig => {
                let config = self.state.services[service].config.clone();
                let api_key = self.state.keys.ensure(service).to_string();
                self.reply(service, req_id, json!({"config": config, "apiKey": api_key}))
                    .await;
            }
            ChildCommand::Api(call) => {
                match self.handle_api(service, call).await {
                    ApiOutcome::Reply(body) => self.reply(service, req_id, body).await,
                    // Denied and unroutable calls get no reply; the caller
                    // resolves on its own timeout.
                    ApiOutcome::Silent => {}
                    ApiOutcome::Shutdown => return Flow::Shutdown,
                }
            }
            ChildCommand::SetPublicApi(raw) => {
                match validate_public_api(&raw) {
                    Ok(entries) => {
                        if let Some(handle) = self.state.services.get_mut(service) {
                            handle.api = entries;
                        }
                    }
                    Err(e) => {
                        warn!(service, error = %e, "rejected public api list");
                    }
                }
                self.reply(service, req_id, json!({})).await;
            }
            ChildCommand::Exit => {
                self.reply(service, req_id, json!({})).await;
                self.stop_service(service).await;
            }
            ChildCommand::SetChildServices(raw) => {
                self.reply(service, req_id, json!({})).await;
                self.set_child_services(service, raw).await;
            }
            ChildCommand::Unknown(cmd) => {
                warn!(service, cmd, "unknown command acknowledged with empty reply");
                self.reply(service, req_id, json!({})).await;
            }
        }
        Flow::Continue
    }

    /// Writes a correlated reply to a child, if it is still live.
    ///
    /// Messages without a `_reqId` are unsolicited notifications and get
    /// nothing back; replies for a stopped child are dropped.
    pub(crate) async fn reply(&mut self, service: &str, req_id: Option<u32>, body: Value) {
        let Some(req_id) = req_id else { return };
        let Some(handle) = self.state.services.get(service) else {
            return;
        };
        let Some(writer) = &handle.writer else { return };
        let line = encode_line(&reply_value(req_id, body));
        if writer.send(line).await.is_err() {
            debug!(service, "reply dropped, channel closed");
        }
    }
}

/// Orchestrates the kernel, subscriber fan-out, config store, and OS
/// signal handling.
///
/// ### Exit conditions
/// - **OS SIGINT** → full shutdown: stop all children, return `Ok(())`
/// - **`restartServer` RPC** → same shutdown path
///
/// The host maps a clean return onto exit code 0; re-launching is the
/// host process manager's job.
pub struct Supervisor {
    options: SupervisorOptions,
    bus: Bus,
    subs: Arc<SubscriberSet>,
}

impl Supervisor {
    /// Creates a supervisor with the given options and subscribers
    /// (maybe empty).
    pub fn new(options: SupervisorOptions, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        let bus = Bus::new(options.bus_capacity);
        Self {
            options,
            bus,
            subs: Arc::new(SubscriberSet::new(subscribers)),
        }
    }

    /// Event bus handle for external observers.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Runs until SIGINT or a `restartServer` call completes the shutdown.
    pub async fn run(self) -> Result<(), SupervisorError> {
        self.spawn_fanout();

        let store = ConfigStore::new(&self.options.config_path);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (reload_tx, mut reload_rx) = mpsc::unbounded_channel();

        // Hot reload is best-effort: a failed watcher registration leaves
        // a supervisor that only reads its config at startup.
        let _watcher = match ConfigWatcher::spawn(&self.options.config_path, reload_tx) {
            Ok(w) => Some(w),
            Err(e) => {
                warn!(error = %e, "config watching unavailable");
                None
            }
        };

        let mut kernel = Kernel::new(self.options.clone(), self.bus.clone(), tx.clone());
        let snapshot = load_snapshot(&store, &self.bus).await;
        kernel.apply_snapshot(snapshot).await;
        info!(config = %self.options.config_path.display(), "supervisor running");

        let interrupt = wait_for_interrupt();
        tokio::pin!(interrupt);

        loop {
            tokio::select! {
                res = &mut interrupt => {
                    if let Err(e) = res {
                        warn!(error = %e, "signal listener failed, shutting down");
                    }
                    kernel.shutdown_all().await;
                    break;
                }
                Some(()) = reload_rx.recv() => {
                    let snapshot = load_snapshot(&store, &self.bus).await;
                    kernel.apply_snapshot(snapshot).await;
                }
                Some(cmd) = rx.recv() => {
                    if kernel.handle_command(cmd).await == Flow::Shutdown {
                        kernel.shutdown_all().await;
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// Spawns the bus→subscriber fan-out listener.
    fn spawn_fanout(&self) {
        let mut rx = self.bus.subscribe();
        let subs = Arc::clone(&self.subs);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ev) => subs.emit(&ev),
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                }
            }
        });
    }
}

/// Loads the desired snapshot, falling back to empty on any failure; the
/// rejection is logged and surfaced as a `ConfigInvalid` event.
async fn load_snapshot(store: &ConfigStore, bus: &Bus) -> ConfigSnapshot {
    match store.try_load().await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            error!(error = %e, label = e.as_label(), "config rejected, using empty snapshot");
            bus.publish(Event::now(EventKind::ConfigInvalid).with_error(e.to_string()));
            ConfigSnapshot::empty()
        }
    }
}

/// Completes when the process receives an interrupt.
///
/// The supervisor reacts to `SIGINT` only; termination semantics of other
/// signals stay with the host.
#[cfg(unix)]
async fn wait_for_interrupt() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    sigint.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_interrupt() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
