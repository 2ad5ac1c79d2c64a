//! # Per-service lifecycle: spawn, graceful stop, crash restart.
//!
//! Drives one service through the state machine:
//!
//! ```text
//! Absent ──start──► Starting ──spawn ok──► Running
//!   ▲                  │ spawn err             │
//!   │◄─────────────────┘ (no restart)          │
//!   │                                          │
//!   │◄──stop: SIGINT ─► 5s timer ─► SIGKILL ◄──┤
//!   │                                          │
//!   └──◄─ crash (code ≠ 0): afterExit hooks ◄──┘
//!             └─► 3s restart timer (cancellable by stop)
//! ```
//!
//! ## Rules
//! - `runBeforeStart` hooks run in order before the spawn, each with its
//!   optional kill-timeout; then the `waitBeforeStart` pause.
//! - Spawn failure returns to Absent without scheduling anything.
//! - Graceful stop delivers `SIGINT` (unix) or the in-band `"SIGINT"`
//!   line (elsewhere); `SIGKILL` after the grace window.
//! - Exit code 0 is terminal; only a non-zero exit arms the restart timer,
//!   after `runAfterExit` hooks and the `waitAfterExit` pause.
//! - Stale exits (older spawn generation) never touch a newer handle.

use std::path::Path;
use std::time::Duration;

use tokio::process::{Child, Command as ProcessCommand};
use tokio::sync::mpsc;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{HookCommand, ServiceConfig};
use crate::error::ServiceError;
use crate::events::{Bus, Event, EventKind};

use super::channel;
use super::handle::ServiceHandle;
use super::resolve::resolve_module;
use super::supervisor::{Command, Kernel};

/// A freshly spawned child, not yet adopted into the state.
#[derive(Debug)]
pub(crate) struct Launched {
    pub config: ServiceConfig,
    pub generation: u64,
    pub child: Child,
    pub writer: mpsc::Sender<String>,
}

/// Runs the start sequence for one service: hooks, pause, resolve, spawn,
/// channel attach. Touches no shared state, so the reconciler can run any
/// number of these in parallel and adopt the survivors afterwards.
pub(crate) async fn launch(
    config: ServiceConfig,
    generation: u64,
    services_dir: &Path,
    tx: mpsc::UnboundedSender<Command>,
    bus: Bus,
) -> Result<Launched, ServiceError> {
    bus.publish(Event::now(EventKind::ServiceStarting).with_service(&config.name));

    run_hooks(&config.run_before_start, &config.name, &bus).await;
    if config.wait_before_start > 0 {
        time::sleep(Duration::from_millis(config.wait_before_start)).await;
    }

    let module = resolve_module(services_dir, &config).ok_or_else(|| {
        ServiceError::ModuleNotFound {
            service: config.name.clone(),
            dir: services_dir.to_path_buf(),
        }
    })?;

    let mut command = match &config.exec_path {
        Some(exec) => {
            let mut c = ProcessCommand::new(exec);
            if let Some(argv) = &config.exec_argv {
                c.args(argv);
            }
            c.arg(&module);
            c
        }
        None => ProcessCommand::new(&module),
    };
    if let Some(env) = &config.env {
        command.envs(env);
    }
    command
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::inherit());

    let mut child = command.spawn().map_err(|source| ServiceError::SpawnFailed {
        service: config.name.clone(),
        source,
    })?;

    let chan = channel::attach(&mut child, &config.name, generation, tx)?;
    Ok(Launched {
        config,
        generation,
        child,
        writer: chan.writer,
    })
}

impl Kernel {
    /// Adopts a launched child: spawns its waiter and registers the handle.
    pub(crate) fn adopt(&mut self, launched: Launched) {
        let name = launched.config.name.clone();
        let stop = CancellationToken::new();
        let pid = launched.child.id();

        let child_task = tokio::spawn(wait_child(
            launched.child,
            name.clone(),
            launched.generation,
            stop.clone(),
            launched.writer.clone(),
            self.tx.clone(),
            self.bus.clone(),
            self.options.stop_grace,
        ));

        let handle = ServiceHandle {
            config: launched.config,
            dead: false,
            generation: launched.generation,
            pid,
            api: Vec::new(),
            writer: Some(launched.writer),
            stop: Some(stop),
            child_task: Some(child_task),
            pending_restart: None,
        };
        self.state.services.insert(name.clone(), handle);
        self.bus
            .publish(Event::now(EventKind::ServiceStarted).with_service(name));
    }

    /// Starts one service by name from its applied (or desired) config.
    /// A live non-dead handle makes this a no-op.
    pub(crate) async fn start_service(&mut self, name: &str) {
        let config = match self.state.services.get(name) {
            Some(h) if h.is_running() => return,
            Some(h) => h.config.clone(),
            None => match self.state.config.services.get(name) {
                Some(c) => c.clone(),
                None => {
                    warn!(service = name, "start requested for unknown service");
                    return;
                }
            },
        };

        let generation = self.next_generation();
        let services_dir = self.options.services_dir.clone();
        match launch(
            config,
            generation,
            &services_dir,
            self.tx.clone(),
            self.bus.clone(),
        )
        .await
        {
            Ok(launched) => self.adopt(launched),
            Err(e) => {
                warn!(service = name, error = %e, label = e.as_label(), "start failed");
                self.bus.publish(
                    Event::now(EventKind::SpawnFailed)
                        .with_service(name)
                        .with_error(e.to_string()),
                );
            }
        }
    }

    /// Initiates a stop: removes the handle, cancels timers, fires the
    /// stop token. Returns the waiter to await, `None` if the name was
    /// not live. The handle disappears from `services` before the process
    /// actually exits.
    pub(crate) fn begin_stop(
        &mut self,
        name: &str,
    ) -> Option<Option<tokio::task::JoinHandle<()>>> {
        let mut handle = self.state.services.remove(name)?;
        if handle.cancel_pending_restart() {
            self.bus
                .publish(Event::now(EventKind::RestartCanceled).with_service(name));
        }
        if handle.is_running() {
            self.bus
                .publish(Event::now(EventKind::ServiceStopping).with_service(name));
        }
        handle.writer = None;
        let task = handle.child_task.take();
        if let Some(stop) = handle.stop.take() {
            stop.cancel();
        }
        Some(task)
    }

    /// Stops one service and waits for its process to be gone.
    pub(crate) async fn stop_service(&mut self, name: &str) -> bool {
        match self.begin_stop(name) {
            Some(task) => {
                if let Some(task) = task {
                    let _ = task.await;
                }
                true
            }
            None => false,
        }
    }

    /// Stops many services, escalations running in parallel.
    pub(crate) async fn stop_many(&mut self, names: &[String]) {
        let mut tasks = Vec::new();
        for name in names {
            if let Some(Some(task)) = self.begin_stop(name) {
                tasks.push(task);
            }
        }
        futures::future::join_all(tasks).await;
    }

    /// Handles a child exit reported by its waiter.
    pub(crate) async fn handle_exit(&mut self, service: &str, generation: u64, code: Option<i32>) {
        let config = {
            let Some(handle) = self.state.services.get_mut(service) else {
                // Stopped: the handle was removed before the exit arrived.
                return;
            };
            if handle.generation != generation || handle.dead {
                return;
            }
            handle.mark_dead();
            handle.config.clone()
        };

        let crashed = code != Some(0);
        if crashed {
            warn!(service, ?code, "service crashed");
            self.bus.publish(
                Event::now(EventKind::ServiceCrashed)
                    .with_service(service)
                    .with_exit_code(code.unwrap_or(-1)),
            );
            run_hooks(&config.run_after_exit, service, &self.bus).await;
            if config.wait_after_exit > 0 {
                time::sleep(Duration::from_millis(config.wait_after_exit)).await;
            }
            self.schedule_restart(service, generation);
        } else {
            info!(service, "service exited cleanly");
            self.bus.publish(
                Event::now(EventKind::ServiceStopped)
                    .with_service(service)
                    .with_exit_code(0),
            );
        }
    }

    /// Arms the cancellable crash-restart timer.
    fn schedule_restart(&mut self, service: &str, generation: u64) {
        let Some(handle) = self.state.services.get_mut(service) else {
            return;
        };
        let token = CancellationToken::new();
        handle.pending_restart = Some(token.clone());

        let delay = self.options.restart_delay;
        self.bus.publish(
            Event::now(EventKind::RestartScheduled)
                .with_service(service)
                .with_delay(delay),
        );

        let tx = self.tx.clone();
        let name = service.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = time::sleep(delay) => {
                    let _ = tx.send(Command::RestartDue { service: name, generation });
                }
                _ = token.cancelled() => {}
            }
        });
    }

    /// Handles a fired restart timer: ignore if stale, otherwise start.
    pub(crate) async fn handle_restart_due(&mut self, service: &str, generation: u64) {
        {
            let Some(handle) = self.state.services.get_mut(service) else {
                return;
            };
            if handle.generation != generation {
                return;
            }
            handle.pending_restart = None;
        }
        self.start_service(service).await;
    }
}

/// Owns the child until it exits; drives the graceful-stop escalation when
/// the stop token fires. Always reports the final exit to the kernel.
#[allow(clippy::too_many_arguments)]
async fn wait_child(
    mut child: Child,
    service: String,
    generation: u64,
    stop: CancellationToken,
    writer: mpsc::Sender<String>,
    tx: mpsc::UnboundedSender<Command>,
    bus: Bus,
    stop_grace: Duration,
) {
    let code = tokio::select! {
        status = child.wait() => status.ok().and_then(|s| s.code()),
        _ = stop.cancelled() => {
            deliver_interrupt(&child, &writer).await;
            match time::timeout(stop_grace, child.wait()).await {
                Ok(status) => status.ok().and_then(|s| s.code()),
                Err(_) => {
                    bus.publish(Event::now(EventKind::KillEscalated).with_service(&service));
                    warn!(service = %service, "graceful stop timed out, killing");
                    let _ = child.start_kill();
                    child.wait().await.ok().and_then(|s| s.code())
                }
            }
        }
    };
    let _ = tx.send(Command::ChildExited {
        service,
        generation,
        code,
    });
}

/// Delivers the graceful interrupt: a real `SIGINT` on unix, the in-band
/// `"SIGINT"` line elsewhere. Either way the child observes an interrupt.
#[cfg(unix)]
async fn deliver_interrupt(child: &Child, _writer: &mpsc::Sender<String>) {
    if let Some(pid) = child.id() {
        // SAFETY: pid comes from a live child owned by this task.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGINT);
        }
    }
}

#[cfg(not(unix))]
async fn deliver_interrupt(_child: &Child, writer: &mpsc::Sender<String>) {
    use crate::proto::{encode_line, SIGINT_SENTINEL};
    let line = encode_line(&serde_json::Value::String(SIGINT_SENTINEL.to_string()));
    let _ = writer.send(line).await;
}

/// Runs hook commands in order. A hook with `waitForClose` blocks until it
/// exits or its kill-timeout expires; otherwise it is fired and left to
/// run, with the timeout enforced from a detached task. Hook failures and
/// timeouts are logged, never fatal.
async fn run_hooks(hooks: &[HookCommand], service: &str, bus: &Bus) {
    for hook in hooks {
        let mut cmd = ProcessCommand::new(&hook.app);
        cmd.args(&hook.args);
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(service, app = %hook.app, error = %e, "hook spawn failed");
                continue;
            }
        };
        bus.publish(Event::now(EventKind::HookRun).with_service(service));

        let timeout = hook.run_timeout.map(Duration::from_millis);
        if hook.wait_for_close {
            match timeout {
                Some(limit) => {
                    if time::timeout(limit, child.wait()).await.is_err() {
                        warn!(service, app = %hook.app, "hook exceeded its timeout");
                        bus.publish(Event::now(EventKind::HookTimeout).with_service(service));
                        let _ = child.start_kill();
                        let _ = child.wait().await;
                    }
                }
                None => {
                    let _ = child.wait().await;
                }
            }
        } else if let Some(limit) = timeout {
            tokio::spawn(async move {
                if time::timeout(limit, child.wait()).await.is_err() {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::handle::testutil::{running_handle, service_config};
    use crate::core::testutil::test_kernel;
    use tempfile::TempDir;

    #[tokio::test]
    async fn exit_zero_is_terminal_no_restart() {
        let dir = TempDir::new().unwrap();
        let (mut kernel, _rx) = test_kernel(&dir);
        let (handle, _child_rx) = running_handle(service_config("a", 1), 1);
        kernel.state.services.insert("a".to_string(), handle);

        kernel.handle_exit("a", 1, Some(0)).await;

        let handle = &kernel.state.services["a"];
        assert!(handle.dead);
        assert!(handle.pending_restart.is_none());
    }

    #[tokio::test]
    async fn crash_schedules_restart_and_stop_cancels_it() {
        let dir = TempDir::new().unwrap();
        let (mut kernel, mut rx) = test_kernel(&dir);
        let (handle, _child_rx) = running_handle(service_config("a", 1), 1);
        kernel.state.services.insert("a".to_string(), handle);

        kernel.handle_exit("a", 1, Some(2)).await;
        assert!(kernel.state.services["a"].pending_restart.is_some());

        // Stop during the pending interval removes the timer; nothing fires.
        kernel.stop_service("a").await;
        let fired =
            tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(fired.is_err(), "cancelled restart must not fire");
    }

    #[tokio::test]
    async fn crash_restart_fires_after_delay() {
        let dir = TempDir::new().unwrap();
        let (mut kernel, mut rx) = test_kernel(&dir);
        let (handle, _child_rx) = running_handle(service_config("a", 1), 1);
        kernel.state.services.insert("a".to_string(), handle);

        kernel.handle_exit("a", 1, Some(2)).await;

        let cmd = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("restart timer should fire")
            .unwrap();
        match cmd {
            Command::RestartDue { service, generation } => {
                assert_eq!(service, "a");
                assert_eq!(generation, 1);
            }
            _ => panic!("expected RestartDue"),
        }
    }

    #[tokio::test]
    async fn stale_exit_is_ignored() {
        let dir = TempDir::new().unwrap();
        let (mut kernel, _rx) = test_kernel(&dir);
        let (handle, _child_rx) = running_handle(service_config("a", 1), 5);
        kernel.state.services.insert("a".to_string(), handle);

        kernel.handle_exit("a", 4, Some(2)).await;
        assert!(kernel.state.services["a"].is_running());
    }

    #[tokio::test]
    async fn exit_after_stop_is_ignored() {
        let dir = TempDir::new().unwrap();
        let (mut kernel, _rx) = test_kernel(&dir);
        let (handle, _child_rx) = running_handle(service_config("a", 1), 1);
        kernel.state.services.insert("a".to_string(), handle);

        kernel.stop_service("a").await;
        // The waiter's exit report lands after removal; it must be a no-op.
        kernel.handle_exit("a", 1, Some(0)).await;
        assert!(!kernel.state.services.contains_key("a"));
    }

    #[tokio::test]
    async fn restart_due_for_current_generation_restarts() {
        let dir = TempDir::new().unwrap();
        let (mut kernel, _rx) = test_kernel(&dir);
        let (mut handle, _child_rx) = running_handle(service_config("a", 1), 1);
        handle.mark_dead();
        handle.pending_restart = Some(CancellationToken::new());
        kernel.state.services.insert("a".to_string(), handle);

        // No module on disk: the start attempt fails, but the timer slot
        // must be cleared either way.
        kernel.handle_restart_due("a", 1).await;
        assert!(kernel.state.services["a"].pending_restart.is_none());
    }

    #[tokio::test]
    async fn launch_without_module_fails_with_module_not_found() {
        let dir = TempDir::new().unwrap();
        let (kernel, _rx) = test_kernel(&dir);
        let err = launch(
            service_config("ghost", 1),
            1,
            &kernel.options.services_dir,
            kernel.tx.clone(),
            kernel.bus.clone(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::ModuleNotFound { .. }));
    }
}
