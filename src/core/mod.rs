//! Supervisor kernel: state, lifecycle, broker plumbing, control plane,
//! and reconciliation.
//!
//! ## Files & responsibilities
//! - **supervisor.rs**: public facade and the kernel actor; owns
//!   `SupervisorState`, drains the command mailbox, dispatches child
//!   messages, handles OS SIGINT as a full shutdown.
//! - **handle.rs**: per-service runtime record (`ServiceHandle`) and the
//!   shared state maps.
//! - **lifecycle.rs**: start sequence (hooks, pause, spawn), graceful stop
//!   with kill escalation, crash-restart scheduling.
//! - **channel.rs**: per-child stdio plumbing; reader pump into the
//!   mailbox, writer task guarding liveness.
//! - **router.rs**: capability-checked control-plane dispatch.
//! - **reconcile.rs**: stop/refresh/start passes, sub-service
//!   registration, full shutdown.
//! - **resolve.rs**: module-path probing.
//!
//! ## Wiring (module-level flow)
//! ```text
//! ConfigStore ─► snapshot ─► Kernel::apply_snapshot ─► reconcile
//!                                                       │
//!                     ┌── stop_many ◄── plan_stops ◄────┤
//!                     │                                  │
//!                     └─► launch (hooks→spawn) ─► adopt ─┘
//!                              │
//!                              ├─► channel pump ─► Command::ChildRequest
//!                              └─► waiter ───────► Command::ChildExited
//!
//! Command::ChildRequest ─► getConfig / setPublicApi / exit / setChildServices
//!                       └─► api ─► router ─► reply | silence | shutdown
//! ```

mod channel;
mod handle;
mod lifecycle;
mod reconcile;
mod resolve;
mod router;
mod supervisor;

pub use resolve::resolve_module;
pub use supervisor::{Supervisor, SupervisorOptions};
