//! # nsrvm
//!
//! **nsrvm** is a service supervisor: a parent process that launches,
//! monitors, restarts, and brokers request/reply messaging for a set of
//! long-running child service processes described by a declarative JSON
//! config file.
//!
//! ## Features
//!
//! | Area               | Description                                                          | Key types                                |
//! |--------------------|----------------------------------------------------------------------|------------------------------------------|
//! | **Supervision**    | Spawn, health, graceful stop with kill escalation, crash back-off.   | [`Supervisor`], [`SupervisorOptions`]    |
//! | **Desired state**  | JSON config document, hot reload via file watching.                  | [`ConfigSnapshot`], [`ConfigStore`], [`ConfigWatcher`] |
//! | **Identity**       | Per-service random api-keys, stable across reloads.                  | [`KeyRegistry`]                          |
//! | **Broker**         | Correlated request/reply over child stdio, reply timeouts.           | [`ServiceClient`], [`wire`]              |
//! | **Control plane**  | Capability-checked RPCs (`getApiKey`, `restartService`, …).          | [`SUPERVISOR_CAPABILITY`]                |
//! | **Sub-services**   | A privileged service spawns and governs its own children.            | `setChildServices` via [`ServiceClient`] |
//! | **Observability**  | Lifecycle event bus with pluggable subscribers.                      | [`Event`], [`EventKind`], [`Subscribe`]  |
//!
//! ## Supervisor side
//!
//! ```no_run
//! use nsrvm::{LogSubscriber, Subscribe, Supervisor, SupervisorOptions};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = SupervisorOptions::new("/srv/myapp");
//!     let subscribers: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogSubscriber)];
//!     let supervisor = Supervisor::new(options, subscribers);
//!     // Runs until SIGINT or a privileged `restartServer` call; a clean
//!     // return maps to exit code 0 and the host manager re-launches.
//!     supervisor.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Service side
//!
//! ```no_run
//! use nsrvm::ServiceClient;
//!
//! #[tokio::main]
//! async fn main() {
//!     let (client, _notifications) = ServiceClient::connect();
//!     let own = client.get_config().await.expect("supervisor reachable");
//!     eprintln!("listening on port {}", own.config.api_port);
//!
//!     // ... bind the api port, serve ...
//!
//!     client.wait_for_interrupt().await;
//! }
//! ```
//!
//! ---

mod client;
mod config;
mod core;
mod error;
mod events;
mod keys;
mod proto;
mod subscribers;

// ---- Public re-exports ----

pub use client::{OwnConfig, ServiceClient, DEFAULT_REPLY_TIMEOUT};
pub use config::{
    ConfigSnapshot, ConfigStore, ConfigWatcher, HookCommand, ServiceConfig,
    SUPERVISOR_CAPABILITY,
};
pub use crate::core::{resolve_module, Supervisor, SupervisorOptions};
pub use error::{ServiceError, SupervisorError};
pub use events::{Bus, Event, EventKind};
pub use keys::KeyRegistry;
pub use subscribers::{LogSubscriber, Subscribe, SubscriberSet};

/// Wire-protocol building blocks for services implemented outside this
/// crate: message framing, correlation ids, and descriptor validation.
pub mod wire {
    pub use crate::proto::{
        encode_line, reply_value, request_value, validate_public_api, ApiCall, ApiMethod,
        ChildCommand, ChildRequest, ParentMessage, PublicApiEntry, ReqIdCounter,
        MAX_API_ENTRIES, MAX_DESCRIPTION_LEN, MAX_NAME_LEN, REQ_ID_FIELD, REQ_ID_MAX,
        SIGINT_SENTINEL,
    };
}
