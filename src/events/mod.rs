//! Runtime events: types and broadcast bus.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! Publishers are the kernel's lifecycle, router, and reconciler paths;
//! consumers are the subscriber fan-out workers.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
