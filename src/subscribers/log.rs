//! # Tracing-backed logging subscriber.
//!
//! [`LogSubscriber`] renders runtime events through `tracing` in a compact
//! one-line format, e.g.:
//!
//! ```text
//! [started] service=auth
//! [crashed] service=auth code=2
//! [restart-scheduled] service=auth delay=3s
//! [api-denied] service=billing method=getApiKey
//! ```

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::events::{Event, EventKind};

use super::Subscribe;

/// Built-in subscriber that logs every event via `tracing`.
pub struct LogSubscriber;

#[async_trait]
impl Subscribe for LogSubscriber {
    async fn on_event(&self, e: &Event) {
        let service = e.service.as_deref().unwrap_or("-");
        match e.kind {
            EventKind::ConfigLoaded => info!("[config-loaded]"),
            EventKind::ConfigInvalid => {
                error!("[config-invalid] err={:?}", e.error)
            }
            EventKind::ServiceStarting => info!("[starting] service={service}"),
            EventKind::ServiceStarted => info!("[started] service={service}"),
            EventKind::ServiceStopping => info!("[stopping] service={service}"),
            EventKind::ServiceStopped => {
                info!("[stopped] service={service} code={:?}", e.exit_code)
            }
            EventKind::ServiceCrashed => {
                warn!("[crashed] service={service} code={:?}", e.exit_code)
            }
            EventKind::SpawnFailed => {
                error!("[spawn-failed] service={service} err={:?}", e.error)
            }
            EventKind::KillEscalated => warn!("[kill-escalated] service={service}"),
            EventKind::HookRun => info!("[hook] service={service}"),
            EventKind::HookTimeout => warn!("[hook-timeout] service={service}"),
            EventKind::RestartScheduled => {
                info!("[restart-scheduled] service={service} delay={:?}", e.delay)
            }
            EventKind::RestartCanceled => info!("[restart-canceled] service={service}"),
            EventKind::ApiServed => {
                info!("[api] service={service} method={:?}", e.method)
            }
            EventKind::ApiDenied => {
                warn!("[api-denied] service={service} method={:?}", e.method)
            }
            EventKind::ChildAdopted => info!("[child-adopted] service={service}"),
            EventKind::ChildRejected => {
                warn!("[child-rejected] service={service} err={:?}", e.error)
            }
            EventKind::ShutdownRequested => info!("[shutdown-requested]"),
        }
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
