//! # Config-file watcher.
//!
//! Bridges `notify` filesystem events into the supervisor's mailbox: every
//! modification of the services-config document becomes one reload marker
//! on a tokio channel. Bursts coalesce in the kernel, which is the only
//! reconciliation entry point.
//!
//! The parent directory is watched (non-recursively) rather than the file
//! itself, so editors that replace the file atomically still trigger.

use std::path::{Path, PathBuf};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::error::SupervisorError;

/// Watches the services-config document and signals changes.
///
/// The underlying watcher lives as long as this struct; dropping it stops
/// the notifications.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
}

impl ConfigWatcher {
    /// Starts watching `config_path`. Each relevant change pushes one unit
    /// onto `tx`; a full channel just drops the marker (a reload is already
    /// pending).
    pub fn spawn(
        config_path: &Path,
        tx: mpsc::UnboundedSender<()>,
    ) -> Result<Self, SupervisorError> {
        let file_name = config_path.file_name().map(|n| n.to_os_string());
        let watch_dir: PathBuf = config_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let mut watcher =
            notify::recommended_watcher(move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    if !matches!(
                        event.kind,
                        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
                    ) {
                        return;
                    }
                    let ours = event.paths.iter().any(|p| {
                        p.file_name().map(|n| n.to_os_string()) == file_name
                    });
                    if ours {
                        debug!(?event.kind, "config file changed");
                        let _ = tx.send(());
                    }
                }
                Err(e) => {
                    error!(error = %e, "config watcher error");
                }
            })?;

        watcher.watch(&watch_dir, RecursiveMode::NonRecursive)?;
        info!(path = %config_path.display(), "watching services-config");

        Ok(Self { _watcher: watcher })
    }
}
