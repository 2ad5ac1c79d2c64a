//! # Config store: load, validate, normalize the services-config document.
//!
//! A malformed or unreadable document never aborts the supervisor: the
//! store falls back to the empty snapshot, logs the failure, and startup
//! proceeds with zero services. The next file-change notification retries
//! from scratch.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::error;

use crate::error::SupervisorError;

use super::model::ConfigSnapshot;

/// Loads and validates the on-disk services-config JSON.
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    /// Creates a store bound to the given document path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the watched document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads and parses the document, falling back to the empty snapshot
    /// on any failure. The failure is logged; the caller only ever sees a
    /// usable snapshot.
    pub async fn load(&self) -> ConfigSnapshot {
        match self.try_load().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(error = %e, label = e.as_label(), "config load failed, using empty snapshot");
                ConfigSnapshot::empty()
            }
        }
    }

    /// Reads and parses the document, surfacing the failure.
    pub async fn try_load(&self) -> Result<ConfigSnapshot, SupervisorError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| SupervisorError::ConfigRead {
                path: self.path.clone(),
                source,
            })?;
        parse_snapshot(&self.path, &raw)
    }
}

/// Parses and structurally validates a config document.
///
/// Checks: top-level object, `services` present and an object. Per-entry
/// normalization (name from key, `maxChilds` default 0) happens through
/// serde defaults plus [`ConfigSnapshot::normalize`].
fn parse_snapshot(path: &Path, raw: &str) -> Result<ConfigSnapshot, SupervisorError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| SupervisorError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    let invalid = |reason: &str| SupervisorError::ConfigInvalid {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    let obj = value.as_object().ok_or_else(|| invalid("document is not an object"))?;
    match obj.get("services") {
        Some(Value::Object(_)) => {}
        Some(_) => return Err(invalid("'services' is not an object")),
        None => return Err(invalid("'services' is missing")),
    }

    let mut snapshot: ConfigSnapshot =
        serde_json::from_value(value).map_err(|e| SupervisorError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    snapshot.normalize();
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("services-config.json");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[tokio::test]
    async fn load_valid_document() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"{
                "services": {
                    "auth": {"apiPort": 4101, "allowedAPI": ["nsrvm"]},
                    "billing": {"apiPort": 4102}
                },
                "restartCmd": "restart-me"
            }"#,
        );

        let snapshot = ConfigStore::new(path).load().await;
        assert_eq!(snapshot.services.len(), 2);
        assert_eq!(snapshot.services["auth"].name, "auth");
        assert_eq!(snapshot.services["billing"].max_childs, 0);
        assert_eq!(snapshot.restart_cmd, "restart-me");
    }

    #[tokio::test]
    async fn missing_file_yields_empty_snapshot() {
        let dir = TempDir::new().unwrap();
        let snapshot = ConfigStore::new(dir.path().join("nope.json")).load().await;
        assert!(snapshot.services.is_empty());
        assert_eq!(snapshot.restart_cmd, "");
    }

    #[tokio::test]
    async fn invalid_json_yields_empty_snapshot() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "{not json");
        let snapshot = ConfigStore::new(path).load().await;
        assert!(snapshot.services.is_empty());
    }

    #[tokio::test]
    async fn missing_services_object_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, r#"{"restartCmd": "x"}"#);
        let store = ConfigStore::new(path);
        assert!(store.try_load().await.is_err());
        assert!(store.load().await.services.is_empty());
    }

    #[tokio::test]
    async fn non_object_services_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, r#"{"services": [1, 2]}"#);
        assert!(ConfigStore::new(path).try_load().await.is_err());
    }
}
