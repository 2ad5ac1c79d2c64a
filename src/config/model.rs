//! # Desired-state document model.
//!
//! [`ConfigSnapshot`] mirrors the on-disk services-config JSON:
//!
//! ```json
//! {
//!   "services": {
//!     "auth": {
//!       "apiPort": 4101,
//!       "allowedAPI": ["billing", "nsrvm"],
//!       "maxChilds": 2,
//!       "runBeforeStart": [{"app": "mkdir", "args": ["-p", "/tmp/auth"]}]
//!     }
//!   },
//!   "restartCmd": "systemctl restart nsrvm"
//! }
//! ```
//!
//! Wire field names are camelCase; the structs carry snake_case. The same
//! types travel back over IPC in `getConfig` replies and in
//! `setChildServices` payloads, so everything here is both `Serialize`
//! and `Deserialize`.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Name a service must list in `allowedAPI` to call supervisor-wide
/// control-plane methods.
pub const SUPERVISOR_CAPABILITY: &str = "nsrvm";

/// One external command run around a service's lifecycle
/// (`runBeforeStart` / `runAfterExit`).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookCommand {
    /// Executable to run.
    pub app: String,
    /// Arguments passed verbatim.
    #[serde(default)]
    pub args: Vec<String>,
    /// Block the lifecycle transition until the command exits.
    #[serde(default)]
    pub wait_for_close: bool,
    /// Kill-timeout in milliseconds; exceeding it terminates the command
    /// and is logged, but is not an error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_timeout: Option<u64>,
}

/// Desired configuration of one service, keyed by `name`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    /// Unique service name (primary key). Normalized from the map key when
    /// the document omits it.
    #[serde(default)]
    pub name: String,
    /// Relative module-path hint; the service name is probed otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_path: Option<String>,
    /// Port the service will listen on. A change forces a restart.
    pub api_port: u16,
    /// Peer names this service may address; the literal `"nsrvm"` grants
    /// the supervisor control plane.
    #[serde(default, rename = "allowedAPI")]
    pub allowed_api: Vec<String>,
    /// Parent service that registered this config, absent for top-level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Upper bound on sub-services this service may declare.
    #[serde(default)]
    pub max_childs: u32,
    /// Interpreter or executable override for the spawn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec_path: Option<PathBuf>,
    /// Extra environment for the child.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,
    /// Arguments inserted before the module path when `exec_path` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec_argv: Option<Vec<String>>,
    /// Hook commands run, in order, before the spawn.
    #[serde(default)]
    pub run_before_start: Vec<HookCommand>,
    /// Hook commands run, in order, after an unexpected exit.
    #[serde(default)]
    pub run_after_exit: Vec<HookCommand>,
    /// Pause in milliseconds between hooks and spawn.
    #[serde(default)]
    pub wait_before_start: u64,
    /// Pause in milliseconds after the exit hooks.
    #[serde(default)]
    pub wait_after_exit: u64,
}

impl ServiceConfig {
    /// True if this config grants the supervisor control plane.
    pub fn has_supervisor_capability(&self) -> bool {
        self.allowed_api.iter().any(|p| p == SUPERVISOR_CAPABILITY)
    }

    /// True if this config allows addressing the named peer.
    pub fn allows_peer(&self, peer: &str) -> bool {
        self.allowed_api.iter().any(|p| p == peer)
    }
}

/// The full desired-state snapshot: every service plus the (unused by the
/// core) host restart command.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSnapshot {
    /// Desired services keyed by name.
    #[serde(default)]
    pub services: HashMap<String, ServiceConfig>,
    /// Host re-launch command. Retained from the document, never executed
    /// by the core; re-launch belongs to the host process manager.
    #[serde(default)]
    pub restart_cmd: String,
}

impl ConfigSnapshot {
    /// Returns the empty snapshot used when the document is missing or
    /// malformed.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Normalizes every entry: the map key wins as the service name.
    pub(crate) fn normalize(&mut self) {
        for (name, cfg) in self.services.iter_mut() {
            cfg.name = name.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_literal_is_matched() {
        let cfg = ServiceConfig {
            allowed_api: vec!["billing".into(), "nsrvm".into()],
            ..Default::default()
        };
        assert!(cfg.has_supervisor_capability());
        assert!(cfg.allows_peer("billing"));
        assert!(!cfg.allows_peer("auth"));
    }

    #[test]
    fn wire_names_are_camel_case() {
        let json = r#"{
            "name": "auth",
            "apiPort": 4101,
            "allowedAPI": ["nsrvm"],
            "maxChilds": 3,
            "runBeforeStart": [{"app": "true", "waitForClose": true}],
            "waitBeforeStart": 250
        }"#;
        let cfg: ServiceConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.api_port, 4101);
        assert_eq!(cfg.max_childs, 3);
        assert!(cfg.run_before_start[0].wait_for_close);
        assert_eq!(cfg.wait_before_start, 250);
    }

    #[test]
    fn max_childs_defaults_to_zero() {
        let cfg: ServiceConfig = serde_json::from_str(r#"{"apiPort": 1}"#).unwrap();
        assert_eq!(cfg.max_childs, 0);
        assert!(cfg.allowed_api.is_empty());
    }

    #[test]
    fn normalize_copies_key_into_name() {
        let mut snap: ConfigSnapshot =
            serde_json::from_str(r#"{"services": {"a": {"apiPort": 1}}}"#).unwrap();
        snap.normalize();
        assert_eq!(snap.services["a"].name, "a");
    }
}
