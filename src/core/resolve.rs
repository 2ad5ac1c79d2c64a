//! # Module-path resolution.
//!
//! Given `name = modulePath ?? serviceName`, the probe order is:
//! 1. `<servicesDir>/<name>` as a directory: `index.mjs`, then `index.js`
//! 2. `<servicesDir>/<name>` as a regular file: the file itself
//! 3. `<servicesDir>/<name>.mjs`, then `<servicesDir>/<name>.js`
//!
//! First match wins. A directory without an index file resolves to
//! nothing: the start is skipped and the next reconciliation retries.

use std::path::{Path, PathBuf};

use crate::config::ServiceConfig;

/// Resolves the module to spawn for `cfg`, or `None` when no probe matched.
pub fn resolve_module(services_dir: &Path, cfg: &ServiceConfig) -> Option<PathBuf> {
    let name = cfg.module_path.as_deref().unwrap_or(&cfg.name);
    let base = services_dir.join(name);

    if base.is_dir() {
        for index in ["index.mjs", "index.js"] {
            let candidate = base.join(index);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        return None;
    }
    if base.is_file() {
        return Some(base);
    }
    for ext in ["mjs", "js"] {
        let candidate = services_dir.join(format!("{name}.{ext}"));
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}
