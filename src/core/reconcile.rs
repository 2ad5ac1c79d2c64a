//! # Reconciliation: converge live services to the desired snapshot.
//!
//! Runs on startup, on every config reload, after sub-service
//! registration, and after each control-plane start/stop/restart.
//!
//! ```text
//! desired snapshot ──► 1. stop phase     names gone or apiPort changed
//!                      2. refresh phase  overwrite configs, mint keys
//!                      3. start phase    launch everything not live
//! ```
//!
//! ## Rules
//! - A service with an unchanged `(name, apiPort)` pair is never restarted
//!   by a reconciliation pass; its config is refreshed in place.
//! - Stops and starts are awaited in parallel within their phase.
//! - A start that fails (missing module, spawn error) leaves the desired
//!   entry untouched; the next pass retries.
//! - Sub-service contention (a name claimed by a different parent) is
//!   rejected without mutating any state.

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{ConfigSnapshot, ServiceConfig};
use crate::events::{Event, EventKind};

use super::handle::ServiceHandle;
use super::lifecycle::launch;
use super::supervisor::Kernel;

impl Kernel {
    /// Installs a new desired snapshot and reconciles against it.
    pub(crate) async fn apply_snapshot(&mut self, snapshot: ConfigSnapshot) {
        info!(services = snapshot.services.len(), "applying desired snapshot");
        self.state.config = snapshot;
        self.reattach_child_services();
        self.bus.publish(Event::now(EventKind::ConfigLoaded));
        self.reconcile().await;
    }

    /// Re-attaches registered sub-services to a freshly loaded snapshot,
    /// so a file reload does not orphan them. A parent that is no longer
    /// desired takes its registrations with it; a name the new snapshot
    /// claims for itself wins over the old registration.
    fn reattach_child_services(&mut self) {
        let parents: Vec<String> = self.state.childs.keys().cloned().collect();
        for parent in parents {
            if !self.state.config.services.contains_key(&parent) {
                debug!(parent = %parent, "dropping sub-services of removed parent");
                self.state.childs.remove(&parent);
                continue;
            }
            let kids = self.state.childs.get(&parent).cloned().unwrap_or_default();
            let mut kept = Vec::with_capacity(kids.len());
            for kid in kids {
                if let Some(existing) = self.state.config.services.get(&kid.name) {
                    if existing.parent.as_deref() != Some(parent.as_str()) {
                        warn!(
                            parent = %parent,
                            child = %kid.name,
                            "sub-service name taken by the new snapshot"
                        );
                        continue;
                    }
                }
                self.state
                    .config
                    .services
                    .insert(kid.name.clone(), kid.clone());
                self.grant_capability(&parent, &kid.name);
                kept.push(kid);
            }
            self.state.childs.insert(parent, kept);
        }
    }

    /// One full reconciliation pass: stop, refresh, start.
    pub(crate) async fn reconcile(&mut self) {
        // 1. Stop phase.
        let stops = plan_stops(&self.state.services, &self.state.config.services);
        if !stops.is_empty() {
            debug!(?stops, "reconcile stop phase");
            self.stop_many(&stops).await;
        }

        // 2. Config-refresh phase: overwrite applied configs in place and
        // mint keys for newly-observed names.
        let desired: Vec<(String, ServiceConfig)> = self
            .state
            .config
            .services
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (name, cfg) in &desired {
            if let Some(handle) = self.state.services.get_mut(name) {
                handle.config = cfg.clone();
            }
            self.state.keys.ensure(name);
        }

        // 3. Start phase: everything desired without a live non-dead handle.
        let mut launches = Vec::new();
        for (name, cfg) in desired {
            if self.state.is_live(&name) {
                continue;
            }
            let generation = self.next_generation();
            let services_dir = self.options.services_dir.clone();
            let tx = self.tx.clone();
            let bus = self.bus.clone();
            launches.push(async move {
                launch(cfg, generation, &services_dir, tx, bus).await
            });
        }
        for result in futures::future::join_all(launches).await {
            match result {
                Ok(launched) => self.adopt(launched),
                Err(e) => {
                    warn!(error = %e, label = e.as_label(), "reconcile start failed");
                    self.bus
                        .publish(Event::now(EventKind::SpawnFailed).with_error(e.to_string()));
                }
            }
        }
    }

    /// Handles `setChildServices` from `parent` with the raw payload.
    ///
    /// Over-limit batches and unparsable payloads change nothing. For a
    /// valid batch: sub-services no longer listed are withdrawn from the
    /// desired set, new ones are adopted under the parent (contended names
    /// skipped), the parent's `allowedAPI` tracks its children, and a full
    /// reconciliation converges the processes.
    pub(crate) async fn set_child_services(&mut self, parent: &str, raw: Value) {
        let mut incoming: Vec<ServiceConfig> = match serde_json::from_value(raw) {
            Ok(list) => list,
            Err(e) => {
                warn!(parent, error = %e, "unparsable child-service list");
                return;
            }
        };

        let Some(parent_handle) = self.state.services.get(parent) else {
            warn!(parent, "child registration from unknown service");
            return;
        };
        let max_childs = parent_handle.config.max_childs as usize;
        if incoming.len() > max_childs {
            warn!(
                parent,
                requested = incoming.len(),
                max_childs,
                "child-service list exceeds maxChilds"
            );
            self.bus.publish(
                Event::now(EventKind::ChildRejected)
                    .with_service(parent)
                    .with_error("max_childs_exceeded"),
            );
            return;
        }

        // Withdraw children that are no longer listed.
        let previous = self.state.childs.remove(parent).unwrap_or_default();
        for old in &previous {
            if !incoming.iter().any(|c| c.name == old.name) {
                debug!(parent, child = %old.name, "withdrawing sub-service");
                self.state.config.services.remove(&old.name);
                self.strip_capability(parent, &old.name);
            }
        }

        // Adopt the new list, skipping contended names.
        let mut accepted = Vec::with_capacity(incoming.len());
        for child in incoming.drain(..) {
            if child.name.is_empty() {
                warn!(parent, "sub-service without a name skipped");
                continue;
            }
            if let Some(existing) = self.state.config.services.get(&child.name) {
                if existing.parent.as_deref() != Some(parent) {
                    warn!(
                        parent,
                        child = %child.name,
                        claimed_by = ?existing.parent,
                        "sub-service name already claimed"
                    );
                    self.bus.publish(
                        Event::now(EventKind::ChildRejected)
                            .with_service(child.name.clone())
                            .with_error("parent_mismatch"),
                    );
                    continue;
                }
            }
            let mut child = child;
            child.parent = Some(parent.to_string());
            self.state
                .config
                .services
                .insert(child.name.clone(), child.clone());
            self.grant_capability(parent, &child.name);
            self.bus.publish(
                Event::now(EventKind::ChildAdopted).with_service(child.name.clone()),
            );
            accepted.push(child);
        }
        self.state.childs.insert(parent.to_string(), accepted);

        self.reconcile().await;
    }

    /// Ensures `peer` is in the parent's `allowedAPI`, on both the live
    /// handle and the desired entry.
    fn grant_capability(&mut self, parent: &str, peer: &str) {
        if let Some(handle) = self.state.services.get_mut(parent) {
            if !handle.config.allows_peer(peer) {
                handle.config.allowed_api.push(peer.to_string());
            }
        }
        if let Some(cfg) = self.state.config.services.get_mut(parent) {
            if !cfg.allows_peer(peer) {
                cfg.allowed_api.push(peer.to_string());
            }
        }
    }

    /// Removes `peer` from the parent's `allowedAPI`, both views.
    fn strip_capability(&mut self, parent: &str, peer: &str) {
        if let Some(handle) = self.state.services.get_mut(parent) {
            handle.config.allowed_api.retain(|p| p != peer);
        }
        if let Some(cfg) = self.state.config.services.get_mut(parent) {
            cfg.allowed_api.retain(|p| p != peer);
        }
    }

    /// Full shutdown: clear the desired state and stop every live handle
    /// in parallel. The caller exits the process afterwards; the external
    /// restart command is the host's business, never ours.
    pub(crate) async fn shutdown_all(&mut self) {
        self.bus.publish(Event::now(EventKind::ShutdownRequested));
        info!("stopping all services");
        let names: Vec<String> = self.state.services.keys().cloned().collect();
        self.state.config = ConfigSnapshot::empty();
        self.stop_many(&names).await;
    }
}

/// Names whose handles must stop: gone from the desired map, or present
/// with a different `apiPort`.
fn plan_stops(
    services: &std::collections::HashMap<String, ServiceHandle>,
    desired: &std::collections::HashMap<String, ServiceConfig>,
) -> Vec<String> {
    services
        .iter()
        .filter(|(name, handle)| match desired.get(*name) {
            Some(cfg) => cfg.api_port != handle.config.api_port,
            None => true,
        })
        .map(|(name, _)| name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::handle::testutil::{running_handle, service_config};
    use crate::core::testutil::test_kernel;
    use serde_json::json;
    use tempfile::TempDir;

    fn desired(kernel: &mut Kernel, name: &str, api_port: u16) {
        kernel
            .state
            .config
            .services
            .insert(name.to_string(), service_config(name, api_port));
    }

    fn live(kernel: &mut Kernel, name: &str, api_port: u16) {
        let generation = kernel.next_generation();
        let (handle, rx) = running_handle(service_config(name, api_port), generation);
        std::mem::forget(rx);
        kernel.state.services.insert(name.to_string(), handle);
    }

    #[tokio::test]
    async fn unchanged_service_is_not_stopped() {
        let dir = TempDir::new().unwrap();
        let (mut kernel, _rx) = test_kernel(&dir);
        desired(&mut kernel, "a", 1);
        live(&mut kernel, "a", 1);
        let generation_before = kernel.state.services["a"].generation;

        kernel.reconcile().await;

        let handle = &kernel.state.services["a"];
        assert!(handle.is_running());
        assert_eq!(handle.generation, generation_before, "no restart");
    }

    #[tokio::test]
    async fn removed_service_is_stopped() {
        let dir = TempDir::new().unwrap();
        let (mut kernel, _rx) = test_kernel(&dir);
        live(&mut kernel, "a", 1);

        kernel.reconcile().await;
        assert!(!kernel.state.services.contains_key("a"));
    }

    #[tokio::test]
    async fn port_change_stops_the_old_process() {
        let dir = TempDir::new().unwrap();
        let (mut kernel, _rx) = test_kernel(&dir);
        desired(&mut kernel, "a", 2);
        live(&mut kernel, "a", 1);

        kernel.reconcile().await;
        // No module on disk: the restart attempt fails, but the old
        // handle must be gone and its key must survive.
        assert!(!kernel.state.services.contains_key("a"));
        assert!(kernel.state.keys.get("a").is_some());
    }

    #[tokio::test]
    async fn keys_are_minted_and_stable_across_passes() {
        let dir = TempDir::new().unwrap();
        let (mut kernel, _rx) = test_kernel(&dir);
        desired(&mut kernel, "a", 1);

        kernel.reconcile().await;
        let first = kernel.state.keys.get("a").unwrap().to_string();

        kernel.reconcile().await;
        assert_eq!(kernel.state.keys.get("a").unwrap(), first);
    }

    #[tokio::test]
    async fn refresh_overwrites_live_config_in_place() {
        let dir = TempDir::new().unwrap();
        let (mut kernel, _rx) = test_kernel(&dir);
        live(&mut kernel, "a", 1);
        let mut cfg = service_config("a", 1);
        cfg.max_childs = 7;
        kernel.state.config.services.insert("a".to_string(), cfg);

        kernel.reconcile().await;
        assert_eq!(kernel.state.services["a"].config.max_childs, 7);
    }

    #[tokio::test]
    async fn child_list_over_max_childs_changes_nothing() {
        let dir = TempDir::new().unwrap();
        let (mut kernel, _rx) = test_kernel(&dir);
        let mut cfg = service_config("p", 1);
        cfg.max_childs = 1;
        let generation = kernel.next_generation();
        let (handle, _child_rx) = running_handle(cfg.clone(), generation);
        kernel.state.services.insert("p".to_string(), handle);
        kernel.state.config.services.insert("p".to_string(), cfg);

        let list = json!([
            {"name": "c1", "apiPort": 10},
            {"name": "c2", "apiPort": 11}
        ]);
        kernel.set_child_services("p", list).await;

        assert!(kernel.state.childs.get("p").is_none());
        assert!(!kernel.state.config.services.contains_key("c1"));
        assert!(!kernel.state.config.services.contains_key("c2"));
    }

    #[tokio::test]
    async fn children_are_adopted_with_parent_and_capability() {
        let dir = TempDir::new().unwrap();
        let (mut kernel, _rx) = test_kernel(&dir);
        let mut cfg = service_config("p", 1);
        cfg.max_childs = 2;
        let generation = kernel.next_generation();
        let (handle, _child_rx) = running_handle(cfg.clone(), generation);
        kernel.state.services.insert("p".to_string(), handle);
        kernel.state.config.services.insert("p".to_string(), cfg);

        let list = json!([{"name": "c1", "apiPort": 10}]);
        kernel.set_child_services("p", list).await;

        let adopted = &kernel.state.config.services["c1"];
        assert_eq!(adopted.parent.as_deref(), Some("p"));
        assert!(kernel.state.services["p"].config.allows_peer("c1"));
        assert!(kernel.state.config.services["p"].allows_peer("c1"));
        assert_eq!(kernel.state.childs["p"].len(), 1);
    }

    #[tokio::test]
    async fn contended_name_is_skipped_without_state_change() {
        let dir = TempDir::new().unwrap();
        let (mut kernel, _rx) = test_kernel(&dir);
        for parent in ["p", "q"] {
            let mut cfg = service_config(parent, 1);
            cfg.max_childs = 1;
            let generation = kernel.next_generation();
            let (handle, rx) = running_handle(cfg.clone(), generation);
            std::mem::forget(rx);
            kernel.state.services.insert(parent.to_string(), handle);
            kernel.state.config.services.insert(parent.to_string(), cfg);
        }

        kernel
            .set_child_services("p", json!([{"name": "c", "apiPort": 10}]))
            .await;
        assert_eq!(
            kernel.state.config.services["c"].parent.as_deref(),
            Some("p")
        );

        // Second parent claims the same name: rejected, first claim intact.
        kernel
            .set_child_services("q", json!([{"name": "c", "apiPort": 99}]))
            .await;
        let cfg = &kernel.state.config.services["c"];
        assert_eq!(cfg.parent.as_deref(), Some("p"));
        assert_eq!(cfg.api_port, 10);
        assert!(!kernel.state.services["q"].config.allows_peer("c"));
    }

    #[tokio::test]
    async fn withdrawn_children_lose_desired_entry_and_capability() {
        let dir = TempDir::new().unwrap();
        let (mut kernel, _rx) = test_kernel(&dir);
        let mut cfg = service_config("p", 1);
        cfg.max_childs = 2;
        let generation = kernel.next_generation();
        let (handle, _child_rx) = running_handle(cfg.clone(), generation);
        kernel.state.services.insert("p".to_string(), handle);
        kernel.state.config.services.insert("p".to_string(), cfg);

        kernel
            .set_child_services(
                "p",
                json!([{"name": "c1", "apiPort": 10}, {"name": "c2", "apiPort": 11}]),
            )
            .await;
        kernel
            .set_child_services("p", json!([{"name": "c2", "apiPort": 11}]))
            .await;

        assert!(!kernel.state.config.services.contains_key("c1"));
        assert!(!kernel.state.services["p"].config.allows_peer("c1"));
        assert!(kernel.state.services["p"].config.allows_peer("c2"));
        assert_eq!(kernel.state.childs["p"].len(), 1);
    }

    #[tokio::test]
    async fn reload_reattaches_children_of_surviving_parents() {
        let dir = TempDir::new().unwrap();
        let (mut kernel, _rx) = test_kernel(&dir);
        let mut cfg = service_config("p", 1);
        cfg.max_childs = 1;
        let generation = kernel.next_generation();
        let (handle, _child_rx) = running_handle(cfg.clone(), generation);
        kernel.state.services.insert("p".to_string(), handle);
        kernel.state.config.services.insert("p".to_string(), cfg);

        kernel
            .set_child_services("p", json!([{"name": "c", "apiPort": 10}]))
            .await;

        // Reload the file: the snapshot only knows about the parent.
        let mut snapshot = ConfigSnapshot::empty();
        snapshot
            .services
            .insert("p".to_string(), service_config("p", 1));
        kernel.apply_snapshot(snapshot).await;

        let adopted = &kernel.state.config.services["c"];
        assert_eq!(adopted.parent.as_deref(), Some("p"));
        assert!(kernel.state.config.services["p"].allows_peer("c"));
    }

    #[tokio::test]
    async fn reload_drops_children_of_removed_parents() {
        let dir = TempDir::new().unwrap();
        let (mut kernel, _rx) = test_kernel(&dir);
        let mut cfg = service_config("p", 1);
        cfg.max_childs = 1;
        let generation = kernel.next_generation();
        let (handle, _child_rx) = running_handle(cfg.clone(), generation);
        kernel.state.services.insert("p".to_string(), handle);
        kernel.state.config.services.insert("p".to_string(), cfg);

        kernel
            .set_child_services("p", json!([{"name": "c", "apiPort": 10}]))
            .await;

        kernel.apply_snapshot(ConfigSnapshot::empty()).await;
        assert!(!kernel.state.config.services.contains_key("c"));
        assert!(kernel.state.childs.get("p").is_none());
    }

    #[tokio::test]
    async fn shutdown_clears_services_and_config() {
        let dir = TempDir::new().unwrap();
        let (mut kernel, _rx) = test_kernel(&dir);
        desired(&mut kernel, "a", 1);
        live(&mut kernel, "a", 1);

        kernel.shutdown_all().await;
        assert!(kernel.state.services.is_empty());
        assert!(kernel.state.config.services.is_empty());
    }

    #[test]
    fn plan_stops_picks_removed_and_changed_ports() {
        let mut services = std::collections::HashMap::new();
        for (name, port) in [("keep", 1), ("gone", 2), ("moved", 3)] {
            let (handle, rx) = running_handle(service_config(name, port), 1);
            std::mem::forget(rx);
            services.insert(name.to_string(), handle);
        }
        let mut desired = std::collections::HashMap::new();
        desired.insert("keep".to_string(), service_config("keep", 1));
        desired.insert("moved".to_string(), service_config("moved", 9));

        let mut stops = plan_stops(&services, &desired);
        stops.sort();
        assert_eq!(stops, vec!["gone".to_string(), "moved".to_string()]);
    }
}
