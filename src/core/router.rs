//! # Control-plane router.
//!
//! Dispatches `api` calls after a capability check against the caller's
//! `allowedAPI`:
//!
//! | method            | requires                     |
//! |-------------------|------------------------------|
//! | `getApiKey`       | target name in `allowedAPI`  |
//! | `restartService`  | `"nsrvm"`                    |
//! | `stopService`     | `"nsrvm"`                    |
//! | `startService`    | `"nsrvm"`                    |
//! | `restartServer`   | `"nsrvm"`                    |
//! | `getServicesList` | `"nsrvm"`                    |
//!
//! Denials are logged and produce **no reply**: to the caller a denied
//! method is indistinguishable from an unreachable service, and its
//! request resolves on timeout.

use serde_json::{json, Value};
use tracing::{info, warn};

use crate::events::{Event, EventKind};
use crate::proto::{ApiCall, ApiMethod};

use super::supervisor::Kernel;

/// Result of routing one `api` call.
pub(crate) enum ApiOutcome {
    /// Serve this body back to the caller.
    Reply(Value),
    /// Denied or unroutable: send nothing, the caller times out.
    Silent,
    /// `restartServer`: stop everything and exit; never replied to.
    Shutdown,
}

impl Kernel {
    /// Routes one control-plane call from `caller`.
    pub(crate) async fn handle_api(&mut self, caller: &str, call: ApiCall) -> ApiOutcome {
        let Some(method) = call.parsed_method() else {
            warn!(caller, method = ?call.method, "unknown api method");
            return ApiOutcome::Silent;
        };

        if !self.authorize(caller, method, call.service_name.as_deref()) {
            warn!(caller, method = ?call.method, target = ?call.service_name, "api call denied");
            self.bus.publish(
                Event::now(EventKind::ApiDenied)
                    .with_service(caller)
                    .with_method(call.method.clone().unwrap_or_default()),
            );
            return ApiOutcome::Silent;
        }

        self.bus.publish(
            Event::now(EventKind::ApiServed)
                .with_service(caller)
                .with_method(call.method.clone().unwrap_or_default()),
        );

        match method {
            ApiMethod::GetApiKey => {
                // authorize() guarantees the target name is present.
                let target = call.service_name.as_deref().unwrap_or_default();
                ApiOutcome::Reply(self.api_key_reply(target))
            }
            ApiMethod::RestartService => {
                let target = call.service_name.unwrap_or_default();
                info!(caller, service = %target, "restart requested");
                self.stop_service(&target).await;
                self.start_service(&target).await;
                ApiOutcome::Reply(json!({"status": true}))
            }
            ApiMethod::StopService => {
                let target = call.service_name.unwrap_or_default();
                info!(caller, service = %target, "stop requested");
                self.stop_service(&target).await;
                ApiOutcome::Reply(json!({"status": true}))
            }
            ApiMethod::StartService => {
                let target = call.service_name.unwrap_or_default();
                info!(caller, service = %target, "start requested");
                self.start_service(&target).await;
                ApiOutcome::Reply(json!({"status": true}))
            }
            ApiMethod::RestartServer => {
                info!(caller, "server restart requested");
                ApiOutcome::Shutdown
            }
            ApiMethod::GetServicesList => ApiOutcome::Reply(self.services_list_reply()),
        }
    }

    /// Capability check: per-service targets need the target's name in the
    /// caller's `allowedAPI`; supervisor-wide methods need `"nsrvm"`.
    fn authorize(&self, caller: &str, method: ApiMethod, target: Option<&str>) -> bool {
        let Some(handle) = self.state.services.get(caller) else {
            return false;
        };
        match method {
            ApiMethod::GetApiKey => match target {
                Some(target) => handle.config.allows_peer(target),
                None => false,
            },
            ApiMethod::RestartService
            | ApiMethod::StopService
            | ApiMethod::StartService
            | ApiMethod::RestartServer
            | ApiMethod::GetServicesList => handle.config.has_supervisor_capability(),
        }
    }

    /// Builds the `getApiKey` reply. An unknown target yields the masked
    /// form with a null port and an empty key.
    fn api_key_reply(&mut self, target: &str) -> Value {
        match self.state.config.services.get(target) {
            Some(cfg) => {
                let api_port = cfg.api_port;
                let api_key = self.state.keys.ensure(target).to_string();
                json!({
                    "serviceName": target,
                    "apiPort": api_port,
                    "apiKey": api_key,
                })
            }
            None => json!({
                "serviceName": target,
                "apiPort": Value::Null,
                "apiKey": "",
            }),
        }
    }

    /// Builds the `getServicesList` reply from the live handles, sorted by
    /// name for stable output.
    fn services_list_reply(&self) -> Value {
        let mut names: Vec<&String> = self.state.services.keys().collect();
        names.sort_unstable();
        let services: Vec<Value> = names
            .into_iter()
            .map(|name| {
                let handle = &self.state.services[name];
                json!({
                    "serviceName": name,
                    "api": handle.api,
                    "status": handle.is_running(),
                })
            })
            .collect();
        json!({ "services": services })
    }
}
