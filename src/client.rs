//! # Service-side client: the mirror half of the message broker.
//!
//! A child service links this module and talks to its supervisor over the
//! stdio channel it was spawned with:
//!
//! ```text
//! request("getConfig") ─► stamp _reqId ─► stdout ─► supervisor
//! stdin ─► reply {_reqId} ─► pending table ─► resolve request
//!       ─► "SIGINT"        ─► interrupt token
//!       ─► anything else   ─► notification stream
//! ```
//!
//! ## Rules
//! - Request ids are strictly increasing in `[1, 2^32-1]`, wrapping to 1.
//! - Every request resolves exactly once: with the reply body, or with
//!   `None` when the reply timeout (default 10 s) expires. A reply landing
//!   after the timeout finds no pending slot and is dropped.
//! - The `"SIGINT"` sentinel and a real `SIGINT` are indistinguishable to
//!   service code: both fire [`ServiceClient::wait_for_interrupt`].
//! - Service logging belongs on stderr; stdout is the wire.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ServiceConfig;
use crate::proto::{
    encode_line, request_value, ParentMessage, PublicApiEntry, ReqIdCounter,
};

/// Default reply-correlation timeout.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// `getConfig` reply: the service's own config and api-key.
#[derive(Clone, Debug, Deserialize)]
pub struct OwnConfig {
    /// Applied configuration as the supervisor sees it.
    pub config: ServiceConfig,
    /// This service's api-key, hex-encoded.
    #[serde(rename = "apiKey")]
    pub api_key: String,
}

/// Client end of the supervisor channel, shared across service tasks.
pub struct ServiceClient {
    pending: DashMap<u32, oneshot::Sender<Value>>,
    counter: Mutex<ReqIdCounter>,
    out: mpsc::Sender<String>,
    interrupt: CancellationToken,
    reply_timeout: Duration,
}

impl ServiceClient {
    /// Connects over the process's stdio. Returns the shared client and
    /// the stream of unsolicited notifications.
    pub fn connect() -> (Arc<Self>, mpsc::UnboundedReceiver<Value>) {
        Self::attach(tokio::io::stdin(), tokio::io::stdout(), DEFAULT_REPLY_TIMEOUT)
    }

    /// Connects over arbitrary channel halves with a custom reply timeout.
    pub fn attach<R, W>(
        reader: R,
        writer: W,
        reply_timeout: Duration,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Value>)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (out_tx, mut out_rx) = mpsc::channel::<String>(64);
        let (notif_tx, notif_rx) = mpsc::unbounded_channel();

        let client = Arc::new(Self {
            pending: DashMap::new(),
            counter: Mutex::new(ReqIdCounter::new()),
            out: out_tx,
            interrupt: CancellationToken::new(),
            reply_timeout,
        });

        tokio::spawn(async move {
            let mut writer = writer;
            while let Some(line) = out_rx.recv().await {
                if writer.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if writer.flush().await.is_err() {
                    break;
                }
            }
        });

        let reader_client = Arc::clone(&client);
        tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let value: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(error = %e, "discarding malformed supervisor message");
                        continue;
                    }
                };
                match ParentMessage::from_value(value) {
                    ParentMessage::Interrupt => {
                        debug!("interrupt relayed by supervisor");
                        reader_client.interrupt.cancel();
                    }
                    ParentMessage::Reply { req_id, body } => {
                        match reader_client.pending.remove(&req_id) {
                            Some((_, tx)) => {
                                let _ = tx.send(body);
                            }
                            // Late reply after timeout: the slot is gone.
                            None => debug!(req_id, "dropping late reply"),
                        }
                    }
                    ParentMessage::Notification(value) => {
                        let _ = notif_tx.send(value);
                    }
                }
            }
        });

        (client, notif_rx)
    }

    /// Token cancelled on interrupt, from either the in-band sentinel or a
    /// real OS signal observed by [`Self::wait_for_interrupt`].
    pub fn interrupt_token(&self) -> CancellationToken {
        self.interrupt.clone()
    }

    /// Completes when the service should shut down: the supervisor's
    /// in-band `"SIGINT"`, or the local OS interrupt.
    pub async fn wait_for_interrupt(&self) {
        tokio::select! {
            _ = self.interrupt.cancelled() => {}
            _ = tokio::signal::ctrl_c() => {
                self.interrupt.cancel();
            }
        }
    }

    /// Sends one correlated request and awaits its reply.
    ///
    /// Resolves `None` on timeout or a closed channel; exactly one of
    /// reply delivery and timeout wins, never both.
    pub async fn request(&self, cmd: &str, extra: Map<String, Value>) -> Option<Value> {
        let req_id = self.next_id();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(req_id, tx);

        let line = encode_line(&request_value(cmd, req_id, extra));
        if self.out.send(line).await.is_err() {
            self.pending.remove(&req_id);
            return None;
        }

        match time::timeout(self.reply_timeout, rx).await {
            Ok(Ok(body)) => Some(body),
            Ok(Err(_)) => {
                self.pending.remove(&req_id);
                None
            }
            Err(_) => {
                self.pending.remove(&req_id);
                None
            }
        }
    }

    /// Fetches this service's own config and api-key.
    pub async fn get_config(&self) -> Option<OwnConfig> {
        let body = self.request("getConfig", Map::new()).await?;
        match serde_json::from_value(body) {
            Ok(own) => Some(own),
            Err(e) => {
                warn!(error = %e, "unexpected getConfig reply shape");
                None
            }
        }
    }

    /// Advertises this service's public-method list.
    pub async fn set_public_api(&self, api: &[PublicApiEntry]) -> Option<Value> {
        let mut extra = Map::new();
        extra.insert("api".to_string(), serde_json::to_value(api).ok()?);
        self.request("setPublicApi", extra).await
    }

    /// Registers or replaces this service's sub-services.
    pub async fn set_child_services(&self, childs: &[ServiceConfig]) -> Option<Value> {
        let mut extra = Map::new();
        extra.insert("childs".to_string(), serde_json::to_value(childs).ok()?);
        self.request("setChildServices", extra).await
    }

    /// Asks the supervisor to stop this service.
    pub async fn exit(&self) -> Option<Value> {
        self.request("exit", Map::new()).await
    }

    /// Issues a control-plane call; `service_name` for per-service methods.
    pub async fn api(&self, method: &str, service_name: Option<&str>) -> Option<Value> {
        let mut extra = Map::new();
        extra.insert("method".to_string(), Value::from(method));
        if let Some(name) = service_name {
            extra.insert("serviceName".to_string(), Value::from(name));
        }
        self.request("api", extra).await
    }

    /// Fetches a peer's api-key and port (requires the peer capability).
    pub async fn get_api_key(&self, service_name: &str) -> Option<Value> {
        self.api("getApiKey", Some(service_name)).await
    }

    fn next_id(&self) -> u32 {
        self.counter
            .lock()
            .expect("req-id counter poisoned")
            .next_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{reply_value, REQ_ID_FIELD};
    use serde_json::json;
    use tokio::io::{duplex, DuplexStream};

    struct FakeSupervisor {
        lines: tokio::io::Lines<BufReader<DuplexStream>>,
        writer: DuplexStream,
    }

    impl FakeSupervisor {
        async fn recv(&mut self) -> Value {
            let line = self.lines.next_line().await.unwrap().unwrap();
            serde_json::from_str(&line).unwrap()
        }

        async fn send(&mut self, value: Value) {
            self.writer
                .write_all(encode_line(&value).as_bytes())
                .await
                .unwrap();
        }
    }

    fn wire(timeout: Duration) -> (Arc<ServiceClient>, FakeSupervisor) {
        let (child_in, sup_out) = duplex(4096);
        let (sup_in, child_out) = duplex(4096);
        let (client, _notifs) = ServiceClient::attach(child_in, child_out, timeout);
        let sup = FakeSupervisor {
            lines: BufReader::new(sup_in).lines(),
            writer: sup_out,
        };
        (client, sup)
    }

    #[tokio::test]
    async fn request_ids_start_at_one_and_increase() {
        let (client, mut sup) = wire(Duration::from_secs(1));

        let pending = {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                let _ = client.request("getConfig", Map::new()).await;
                let _ = client.request("getConfig", Map::new()).await;
            })
        };

        let first = sup.recv().await;
        assert_eq!(first[REQ_ID_FIELD], 1);
        assert_eq!(first["cmd"], "getConfig");
        sup.send(reply_value(1, json!({}))).await;

        let second = sup.recv().await;
        assert_eq!(second[REQ_ID_FIELD], 2);
        sup.send(reply_value(2, json!({}))).await;
        pending.await.unwrap();
    }

    #[tokio::test]
    async fn reply_resolves_the_request() {
        let (client, mut sup) = wire(Duration::from_secs(1));

        let request = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.api("getServicesList", None).await })
        };

        let sent = sup.recv().await;
        let req_id = sent[REQ_ID_FIELD].as_u64().unwrap() as u32;
        sup.send(reply_value(req_id, json!({"services": []}))).await;

        let reply = request.await.unwrap().unwrap();
        assert_eq!(reply, json!({"services": []}));
    }

    #[tokio::test]
    async fn timeout_resolves_none_and_late_reply_is_dropped() {
        let (client, mut sup) = wire(Duration::from_millis(100));

        let reply = client.request("getConfig", Map::new()).await;
        assert!(reply.is_none(), "timeout must resolve to no result");
        assert!(client.pending.is_empty(), "timed-out slot must be cleared");

        // Late reply: nothing to resolve, nothing panics.
        let sent = sup.recv().await;
        let req_id = sent[REQ_ID_FIELD].as_u64().unwrap() as u32;
        sup.send(reply_value(req_id, json!({"late": true}))).await;
        time::sleep(Duration::from_millis(50)).await;
        assert!(client.pending.is_empty());
    }

    #[tokio::test]
    async fn sigint_sentinel_fires_the_interrupt_token() {
        let (client, mut sup) = wire(Duration::from_secs(1));
        let token = client.interrupt_token();
        assert!(!token.is_cancelled());

        sup.send(json!("SIGINT")).await;
        time::timeout(Duration::from_secs(1), token.cancelled())
            .await
            .expect("sentinel must cancel the interrupt token");
    }

    #[tokio::test]
    async fn unsolicited_messages_reach_the_notification_stream() {
        let (child_in, sup_out) = duplex(4096);
        let (_sup_in, child_out) = duplex(4096);
        let (_client, mut notifs) =
            ServiceClient::attach(child_in, child_out, Duration::from_secs(1));
        let mut sup_writer = sup_out;

        sup_writer
            .write_all(encode_line(&json!({"hello": "world"})).as_bytes())
            .await
            .unwrap();

        let note = time::timeout(Duration::from_secs(1), notifs.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(note, json!({"hello": "world"}));
    }

    #[tokio::test]
    async fn set_public_api_sends_the_list() {
        let (client, mut sup) = wire(Duration::from_secs(1));

        let request = {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                client
                    .set_public_api(&[PublicApiEntry {
                        name: "ping".to_string(),
                        description: "health".to_string(),
                    }])
                    .await
            })
        };

        let sent = sup.recv().await;
        assert_eq!(sent["cmd"], "setPublicApi");
        assert_eq!(sent["api"][0]["name"], "ping");
        let req_id = sent[REQ_ID_FIELD].as_u64().unwrap() as u32;
        sup.send(reply_value(req_id, json!({}))).await;
        assert_eq!(request.await.unwrap().unwrap(), json!({}));
    }
}
