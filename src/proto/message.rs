//! # Wire messages between supervisor and child services.
//!
//! Every message is one JSON value per line. Child→parent requests are
//! objects carrying a `cmd` string and, for correlated requests, an integer
//! `_reqId`. Parent→child traffic is correlated replies (objects echoing
//! `_reqId`) plus a single reserved sentinel: the bare JSON string
//! `"SIGINT"`, the Windows interrupt relay.
//!
//! Commands are a closed sum: unknown `cmd` values parse into
//! [`ChildCommand::Unknown`] so the dispatcher can still acknowledge the
//! correlation id instead of dropping it.

use serde_json::{Map, Value};

use crate::error::ServiceError;

use super::api::ApiCall;

/// Reserved parent→child token standing in for a POSIX `SIGINT`.
pub const SIGINT_SENTINEL: &str = "SIGINT";

/// Field carrying the correlation id on requests and replies.
pub const REQ_ID_FIELD: &str = "_reqId";

/// Largest usable request id; the next id after it is 1 again.
pub const REQ_ID_MAX: u32 = u32::MAX;

/// Correlation-id counter: starts at 1, strictly increasing, wraps to 1
/// after [`REQ_ID_MAX`]. Id 0 is never produced.
#[derive(Debug)]
pub struct ReqIdCounter {
    next: u32,
}

impl ReqIdCounter {
    /// Creates a counter whose first id is 1.
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Returns the next id and advances, wrapping past [`REQ_ID_MAX`].
    pub fn next_id(&mut self) -> u32 {
        let id = self.next;
        self.next = if id == REQ_ID_MAX { 1 } else { id + 1 };
        id
    }
}

impl Default for ReqIdCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// A child→parent message: optional correlation id plus the command.
///
/// Messages without a recognised `_reqId` are unsolicited notifications;
/// the dispatcher handles them but sends no reply.
#[derive(Debug)]
pub struct ChildRequest {
    /// Correlation id to echo in the reply, if any.
    pub req_id: Option<u32>,
    /// The decoded command.
    pub cmd: ChildCommand,
}

/// Closed sum of child→parent commands.
#[derive(Debug)]
pub enum ChildCommand {
    /// Ask for own config and api-key.
    GetConfig,
    /// Control-plane call, dispatched by the router.
    Api(ApiCall),
    /// Advertise the public-method list (raw payload, validated on receipt).
    SetPublicApi(Value),
    /// Ask the supervisor to stop this service.
    Exit,
    /// Register or replace this service's sub-services (raw payload).
    SetChildServices(Value),
    /// Anything else: logged and acknowledged with an empty reply.
    Unknown(String),
}

impl ChildRequest {
    /// Decodes one wire value. Only a non-object is a protocol fault; any
    /// object yields a request (possibly `Unknown`).
    pub fn from_value(value: Value) -> Result<Self, ServiceError> {
        let obj = match value {
            Value::Object(obj) => obj,
            other => {
                return Err(ServiceError::Protocol {
                    reason: format!("message is not an object: {other}"),
                })
            }
        };

        let req_id = obj
            .get(REQ_ID_FIELD)
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
            .filter(|n| *n >= 1);

        let cmd_name = obj.get("cmd").and_then(Value::as_str).unwrap_or("");
        let cmd = match cmd_name {
            "getConfig" => ChildCommand::GetConfig,
            "api" => ChildCommand::Api(ApiCall::from_map(&obj)),
            "setPublicApi" => {
                ChildCommand::SetPublicApi(obj.get("api").cloned().unwrap_or(Value::Null))
            }
            "exit" => ChildCommand::Exit,
            "setChildServices" => {
                ChildCommand::SetChildServices(obj.get("childs").cloned().unwrap_or(Value::Null))
            }
            other => ChildCommand::Unknown(other.to_string()),
        };

        Ok(Self { req_id, cmd })
    }
}

/// A parent→child message as seen by the service-side client.
#[derive(Debug)]
pub enum ParentMessage {
    /// The `"SIGINT"` sentinel: translate to a local interrupt.
    Interrupt,
    /// Correlated reply for a pending request.
    Reply {
        /// Echoed correlation id.
        req_id: u32,
        /// Reply body with the id stripped.
        body: Value,
    },
    /// Anything else: delivered to the generic handler.
    Notification(Value),
}

impl ParentMessage {
    /// Classifies one decoded wire value.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::String(s) if s == SIGINT_SENTINEL => ParentMessage::Interrupt,
            Value::Object(mut obj) => {
                let req_id = obj
                    .get(REQ_ID_FIELD)
                    .and_then(Value::as_u64)
                    .and_then(|n| u32::try_from(n).ok())
                    .filter(|n| *n >= 1);
                match req_id {
                    Some(req_id) => {
                        obj.remove(REQ_ID_FIELD);
                        ParentMessage::Reply {
                            req_id,
                            body: Value::Object(obj),
                        }
                    }
                    None => ParentMessage::Notification(Value::Object(obj)),
                }
            }
            other => ParentMessage::Notification(other),
        }
    }
}

/// Builds a reply object echoing `req_id` over `body`.
///
/// A non-object body is wrapped under `"result"` so the id always has an
/// object to ride on.
pub fn reply_value(req_id: u32, body: Value) -> Value {
    let mut obj = match body {
        Value::Object(obj) => obj,
        other => {
            let mut m = Map::new();
            m.insert("result".to_string(), other);
            m
        }
    };
    obj.insert(REQ_ID_FIELD.to_string(), Value::from(req_id));
    Value::Object(obj)
}

/// Builds a request object: `cmd`, `_reqId`, and extra fields.
pub fn request_value(cmd: &str, req_id: u32, extra: Map<String, Value>) -> Value {
    let mut obj = extra;
    obj.insert("cmd".to_string(), Value::from(cmd));
    obj.insert(REQ_ID_FIELD.to_string(), Value::from(req_id));
    Value::Object(obj)
}

/// Serializes a wire value to its line form (newline-terminated).
pub fn encode_line(value: &Value) -> String {
    let mut line = value.to_string();
    line.push('\n');
    line
}
