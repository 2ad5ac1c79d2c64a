//! # Control-plane call model and public-API descriptor validation.
//!
//! An `api` message body is `{method: <string>, serviceName?: <string>, …}`.
//! The method set is closed; the router decides per method which capability
//! the caller needs.
//!
//! A service's advertised public API is a list of at most
//! [`MAX_API_ENTRIES`] descriptors, each exactly
//! `{name: <1-32 chars>, description: <0-128 chars>}`. The list is
//! validated on `setPublicApi` and echoed verbatim by `getServicesList`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ServiceError;

/// Maximum number of public-API descriptors a service may advertise.
pub const MAX_API_ENTRIES: usize = 16;

/// Maximum length of a descriptor name.
pub const MAX_NAME_LEN: usize = 32;

/// Maximum length of a descriptor description.
pub const MAX_DESCRIPTION_LEN: usize = 128;

/// Supervisor control-plane methods.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApiMethod {
    /// Fetch a peer's api-key and port (requires the peer capability).
    GetApiKey,
    /// Restart a named service (requires the supervisor capability).
    RestartService,
    /// Stop a named service (requires the supervisor capability).
    StopService,
    /// Start a named service (requires the supervisor capability).
    StartService,
    /// Stop everything and exit the supervisor (requires the supervisor
    /// capability; never replied to).
    RestartServer,
    /// List live services with status and advertised API (requires the
    /// supervisor capability).
    GetServicesList,
}

impl ApiMethod {
    /// Parses a wire method name; unknown names yield `None`.
    pub fn parse(method: &str) -> Option<Self> {
        match method {
            "getApiKey" => Some(ApiMethod::GetApiKey),
            "restartService" => Some(ApiMethod::RestartService),
            "stopService" => Some(ApiMethod::StopService),
            "startService" => Some(ApiMethod::StartService),
            "restartServer" => Some(ApiMethod::RestartServer),
            "getServicesList" => Some(ApiMethod::GetServicesList),
            _ => None,
        }
    }

    /// True when the method targets a named peer rather than the
    /// supervisor as a whole.
    pub fn takes_service_name(&self) -> bool {
        matches!(
            self,
            ApiMethod::GetApiKey
                | ApiMethod::RestartService
                | ApiMethod::StopService
                | ApiMethod::StartService
        )
    }
}

/// Decoded `api` message body.
#[derive(Debug)]
pub struct ApiCall {
    /// Wire method name as sent.
    pub method: Option<String>,
    /// Target service, when present.
    pub service_name: Option<String>,
}

impl ApiCall {
    /// Extracts the call fields from a message object.
    pub fn from_map(obj: &Map<String, Value>) -> Self {
        Self {
            method: obj.get("method").and_then(Value::as_str).map(String::from),
            service_name: obj
                .get("serviceName")
                .and_then(Value::as_str)
                .map(String::from),
        }
    }

    /// The parsed method, if it is one of the closed set.
    pub fn parsed_method(&self) -> Option<ApiMethod> {
        self.method.as_deref().and_then(ApiMethod::parse)
    }
}

/// One advertised public method of a service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PublicApiEntry {
    /// Method name, 1–32 characters.
    pub name: String,
    /// Human-readable description, up to 128 characters.
    pub description: String,
}

/// Validates a raw `setPublicApi` payload into a descriptor list.
///
/// Accepted iff the payload is a sequence of at most [`MAX_API_ENTRIES`]
/// objects, each with exactly the two fields `name` (1–32 chars) and
/// `description` (0–128 chars).
pub fn validate_public_api(value: &Value) -> Result<Vec<PublicApiEntry>, ServiceError> {
    let invalid = |reason: String| ServiceError::InvalidApiList { reason };

    let items = value
        .as_array()
        .ok_or_else(|| invalid("payload is not an array".to_string()))?;
    if items.len() > MAX_API_ENTRIES {
        return Err(invalid(format!(
            "{} entries exceeds the maximum of {MAX_API_ENTRIES}",
            items.len()
        )));
    }

    let mut entries = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let obj = item
            .as_object()
            .ok_or_else(|| invalid(format!("entry {i} is not an object")))?;
        if obj.len() != 2 || !obj.contains_key("name") || !obj.contains_key("description") {
            return Err(invalid(format!(
                "entry {i} must have exactly 'name' and 'description'"
            )));
        }
        let name = obj
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid(format!("entry {i}: 'name' is not a string")))?;
        let description = obj
            .get("description")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid(format!("entry {i}: 'description' is not a string")))?;
        if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
            return Err(invalid(format!("entry {i}: name length out of 1..={MAX_NAME_LEN}")));
        }
        if description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(invalid(format!(
                "entry {i}: description longer than {MAX_DESCRIPTION_LEN}"
            )));
        }
        entries.push(PublicApiEntry {
            name: name.to_string(),
            description: description.to_string(),
        });
    }
    Ok(entries)
}
