//! Wire protocol: message framing, correlation ids, and the control-plane
//! call model.
//!
//! ## Contents
//! - [`ChildRequest`], [`ChildCommand`], [`ParentMessage`] the message sum types
//! - [`ReqIdCounter`] correlation ids in `[1, 2^32-1]`, wrapping to 1
//! - [`ApiCall`], [`ApiMethod`] the `api` sub-protocol
//! - [`PublicApiEntry`], [`validate_public_api`] advertised-API validation
//! - [`SIGINT_SENTINEL`] the Windows interrupt relay token

mod api;
mod message;

pub use api::{
    validate_public_api, ApiCall, ApiMethod, PublicApiEntry, MAX_API_ENTRIES,
    MAX_DESCRIPTION_LEN, MAX_NAME_LEN,
};
pub use message::{
    encode_line, reply_value, request_value, ChildCommand, ChildRequest, ParentMessage,
    ReqIdCounter, REQ_ID_FIELD, REQ_ID_MAX, SIGINT_SENTINEL,
};
