//! Request-facing layer of the coffer vault.
//!
//! The routing layer owns the wire protocol; this crate owns the access
//! decision, body decoding and error classification for every capability.

pub mod api;
pub mod gate;

pub use api::{
    ApiError, ApiErrorKind, ApiResponse, ApiResult, DeletedStore, ErrorBody, ExportSummary,
    RecordBuffer, VaultApi,
};
pub use gate::{
    AccessDenied, AccessGate, AccessScope, BearerTokenGate, OpenGate, Principal, RequestContext,
};
