//! Use-case API: one call per store/record/admin capability.
//!
//! # Responsibility
//! - Consult the access gate before any repository call.
//! - Decode JSON request bodies into typed specs and patches.
//! - Map core errors onto stable API error kinds and status codes.
//!
//! # Invariants
//! - A denied request never reaches the repository.
//! - No call panics; every failure is returned as `ApiError`.
//! - Record payloads are only returned by `get_record_buffer`.

use crate::gate::{AccessDenied, AccessGate, AccessScope, Principal, RequestContext};
use coffer_core::model::buffer;
use coffer_core::{
    NewRecord, NewStore, RecordHeader, RecordId, RecordPatch, RecordRepository, RepoError,
    SnapshotCoordinator, SnapshotError, Store, StoreId, StorePatch, StoreRepository,
    ValidationError,
};
use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::sync::Arc;

pub type ApiResult<T> = Result<T, ApiError>;

/// Stable error categories exposed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    Unauthorized,
    NotFound,
    Validation,
    Malformed,
    Storage,
}

impl ApiErrorKind {
    pub fn status_code(self) -> u16 {
        match self {
            Self::Unauthorized => 401,
            Self::NotFound => 404,
            Self::Validation => 400,
            Self::Malformed => 422,
            Self::Storage => 500,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::NotFound => "not_found",
            Self::Validation => "validation",
            Self::Malformed => "malformed",
            Self::Storage => "storage",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub message: String,
}

impl ApiError {
    fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> u16 {
        self.kind.status_code()
    }
}

impl Display for ApiError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

impl Error for ApiError {}

impl From<AccessDenied> for ApiError {
    fn from(value: AccessDenied) -> Self {
        Self::new(ApiErrorKind::Unauthorized, value.to_string())
    }
}

impl From<ValidationError> for ApiError {
    fn from(value: ValidationError) -> Self {
        Self::new(ApiErrorKind::Validation, value.to_string())
    }
}

impl From<RepoError> for ApiError {
    fn from(value: RepoError) -> Self {
        let kind = match &value {
            RepoError::NotFound(_) => ApiErrorKind::NotFound,
            RepoError::Validation(_) => ApiErrorKind::Validation,
            RepoError::Db(_) | RepoError::InvalidData(_) => ApiErrorKind::Storage,
        };
        Self::new(kind, value.to_string())
    }
}

impl From<SnapshotError> for ApiError {
    fn from(value: SnapshotError) -> Self {
        match value {
            SnapshotError::Repo(err) => err.into(),
            other if other.is_malformed() => Self::new(ApiErrorKind::Malformed, other.to_string()),
            other => Self::new(ApiErrorKind::Storage, other.to_string()),
        }
    }
}

/// Payload half of a record, returned separately from its header.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordBuffer {
    pub store_id: StoreId,
    pub record_id: RecordId,
    pub encryption: String,
    #[serde(with = "buffer")]
    pub buffer: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeletedStore {
    pub id: StoreId,
    pub records_removed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportSummary {
    pub output: String,
    pub stores: usize,
    pub records: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub kind: &'static str,
    pub message: String,
}

/// JSON envelope handed to the routing layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiResponse {
    pub ok: bool,
    pub status: u16,
    pub data: Option<Value>,
    pub error: Option<ErrorBody>,
}

impl ApiResponse {
    /// Wraps a call result with status 200 on success.
    pub fn from_result<T: Serialize>(result: ApiResult<T>) -> Self {
        Self::with_success_status(result, 200)
    }

    /// Same as `from_result` but answers 201 for successful creations.
    pub fn created<T: Serialize>(result: ApiResult<T>) -> Self {
        Self::with_success_status(result, 201)
    }

    fn with_success_status<T: Serialize>(result: ApiResult<T>, status: u16) -> Self {
        let encoded = result.and_then(|data| {
            serde_json::to_value(data).map_err(|err| {
                ApiError::new(ApiErrorKind::Storage, format!("failed to encode response: {err}"))
            })
        });
        match encoded {
            Ok(data) => Self {
                ok: true,
                status,
                data: Some(data),
                error: None,
            },
            Err(err) => Self {
                ok: false,
                status: err.status_code(),
                data: None,
                error: Some(ErrorBody {
                    kind: err.kind.as_str(),
                    message: err.message,
                }),
            },
        }
    }

    pub fn to_json(&self) -> Value {
        // Every field is plain data, so encoding cannot fail.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Capability API over a vault repository guarded by an access gate.
#[derive(Debug)]
pub struct VaultApi<R, G> {
    repo: Arc<R>,
    snapshots: SnapshotCoordinator<R>,
    gate: G,
}

impl<R, G> VaultApi<R, G>
where
    R: StoreRepository + RecordRepository,
    G: AccessGate,
{
    pub fn new(repo: Arc<R>, gate: G) -> Self {
        Self {
            snapshots: SnapshotCoordinator::new(Arc::clone(&repo)),
            repo,
            gate,
        }
    }

    pub fn list_stores(&self, context: &RequestContext) -> ApiResult<Vec<Store>> {
        self.authorize(context, AccessScope::Vault, "list_stores")?;
        Ok(self.repo.list_stores()?)
    }

    pub fn create_store(&self, context: &RequestContext, body: &Value) -> ApiResult<Store> {
        self.authorize(context, AccessScope::Vault, "create_store")?;
        let spec: NewStore = decode_body(body)?;
        let store = self.repo.create_store(&spec)?;
        info!(
            "event=store_create module=api status=ok store_id={}",
            store.id
        );
        Ok(store)
    }

    pub fn get_store(&self, context: &RequestContext, store_id: StoreId) -> ApiResult<Store> {
        self.authorize(context, AccessScope::Store(store_id), "get_store")?;
        Ok(self.repo.get_store(store_id)?)
    }

    pub fn update_store(
        &self,
        context: &RequestContext,
        store_id: StoreId,
        body: &Value,
    ) -> ApiResult<Store> {
        self.authorize(context, AccessScope::Store(store_id), "update_store")?;
        let patch: StorePatch = decode_body(body)?;
        Ok(self.repo.update_store(store_id, &patch)?)
    }

    pub fn delete_store(
        &self,
        context: &RequestContext,
        store_id: StoreId,
    ) -> ApiResult<DeletedStore> {
        self.authorize(context, AccessScope::Store(store_id), "delete_store")?;
        let records_removed = self.repo.delete_store(store_id)?;
        Ok(DeletedStore {
            id: store_id,
            records_removed,
        })
    }

    pub fn list_records(
        &self,
        context: &RequestContext,
        store_id: StoreId,
    ) -> ApiResult<Vec<RecordHeader>> {
        self.authorize(context, AccessScope::Store(store_id), "list_records")?;
        Ok(self.repo.list_records(store_id)?)
    }

    pub fn create_record(
        &self,
        context: &RequestContext,
        store_id: StoreId,
        body: &Value,
    ) -> ApiResult<RecordHeader> {
        self.authorize(context, AccessScope::Store(store_id), "create_record")?;
        let spec: NewRecord = decode_body(body)?;
        let record = self.repo.create_record(store_id, &spec)?;
        Ok(record.header)
    }

    /// Record header; the payload is only available through `get_record_buffer`.
    pub fn get_record(
        &self,
        context: &RequestContext,
        store_id: StoreId,
        record_id: RecordId,
    ) -> ApiResult<RecordHeader> {
        self.authorize(context, AccessScope::Store(store_id), "get_record")?;
        Ok(self.repo.get_record(store_id, record_id)?.header)
    }

    pub fn get_record_buffer(
        &self,
        context: &RequestContext,
        store_id: StoreId,
        record_id: RecordId,
    ) -> ApiResult<RecordBuffer> {
        self.authorize(context, AccessScope::Store(store_id), "get_record_buffer")?;
        let record = self.repo.get_record(store_id, record_id)?;
        Ok(RecordBuffer {
            store_id,
            record_id,
            encryption: record.header.encryption,
            buffer: record.buffer,
        })
    }

    pub fn update_record(
        &self,
        context: &RequestContext,
        store_id: StoreId,
        record_id: RecordId,
        body: &Value,
    ) -> ApiResult<RecordHeader> {
        self.authorize(context, AccessScope::Store(store_id), "update_record")?;
        let patch: RecordPatch = decode_body(body)?;
        Ok(self.repo.update_record(store_id, record_id, &patch)?.header)
    }

    pub fn delete_record(
        &self,
        context: &RequestContext,
        store_id: StoreId,
        record_id: RecordId,
    ) -> ApiResult<()> {
        self.authorize(context, AccessScope::Store(store_id), "delete_record")?;
        Ok(self.repo.delete_record(store_id, record_id)?)
    }

    /// Exports every store (`None`) or one store to `output`.
    pub fn export(
        &self,
        context: &RequestContext,
        store: Option<StoreId>,
        output: &Path,
    ) -> ApiResult<ExportSummary> {
        let scope = store.map_or(AccessScope::Vault, AccessScope::Store);
        self.authorize(context, scope, "export")?;
        let snapshot = self.snapshots.export_to_file(store, output)?;
        Ok(ExportSummary {
            output: output.display().to_string(),
            stores: snapshot.stores.len(),
            records: snapshot.record_count(),
        })
    }

    /// Imports a snapshot file atomically; returns the stores as persisted.
    pub fn import(&self, context: &RequestContext, input: &Path) -> ApiResult<Vec<Store>> {
        self.authorize(context, AccessScope::Vault, "import")?;
        Ok(self.snapshots.import_from_file(input)?)
    }

    fn authorize(
        &self,
        context: &RequestContext,
        scope: AccessScope,
        operation: &'static str,
    ) -> ApiResult<Principal> {
        self.gate.authorize(context, scope).map_err(|denied| {
            warn!(
                "event=authorize module=api status=denied op={} scope={} reason={}",
                operation, scope, denied
            );
            ApiError::from(denied)
        })
    }
}

fn decode_body<T: DeserializeOwned>(body: &Value) -> ApiResult<T> {
    serde_json::from_value(body.clone())
        .map_err(|err| ValidationError::InvalidBody(err.to_string()).into())
}
