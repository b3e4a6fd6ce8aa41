//! Access gate consulted before every API call.
//!
//! # Responsibility
//! - Turn per-request credentials into a `Principal` or a denial.
//!
//! # Invariants
//! - A denial is final; callers must not touch the repository afterwards.
//! - Gates hold no per-request state and are shared across threads.

use coffer_core::StoreId;
use std::error::Error;
use std::fmt::{Display, Formatter};

const BEARER_PREFIX: &str = "Bearer ";

/// Credentials carried by one inbound request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    bearer_token: Option<String>,
}

impl RequestContext {
    /// Request without credentials.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_bearer(token: impl Into<String>) -> Self {
        Self {
            bearer_token: Some(token.into()),
        }
    }

    /// Builds a context from a raw `Authorization` header value.
    ///
    /// Anything other than `Bearer <token>` yields an anonymous context.
    pub fn from_authorization_header(value: &str) -> Self {
        match value.trim().strip_prefix(BEARER_PREFIX) {
            Some(token) if !token.trim().is_empty() => Self::with_bearer(token.trim()),
            _ => Self::anonymous(),
        }
    }

    pub fn bearer_token(&self) -> Option<&str> {
        self.bearer_token.as_deref()
    }
}

/// What a request wants to touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessScope {
    /// The store collection and administrative calls.
    Vault,
    Store(StoreId),
}

impl Display for AccessScope {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Vault => write!(f, "vault"),
            Self::Store(id) => write!(f, "store:{id}"),
        }
    }
}

/// Authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// Holder of the configured bearer token.
    TokenHolder,
    /// Any caller while authentication is disabled.
    Anonymous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDenied {
    MissingCredentials,
    InvalidCredentials,
}

impl Display for AccessDenied {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingCredentials => write!(f, "missing bearer token"),
            Self::InvalidCredentials => write!(f, "invalid bearer token"),
        }
    }
}

impl Error for AccessDenied {}

/// Per-request authorization decision.
pub trait AccessGate: Send + Sync {
    fn authorize(
        &self,
        context: &RequestContext,
        scope: AccessScope,
    ) -> Result<Principal, AccessDenied>;
}

impl<G: AccessGate + ?Sized> AccessGate for Box<G> {
    fn authorize(
        &self,
        context: &RequestContext,
        scope: AccessScope,
    ) -> Result<Principal, AccessDenied> {
        (**self).authorize(context, scope)
    }
}

/// Accepts requests presenting one statically configured token.
#[derive(Clone)]
pub struct BearerTokenGate {
    token: String,
}

impl BearerTokenGate {
    /// Returns `None` for an empty or whitespace-only token.
    pub fn new(token: impl Into<String>) -> Option<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            return None;
        }
        Some(Self { token })
    }
}

impl std::fmt::Debug for BearerTokenGate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerTokenGate")
            .field("token", &"<redacted>")
            .finish()
    }
}

impl AccessGate for BearerTokenGate {
    fn authorize(
        &self,
        context: &RequestContext,
        _scope: AccessScope,
    ) -> Result<Principal, AccessDenied> {
        let presented = context
            .bearer_token()
            .ok_or(AccessDenied::MissingCredentials)?;
        if constant_time_eq(presented.as_bytes(), self.token.as_bytes()) {
            Ok(Principal::TokenHolder)
        } else {
            Err(AccessDenied::InvalidCredentials)
        }
    }
}

/// Lets every request through; used when authentication is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenGate;

impl AccessGate for OpenGate {
    fn authorize(
        &self,
        _context: &RequestContext,
        _scope: AccessScope,
    ) -> Result<Principal, AccessDenied> {
        Ok(Principal::Anonymous)
    }
}

fn constant_time_eq(left: &[u8], right: &[u8]) -> bool {
    if left.len() != right.len() {
        return false;
    }
    left.iter()
        .zip(right)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}
