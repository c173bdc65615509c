//! Authorization failure taxonomy.

use axum::http::StatusCode;
use std::fmt;
use thiserror::Error;

/// Failure to produce a verification key for a token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyResolutionError {
    /// The latest key set has no key with the requested identifier.
    #[error("no signing key with kid '{0}'")]
    NotFound(String),

    /// The key set could not be fetched or parsed.
    #[error("failed to fetch signing keys: {0}")]
    FetchFailed(String),
}

/// Why a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthFailureKind {
    MissingHeader,
    MalformedHeader,
    MalformedToken,
    KeyResolutionFailed,
    InvalidSignature,
    Expired,
    InvalidAudience,
    InvalidIssuer,
    NoPermissionsClaim,
    PermissionDenied,
}

impl AuthFailureKind {
    /// HTTP status the request layer answers with.
    pub fn status_code(self) -> StatusCode {
        match self {
            AuthFailureKind::PermissionDenied => StatusCode::FORBIDDEN,
            AuthFailureKind::KeyResolutionFailed => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        }
    }

    /// Stable machine-readable code.
    pub fn code(self) -> &'static str {
        match self {
            AuthFailureKind::MissingHeader => "missing_header",
            AuthFailureKind::MalformedHeader => "malformed_header",
            AuthFailureKind::MalformedToken => "malformed_token",
            AuthFailureKind::KeyResolutionFailed => "key_resolution_failed",
            AuthFailureKind::InvalidSignature => "invalid_signature",
            AuthFailureKind::Expired => "token_expired",
            AuthFailureKind::InvalidAudience => "invalid_audience",
            AuthFailureKind::InvalidIssuer => "invalid_issuer",
            AuthFailureKind::NoPermissionsClaim => "no_permissions_claim",
            AuthFailureKind::PermissionDenied => "permission_denied",
        }
    }
}

impl fmt::Display for AuthFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A classified authorization failure with a human-readable detail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {detail}")]
pub struct AuthDenial {
    pub kind: AuthFailureKind,
    pub detail: String,
}

impl AuthDenial {
    pub fn new(kind: AuthFailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

impl From<KeyResolutionError> for AuthDenial {
    fn from(err: KeyResolutionError) -> Self {
        AuthDenial::new(AuthFailureKind::KeyResolutionFailed, err.to_string())
    }
}
