//! Bearer token verification and permission enforcement.
//!
//! Every protected handler calls [`AccessGuard::authorize_headers`] before it
//! touches its body or path, and branches on the result.

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use jsonwebtoken::errors::{Error as JwtError, ErrorKind};
use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::config::AuthConfig;
use super::error::{AuthDenial, AuthFailureKind};
use super::jwks::KeyResolver;

/// Outcome of a guard check.
pub type AuthorizationResult = Result<Claims, AuthDenial>;

/// Audience can be a single string or array of strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    #[default]
    None,
    Single(String),
    Multiple(Vec<String>),
}

/// Verified claims of the caller. Lives for one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Claims {
    pub iss: String,
    pub aud: Audience,
    pub exp: i64,
    pub sub: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    pub permissions: Vec<String>,
    /// Claims not modelled above.
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl Claims {
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }
}

/// Payload as signed by the provider. `iss`, `aud` and `exp` default so
/// that their absence is reported by validation rather than by serde.
#[derive(Debug, Deserialize)]
struct TokenPayload {
    #[serde(default)]
    iss: String,
    #[serde(default)]
    aud: Audience,
    #[serde(default)]
    exp: i64,
    sub: String,
    #[serde(default)]
    iat: Option<i64>,
    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

/// Verifies bearer tokens against the provider's keys and checks that
/// they carry a required permission.
pub struct AccessGuard {
    resolver: Arc<dyn KeyResolver>,
    algorithm: Algorithm,
    permissions_claim: String,
    validation: Validation,
}

impl AccessGuard {
    pub fn new(config: &AuthConfig, resolver: Arc<dyn KeyResolver>) -> Self {
        let issuer = config.effective_issuer();

        let mut validation = Validation::new(config.algorithm);
        validation.leeway = config.clock_skew_secs;
        validation.set_issuer(&[&issuer]);
        validation.set_audience(&[&config.audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);

        Self {
            resolver,
            algorithm: config.algorithm,
            permissions_claim: config.permissions_claim.clone(),
            validation,
        }
    }

    /// Authorize a request from its headers.
    pub async fn authorize_headers(
        &self,
        headers: &HeaderMap,
        required_permission: &str,
    ) -> AuthorizationResult {
        match headers.get(AUTHORIZATION).map(|value| value.to_str()).transpose() {
            Ok(authorization) => self.authorize(authorization, required_permission).await,
            Err(_) => {
                let result = Err(AuthDenial::new(
                    AuthFailureKind::MalformedHeader,
                    "Authorization header is not valid ASCII",
                ));
                log_outcome(&result, required_permission);
                result
            }
        }
    }

    /// Authorize a raw `Authorization` header value.
    pub async fn authorize(
        &self,
        authorization: Option<&str>,
        required_permission: &str,
    ) -> AuthorizationResult {
        let result = self.evaluate(authorization, required_permission).await;
        log_outcome(&result, required_permission);
        result
    }

    async fn evaluate(
        &self,
        authorization: Option<&str>,
        required_permission: &str,
    ) -> AuthorizationResult {
        let token = bearer_token(authorization)?;

        let header = decode_header(token).map_err(|e| {
            AuthDenial::new(
                AuthFailureKind::MalformedToken,
                format!("unable to parse token: {}", e),
            )
        })?;

        let kid = header.kid.as_deref().ok_or_else(|| {
            AuthDenial::new(
                AuthFailureKind::MalformedToken,
                "token header has no key identifier",
            )
        })?;

        let key = self.resolver.resolve(kid).await?;

        if header.alg != self.algorithm {
            return Err(AuthDenial::new(
                AuthFailureKind::InvalidSignature,
                format!(
                    "token algorithm {:?} does not match expected {:?}",
                    header.alg, self.algorithm
                ),
            ));
        }
        if let Some(pinned) = key.algorithm {
            if pinned != header.alg {
                return Err(AuthDenial::new(
                    AuthFailureKind::InvalidSignature,
                    format!("key '{}' is pinned to {:?}", key.kid, pinned),
                ));
            }
        }

        let payload = decode::<TokenPayload>(token, &key.key, &self.validation)
            .map_err(classify_jwt_error)?
            .claims;

        let claims = self.claims_from(payload)?;

        if !claims.has_permission(required_permission) {
            return Err(AuthDenial::new(
                AuthFailureKind::PermissionDenied,
                format!("permission '{}' not granted", required_permission),
            ));
        }

        Ok(claims)
    }

    fn claims_from(&self, mut payload: TokenPayload) -> AuthorizationResult {
        let permissions = match payload.extra.remove(&self.permissions_claim) {
            Some(value) => serde_json::from_value::<Vec<String>>(value).map_err(|_| {
                AuthDenial::new(
                    AuthFailureKind::MalformedToken,
                    format!("'{}' claim must be a list of strings", self.permissions_claim),
                )
            })?,
            None => {
                return Err(AuthDenial::new(
                    AuthFailureKind::NoPermissionsClaim,
                    format!("token has no '{}' claim", self.permissions_claim),
                ))
            }
        };

        Ok(Claims {
            iss: payload.iss,
            aud: payload.aud,
            exp: payload.exp,
            sub: payload.sub,
            iat: payload.iat,
            permissions,
            extra: payload.extra,
        })
    }
}

/// Extract the token from `Bearer <token>`.
pub fn bearer_token(authorization: Option<&str>) -> Result<&str, AuthDenial> {
    let header = authorization.ok_or_else(|| {
        AuthDenial::new(
            AuthFailureKind::MissingHeader,
            "Authorization header is expected",
        )
    })?;

    if header.trim().is_empty() {
        return Err(AuthDenial::new(
            AuthFailureKind::MalformedHeader,
            "Authorization header is empty",
        ));
    }

    // exactly `<scheme> <token>` separated by a single space
    let parts: Vec<&str> = header.split(' ').collect();
    match parts.as_slice() {
        [scheme, token] if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() => {
            Ok(*token)
        }
        [scheme, ..] if !scheme.eq_ignore_ascii_case("bearer") => Err(AuthDenial::new(
            AuthFailureKind::MalformedHeader,
            "Authorization header must start with \"Bearer\"",
        )),
        [_] | [_, ""] => Err(AuthDenial::new(
            AuthFailureKind::MalformedHeader,
            "Token not found",
        )),
        _ => Err(AuthDenial::new(
            AuthFailureKind::MalformedHeader,
            "Authorization header must be bearer token",
        )),
    }
}

fn classify_jwt_error(err: JwtError) -> AuthDenial {
    let kind = match err.kind() {
        ErrorKind::ExpiredSignature => AuthFailureKind::Expired,
        ErrorKind::InvalidAudience => AuthFailureKind::InvalidAudience,
        ErrorKind::InvalidIssuer => AuthFailureKind::InvalidIssuer,
        ErrorKind::MissingRequiredClaim(claim) => match claim.as_str() {
            "aud" => AuthFailureKind::InvalidAudience,
            "iss" => AuthFailureKind::InvalidIssuer,
            _ => AuthFailureKind::MalformedToken,
        },
        ErrorKind::InvalidToken
        | ErrorKind::Base64(_)
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_) => AuthFailureKind::MalformedToken,
        _ => AuthFailureKind::InvalidSignature,
    };
    AuthDenial::new(kind, err.to_string())
}

fn log_outcome(result: &AuthorizationResult, required_permission: &str) {
    match result {
        Ok(claims) => info!(
            subject = %claims.sub,
            permission = %required_permission,
            "Request authorized"
        ),
        Err(denial) if denial.kind == AuthFailureKind::KeyResolutionFailed => warn!(
            permission = %required_permission,
            detail = %denial.detail,
            "Authorization aborted: signing keys unavailable"
        ),
        Err(denial) => debug!(
            kind = %denial.kind,
            permission = %required_permission,
            detail = %denial.detail,
            "Authorization denied"
        ),
    }
}
