//! Shared fixtures for token tests: fixed RSA keys, JWK builders, token
//! signing and in-memory resolvers.

use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, DecodingKey, EncodingKey, Header};
use serde_json::{json, Value};
use std::collections::HashMap;

use super::error::KeyResolutionError;
use super::jwks::{KeyResolver, VerificationKey};

pub const SIGNING_KEY_PEM: &str = include_str!("testdata/signing_key.pem");
pub const SIGNING_KEY_N: &str = include_str!("testdata/signing_key.n");
pub const ROGUE_KEY_PEM: &str = include_str!("testdata/rogue_key.pem");
pub const ROGUE_KEY_N: &str = include_str!("testdata/rogue_key.n");

pub const TEST_AUDIENCE: &str = "shop";
pub const TEST_ISSUER: &str = "https://provider/";

/// RSA signing JWK in the shape identity providers publish.
pub fn rsa_jwk(kid: &str, modulus: &str) -> Value {
    json!({
        "kid": kid,
        "kty": "RSA",
        "alg": "RS256",
        "use": "sig",
        "n": modulus.trim(),
        "e": "AQAB"
    })
}

pub fn jwks_document(keys: Vec<Value>) -> Value {
    json!({ "keys": keys })
}

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Claims a well-behaved provider would issue for this service.
pub fn valid_claims(permissions: &[&str]) -> Value {
    json!({
        "iss": TEST_ISSUER,
        "aud": TEST_AUDIENCE,
        "sub": "auth0|barista",
        "iat": now() - 60,
        "exp": now() + 3600,
        "permissions": permissions,
    })
}

/// Sign `claims` with an RSA private key, declaring `kid` in the header.
pub fn sign(claims: &Value, kid: Option<&str>, pem: &str) -> String {
    sign_with(Algorithm::RS256, claims, kid, pem)
}

pub fn sign_with(alg: Algorithm, claims: &Value, kid: Option<&str>, pem: &str) -> String {
    let mut header = Header::new(alg);
    header.kid = kid.map(str::to_string);
    encode(&header, claims, &EncodingKey::from_rsa_pem(pem.as_bytes()).unwrap()).unwrap()
}

/// Resolver over a fixed key map.
pub struct StaticKeys {
    keys: HashMap<String, VerificationKey>,
}

impl StaticKeys {
    pub fn new() -> Self {
        Self {
            keys: HashMap::new(),
        }
    }

    pub fn with_rsa(mut self, kid: &str, modulus: &str) -> Self {
        let key = VerificationKey {
            kid: kid.to_string(),
            algorithm: Some(Algorithm::RS256),
            key: DecodingKey::from_rsa_components(modulus.trim(), "AQAB").unwrap(),
        };
        self.keys.insert(kid.to_string(), key);
        self
    }
}

#[async_trait]
impl KeyResolver for StaticKeys {
    async fn resolve(&self, kid: &str) -> Result<VerificationKey, KeyResolutionError> {
        self.keys
            .get(kid)
            .cloned()
            .ok_or_else(|| KeyResolutionError::NotFound(kid.to_string()))
    }
}

/// Resolver whose key set endpoint is down.
pub struct UnreachableKeys;

#[async_trait]
impl KeyResolver for UnreachableKeys {
    async fn resolve(&self, _kid: &str) -> Result<VerificationKey, KeyResolutionError> {
        Err(KeyResolutionError::FetchFailed(
            "request to https://provider/.well-known/jwks.json failed: connection refused"
                .to_string(),
        ))
    }
}
