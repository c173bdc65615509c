//! JWKS (JSON Web Key Set) fetching and caching.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::config::AuthConfig;
use super::error::KeyResolutionError;

/// Default minimum age of a fresh snapshot before a kid miss triggers a refetch.
pub const MISS_COOLDOWN: Duration = Duration::from_secs(30);

/// Public key material for one key identifier.
#[derive(Clone)]
pub struct VerificationKey {
    pub kid: String,
    /// Algorithm the provider pinned the key to, if it declared one.
    pub algorithm: Option<Algorithm>,
    pub key: DecodingKey,
}

impl fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// Looks up the key a token's `kid` refers to.
#[async_trait]
pub trait KeyResolver: Send + Sync {
    async fn resolve(&self, kid: &str) -> Result<VerificationKey, KeyResolutionError>;
}

/// JWKS response from the endpoint.
#[derive(Debug, Deserialize)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

/// Individual JSON Web Key.
#[derive(Debug, Deserialize)]
pub struct Jwk {
    /// Key type (RSA, EC)
    pub kty: String,
    pub kid: Option<String>,
    pub alg: Option<String>,
    /// Key use (sig, enc)
    #[serde(rename = "use")]
    pub key_use: Option<String>,

    // RSA
    pub n: Option<String>,
    pub e: Option<String>,

    // EC
    pub crv: Option<String>,
    pub x: Option<String>,
    pub y: Option<String>,
}

/// One successful fetch, never mutated after construction.
struct KeySnapshot {
    keys: HashMap<String, VerificationKey>,
    fetched_at: Instant,
}

type FetchOutcome = Result<Arc<KeySnapshot>, KeyResolutionError>;

/// Process-wide key set cache. Construct once and share behind an `Arc`.
pub struct JwksCache {
    snapshot: RwLock<Option<Arc<KeySnapshot>>>,
    /// Serialises fetches and holds the outcome of the latest one, so
    /// callers queued behind a fetch share its result, failures included.
    last_fetch: Mutex<Option<FetchOutcome>>,
    /// Completed fetch attempts.
    attempts: AtomicU64,
    refresh_interval: Duration,
    miss_cooldown: Duration,
    jwks_url: String,
    algorithm: Algorithm,
    http_client: reqwest::Client,
}

impl JwksCache {
    /// Create an empty cache. Nothing is fetched until first use.
    pub fn new(
        jwks_url: String,
        algorithm: Algorithm,
        refresh_interval: Duration,
        fetch_timeout: Duration,
    ) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(fetch_timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            snapshot: RwLock::new(None),
            last_fetch: Mutex::new(None),
            attempts: AtomicU64::new(0),
            refresh_interval,
            miss_cooldown: MISS_COOLDOWN.min(refresh_interval),
            jwks_url,
            algorithm,
            http_client,
        })
    }

    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        let cache = Self::new(
            config.effective_jwks_url(),
            config.algorithm,
            Duration::from_secs(config.jwks_refresh_secs),
            Duration::from_secs(config.jwks_timeout_secs),
        )?;
        Ok(cache.with_miss_cooldown(Duration::from_secs(config.jwks_miss_cooldown_secs)))
    }

    /// Override how long a fresh snapshot answers misses without refetching.
    /// Capped at the refresh interval.
    pub fn with_miss_cooldown(mut self, cooldown: Duration) -> Self {
        self.miss_cooldown = cooldown.min(self.refresh_interval);
        self
    }

    pub fn jwks_url(&self) -> &str {
        &self.jwks_url
    }

    /// Fetch eagerly. Returns the number of usable keys.
    pub async fn warm_up(&self) -> Result<usize, KeyResolutionError> {
        let seen = self.attempts.load(Ordering::Acquire);
        let snapshot = self.refresh_after(seen).await?;
        Ok(snapshot.keys.len())
    }

    async fn current(&self) -> Option<Arc<KeySnapshot>> {
        self.snapshot.read().await.clone()
    }

    /// Fetch a new snapshot unless a fetch completed after the caller read
    /// `seen` from the attempt counter. In that case the caller gets that
    /// fetch's outcome instead.
    async fn refresh_after(&self, seen: u64) -> FetchOutcome {
        let mut last_fetch = self.last_fetch.lock().await;

        if self.attempts.load(Ordering::Acquire) != seen {
            if let Some(ref outcome) = *last_fetch {
                debug!("JWKS already fetched by a concurrent request");
                return outcome.clone();
            }
        }

        let outcome = self.fetch().await.map(|keys| {
            Arc::new(KeySnapshot {
                keys,
                fetched_at: Instant::now(),
            })
        });

        match outcome {
            Ok(ref snapshot) => {
                *self.snapshot.write().await = Some(Arc::clone(snapshot));
                info!(
                    url = %self.jwks_url,
                    key_count = snapshot.keys.len(),
                    "JWKS cache refreshed"
                );
            }
            Err(ref e) => {
                warn!(url = %self.jwks_url, error = %e, "JWKS fetch failed");
            }
        }

        *last_fetch = Some(outcome.clone());
        self.attempts.fetch_add(1, Ordering::Release);
        outcome
    }

    async fn fetch(&self) -> Result<HashMap<String, VerificationKey>, KeyResolutionError> {
        debug!(url = %self.jwks_url, "Fetching JWKS");

        let response = self
            .http_client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| {
                KeyResolutionError::FetchFailed(format!("request to {} failed: {}", self.jwks_url, e))
            })?;

        if !response.status().is_success() {
            return Err(KeyResolutionError::FetchFailed(format!(
                "JWKS endpoint returned status {}",
                response.status()
            )));
        }

        let jwks: Jwks = response
            .json()
            .await
            .map_err(|e| KeyResolutionError::FetchFailed(format!("invalid JWKS document: {}", e)))?;

        let mut keys = HashMap::new();
        for jwk in jwks.keys {
            match self.usable_key(&jwk) {
                Ok(Some(key)) => {
                    debug!(kid = %key.kid, kty = %jwk.kty, "Loaded JWK");
                    keys.insert(key.kid.clone(), key);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        kid = ?jwk.kid,
                        kty = %jwk.kty,
                        error = %e,
                        "Failed to parse JWK, skipping"
                    );
                }
            }
        }

        if keys.is_empty() {
            return Err(KeyResolutionError::FetchFailed(
                "no usable signing keys in JWKS".to_string(),
            ));
        }

        Ok(keys)
    }

    /// Filter a published key down to one that can verify the expected
    /// algorithm. `Ok(None)` means the key is deliberately ignored.
    fn usable_key(&self, jwk: &Jwk) -> Result<Option<VerificationKey>> {
        if jwk.key_use.as_deref() == Some("enc") {
            debug!(kid = ?jwk.kid, "Skipping encryption key");
            return Ok(None);
        }

        let Some(kid) = jwk.kid.clone() else {
            debug!(kty = %jwk.kty, "Skipping JWK without kid");
            return Ok(None);
        };

        let algorithm = match jwk.alg.as_deref() {
            Some(alg) => match alg.parse::<Algorithm>() {
                Ok(parsed) if parsed == self.algorithm => Some(parsed),
                _ => {
                    debug!(kid = %kid, alg = %alg, expected = ?self.algorithm, "Skipping JWK for another algorithm");
                    return Ok(None);
                }
            },
            None => None,
        };

        let key = jwk_to_decoding_key(jwk, self.algorithm)?;
        Ok(Some(VerificationKey {
            kid,
            algorithm,
            key,
        }))
    }
}

#[async_trait]
impl KeyResolver for JwksCache {
    async fn resolve(&self, kid: &str) -> Result<VerificationKey, KeyResolutionError> {
        let attempt = self.attempts.load(Ordering::Acquire);

        if let Some(snapshot) = self.current().await {
            let age = snapshot.fetched_at.elapsed();
            if age < self.refresh_interval {
                if let Some(key) = snapshot.keys.get(kid) {
                    return Ok(key.clone());
                }
                if age < self.miss_cooldown {
                    return Err(KeyResolutionError::NotFound(kid.to_string()));
                }
                debug!(kid = %kid, "Key not found in cache, refreshing JWKS");
            }
        }

        let snapshot = self.refresh_after(attempt).await?;
        snapshot
            .keys
            .get(kid)
            .cloned()
            .ok_or_else(|| KeyResolutionError::NotFound(kid.to_string()))
    }
}

/// Convert a JWK to a DecodingKey usable with `algorithm`.
fn jwk_to_decoding_key(jwk: &Jwk, algorithm: Algorithm) -> Result<DecodingKey> {
    match jwk.kty.as_str() {
        "RSA" => {
            if !matches!(
                algorithm,
                Algorithm::RS256
                    | Algorithm::RS384
                    | Algorithm::RS512
                    | Algorithm::PS256
                    | Algorithm::PS384
                    | Algorithm::PS512
            ) {
                return Err(anyhow!("RSA key cannot verify {:?}", algorithm));
            }
            let n = jwk.n.as_ref().ok_or_else(|| anyhow!("RSA key missing 'n'"))?;
            let e = jwk.e.as_ref().ok_or_else(|| anyhow!("RSA key missing 'e'"))?;

            DecodingKey::from_rsa_components(n, e).context("Failed to create RSA DecodingKey")
        }
        "EC" => {
            let expected_curve = match algorithm {
                Algorithm::ES256 => "P-256",
                Algorithm::ES384 => "P-384",
                _ => return Err(anyhow!("EC key cannot verify {:?}", algorithm)),
            };
            let crv = jwk.crv.as_deref().ok_or_else(|| anyhow!("EC key missing 'crv'"))?;
            if crv != expected_curve {
                return Err(anyhow!("EC curve {} does not match {:?}", crv, algorithm));
            }
            let x = jwk.x.as_ref().ok_or_else(|| anyhow!("EC key missing 'x'"))?;
            let y = jwk.y.as_ref().ok_or_else(|| anyhow!("EC key missing 'y'"))?;

            DecodingKey::from_ec_components(x, y).context("Failed to create EC DecodingKey")
        }
        kty => Err(anyhow!("Unsupported key type: {}", kty)),
    }
}
