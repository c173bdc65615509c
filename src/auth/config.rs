//! Token verification settings.

use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};

use super::jwks::MISS_COOLDOWN;

/// Algorithms the service accepts. All asymmetric; shared-secret HMAC
/// algorithms cannot be verified against a published key set.
pub const SUPPORTED_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
    Algorithm::ES256,
    Algorithm::ES384,
];

/// Identity provider and token verification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// Identity provider domain, e.g. "example.us.auth0.com".
    #[serde(default)]
    pub domain: String,

    /// API audience identifier the `aud` claim must contain.
    #[serde(default)]
    pub audience: String,

    /// Expected issuer. Derived from the domain when not set.
    #[serde(default)]
    pub issuer: Option<String>,

    /// Key set URL. Derived from the issuer when not set.
    #[serde(default)]
    pub jwks_url: Option<String>,

    /// The one signing algorithm tokens must use.
    #[serde(default = "default_algorithm")]
    pub algorithm: Algorithm,

    /// Claim holding the permission list.
    #[serde(default = "default_permissions_claim")]
    pub permissions_claim: String,

    /// How long a fetched key set is trusted, in seconds.
    #[serde(default = "default_jwks_refresh")]
    pub jwks_refresh_secs: u64,

    /// Minimum age of a fresh key set before an unknown `kid` refetches it.
    #[serde(default = "default_jwks_miss_cooldown")]
    pub jwks_miss_cooldown_secs: u64,

    /// Upper bound on a single key set fetch, in seconds.
    #[serde(default = "default_jwks_timeout")]
    pub jwks_timeout_secs: u64,

    /// Leeway applied to `exp`, in seconds.
    #[serde(default)]
    pub clock_skew_secs: u64,
}

fn default_algorithm() -> Algorithm {
    Algorithm::RS256
}

fn default_permissions_claim() -> String {
    "permissions".to_string()
}

fn default_jwks_refresh() -> u64 {
    600
}

fn default_jwks_miss_cooldown() -> u64 {
    MISS_COOLDOWN.as_secs()
}

fn default_jwks_timeout() -> u64 {
    10
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            domain: String::new(),
            audience: String::new(),
            issuer: None,
            jwks_url: None,
            algorithm: default_algorithm(),
            permissions_claim: default_permissions_claim(),
            jwks_refresh_secs: default_jwks_refresh(),
            jwks_miss_cooldown_secs: default_jwks_miss_cooldown(),
            jwks_timeout_secs: default_jwks_timeout(),
            clock_skew_secs: 0,
        }
    }
}

impl AuthConfig {
    /// Issuer URL tokens must carry in `iss`.
    pub fn effective_issuer(&self) -> String {
        match self.issuer {
            Some(ref issuer) => issuer.clone(),
            None => format!("https://{}/", self.domain.trim_end_matches('/')),
        }
    }

    /// Where the provider publishes its signing keys.
    pub fn effective_jwks_url(&self) -> String {
        match self.jwks_url {
            Some(ref url) => url.clone(),
            None => {
                let issuer = self.effective_issuer();
                format!("{}/.well-known/jwks.json", issuer.trim_end_matches('/'))
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.domain.is_empty() && (self.issuer.is_none() || self.jwks_url.is_none()) {
            return Err(
                "auth domain is required unless both issuer and jwks_url are set".to_string(),
            );
        }

        if self.audience.is_empty() {
            return Err("API audience is required".to_string());
        }

        if self.effective_issuer().is_empty() {
            return Err("issuer must not be empty".to_string());
        }

        let jwks_url = self.effective_jwks_url();
        if !jwks_url.starts_with("https://") && !jwks_url.starts_with("http://") {
            return Err(format!("jwks_url must be a valid HTTP(S) URL: {}", jwks_url));
        }

        if !SUPPORTED_ALGORITHMS.contains(&self.algorithm) {
            return Err(format!(
                "unsupported signing algorithm {:?}, expected an asymmetric algorithm",
                self.algorithm
            ));
        }

        if self.permissions_claim.is_empty() {
            return Err("permissions claim name must not be empty".to_string());
        }

        if self.jwks_timeout_secs == 0 {
            return Err("jwks_timeout_secs must be positive".to_string());
        }

        Ok(())
    }
}

/// JSON overrides read from a config file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct AuthConfigJson {
    pub domain: Option<String>,
    pub audience: Option<String>,
    pub issuer: Option<String>,
    pub jwks_url: Option<String>,
    pub algorithm: Option<Algorithm>,
    pub permissions_claim: Option<String>,
    pub jwks_refresh_secs: Option<u64>,
    pub jwks_miss_cooldown_secs: Option<u64>,
    pub jwks_timeout_secs: Option<u64>,
    pub clock_skew_secs: Option<u64>,
}

impl AuthConfigJson {
    /// Apply JSON config to existing config.
    pub fn apply_to(&self, config: &mut AuthConfig) {
        if let Some(ref domain) = self.domain {
            config.domain = domain.clone();
        }
        if let Some(ref audience) = self.audience {
            config.audience = audience.clone();
        }
        if let Some(ref issuer) = self.issuer {
            config.issuer = Some(issuer.clone());
        }
        if let Some(ref url) = self.jwks_url {
            config.jwks_url = Some(url.clone());
        }
        if let Some(algorithm) = self.algorithm {
            config.algorithm = algorithm;
        }
        if let Some(ref claim) = self.permissions_claim {
            config.permissions_claim = claim.clone();
        }
        if let Some(refresh) = self.jwks_refresh_secs {
            config.jwks_refresh_secs = refresh;
        }
        if let Some(cooldown) = self.jwks_miss_cooldown_secs {
            config.jwks_miss_cooldown_secs = cooldown;
        }
        if let Some(timeout) = self.jwks_timeout_secs {
            config.jwks_timeout_secs = timeout;
        }
        if let Some(skew) = self.clock_skew_secs {
            config.clock_skew_secs = skew;
        }
    }
}
