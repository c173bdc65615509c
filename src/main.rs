//! Drinks API
//!
//! A coffee shop menu service. Anyone can read the menu; reading recipes
//! in full and changing the menu require bearer tokens issued by an
//! external identity provider and carrying the matching permission.

mod auth;
mod drinks;
mod error;
mod server;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use auth::{AccessGuard, AuthConfig, AuthConfigJson, JwksCache};
use drinks::DrinkStore;
use server::AppState;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "drinks-api")]
#[command(about = "Coffee shop drinks API guarded by bearer token permissions")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:5000", env = "DRINKS_LISTEN")]
    listen: SocketAddr,

    /// Identity provider domain (issuer is https://<domain>/)
    #[arg(long, env = "AUTH0_DOMAIN")]
    auth_domain: Option<String>,

    /// API audience tokens must be issued for
    #[arg(long, env = "API_AUDIENCE")]
    api_audience: Option<String>,

    /// Override the expected token issuer
    #[arg(long, env = "JWT_ISSUER")]
    jwt_issuer: Option<String>,

    /// Override the signing key set URL
    #[arg(long, env = "JWKS_URL")]
    jwks_url: Option<String>,

    /// Token signing algorithm
    #[arg(long, default_value = "RS256", env = "JWT_ALGORITHM")]
    jwt_algorithm: String,

    /// Claim holding the permission list
    #[arg(long, default_value = "permissions", env = "PERMISSIONS_CLAIM")]
    permissions_claim: String,

    /// Seconds a fetched key set is trusted
    #[arg(long, default_value_t = 600, env = "JWKS_REFRESH_SECS")]
    jwks_refresh_secs: u64,

    /// Seconds a fresh key set answers unknown key ids before refetching
    #[arg(long, default_value_t = 30, env = "JWKS_MISS_COOLDOWN_SECS")]
    jwks_miss_cooldown_secs: u64,

    /// Timeout for a key set fetch, in seconds
    #[arg(long, default_value_t = 10, env = "JWKS_TIMEOUT_SECS")]
    jwks_timeout_secs: u64,

    /// Leeway for token expiry, in seconds
    #[arg(long, default_value_t = 0, env = "CLOCK_SKEW_SECS")]
    clock_skew_secs: u64,

    /// Path to the drink database
    #[arg(long, default_value = "drinks.redb", env = "DRINKS_STORE_PATH")]
    store_path: PathBuf,

    /// Drop all drinks and seed the store before serving
    #[arg(long, env = "DRINKS_RESET_STORE")]
    reset_store: bool,

    /// JSON config file applied on top of the flags
    #[arg(long, env = "DRINKS_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, env = "DRINKS_VERBOSE")]
    verbose: bool,
}

/// Resolved service configuration
#[derive(Debug, Clone)]
struct ServiceConfig {
    listen: SocketAddr,
    store_path: PathBuf,
    auth: AuthConfig,
}

/// Config file contents
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
struct ServiceConfigJson {
    listen: Option<SocketAddr>,
    store_path: Option<PathBuf>,
    #[serde(default)]
    auth: AuthConfigJson,
}

impl ServiceConfigJson {
    fn apply_to(&self, config: &mut ServiceConfig) {
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(ref path) = self.store_path {
            config.store_path = path.clone();
        }
        self.auth.apply_to(&mut config.auth);
    }
}

impl ServiceConfig {
    fn from_args(args: &Args) -> Result<Self> {
        let algorithm: Algorithm = args
            .jwt_algorithm
            .parse()
            .map_err(|e| anyhow!("Invalid JWT algorithm '{}': {}", args.jwt_algorithm, e))?;

        let mut config = Self {
            listen: args.listen,
            store_path: args.store_path.clone(),
            auth: AuthConfig {
                domain: args.auth_domain.clone().unwrap_or_default(),
                audience: args.api_audience.clone().unwrap_or_default(),
                issuer: args.jwt_issuer.clone(),
                jwks_url: args.jwks_url.clone(),
                algorithm,
                permissions_claim: args.permissions_claim.clone(),
                jwks_refresh_secs: args.jwks_refresh_secs,
                jwks_miss_cooldown_secs: args.jwks_miss_cooldown_secs,
                jwks_timeout_secs: args.jwks_timeout_secs,
                clock_skew_secs: args.clock_skew_secs,
            },
        };

        if let Some(ref path) = args.config {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            let json: ServiceConfigJson = serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?;
            json.apply_to(&mut config);
        }

        config
            .auth
            .validate()
            .map_err(|e| anyhow!("Invalid auth configuration: {}", e))?;

        Ok(config)
    }
}

fn init_tracing(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{}={},tower_http={}",
            env!("CARGO_CRATE_NAME"),
            log_level,
            log_level
        ))
    });

    tracing_subscriber::fmt().with_env_filter(filter).json().init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    info!("Starting drinks API");

    let config = ServiceConfig::from_args(&args)?;

    info!(
        issuer = %config.auth.effective_issuer(),
        audience = %config.auth.audience,
        algorithm = ?config.auth.algorithm,
        jwks_url = %config.auth.effective_jwks_url(),
        "Configuration loaded"
    );

    let store = DrinkStore::open(config.store_path.clone())?;
    info!(path = ?config.store_path, "Drink store initialized");

    if args.reset_store {
        let seeded = store.reset()?;
        info!(seeded = %seeded.title, "Drink store reset on startup");
    }

    let keys = Arc::new(JwksCache::from_config(&config.auth)?);
    match keys.warm_up().await {
        Ok(key_count) => info!(url = %keys.jwks_url(), key_count, "Signing keys loaded"),
        Err(e) => warn!(
            url = %keys.jwks_url(),
            error = %e,
            "Failed to load signing keys, will retry on first request"
        ),
    }

    let guard = AccessGuard::new(&config.auth, keys);

    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen))?;

    server::serve(listener, AppState::new(guard, store)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec![
            "drinks-api",
            "--auth-domain",
            "coffee.us.auth0.com",
            "--api-audience",
            "coffee",
        ];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_config_from_args() {
        let config = ServiceConfig::from_args(&parse(&[])).unwrap();

        assert_eq!(config.listen, "127.0.0.1:5000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.auth.effective_issuer(), "https://coffee.us.auth0.com/");
        assert_eq!(config.auth.algorithm, Algorithm::RS256);
        assert_eq!(config.auth.permissions_claim, "permissions");
        assert_eq!(config.auth.jwks_refresh_secs, 600);
        assert_eq!(config.auth.jwks_miss_cooldown_secs, 30);
    }

    #[test]
    fn test_symmetric_algorithm_rejected() {
        let result = ServiceConfig::from_args(&parse(&["--jwt-algorithm", "HS256"]));
        assert!(result.is_err());

        let result = ServiceConfig::from_args(&parse(&["--jwt-algorithm", "nonsense"]));
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_audience_rejected() {
        let args = Args::try_parse_from(["drinks-api", "--auth-domain", "coffee.us.auth0.com"])
            .unwrap();
        let err = ServiceConfig::from_args(&args).unwrap_err();
        assert!(format!("{:#}", err).contains("audience"));
    }

    #[test]
    fn test_config_file_overrides_flags() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "listen": "0.0.0.0:8080",
                "store-path": "/var/lib/drinks/drinks.redb",
                "auth": {{"audience": "shop", "clock-skew-secs": 30}}
            }}"#
        )
        .unwrap();

        let path = file.path().to_str().unwrap();
        let config = ServiceConfig::from_args(&parse(&["--config", path])).unwrap();

        assert_eq!(config.listen.port(), 8080);
        assert_eq!(config.store_path, PathBuf::from("/var/lib/drinks/drinks.redb"));
        assert_eq!(config.auth.audience, "shop");
        assert_eq!(config.auth.clock_skew_secs, 30);
        assert_eq!(config.auth.domain, "coffee.us.auth0.com");
    }

    #[test]
    fn test_unreadable_config_file() {
        let result = ServiceConfig::from_args(&parse(&["--config", "/nonexistent/drinks.json"]));
        assert!(result.is_err());
    }
}
