//! Authentication configuration.
//!
//! Configuration is read once at process start and shared read-only by every
//! request and channel afterwards. It comes from a JSON file (with `${VAR}`
//! expansion in string values) or, when no file exists, from environment
//! variables.

use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};
use std::{env, fmt, fs, path::PathBuf, time::Duration};

use crate::channel::HandshakePolicy;

/// Default token lifetime: 24 hours.
pub const DEFAULT_TOKEN_TTL_SECONDS: u64 = 86_400;

/// Default budget for a single principal lookup.
pub const DEFAULT_LOADER_TIMEOUT_MS: u64 = 2_000;

/// Default lifetime of a revocation denylist entry.
pub const DEFAULT_REVOCATION_TTL_SECONDS: u64 = DEFAULT_TOKEN_TTL_SECONDS;

/// Longest accepted denylist entry lifetime: ten years.
pub const MAX_REVOCATION_TTL_SECONDS: u64 = 10 * 365 * DEFAULT_TOKEN_TTL_SECONDS;

/// Token signing settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    /// Shared HMAC secret. Never logged.
    pub secret: String,
    /// Signing algorithm; only the HMAC family is accepted.
    #[serde(default = "default_algorithm")]
    pub algorithm: Algorithm,
    /// Token lifetime in seconds.
    #[serde(default = "default_token_ttl_seconds")]
    pub expiration_seconds: u64,
}

impl fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &"<redacted>")
            .field("algorithm", &self.algorithm)
            .field("expiration_seconds", &self.expiration_seconds)
            .finish()
    }
}

impl JwtConfig {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            algorithm: default_algorithm(),
            expiration_seconds: DEFAULT_TOKEN_TTL_SECONDS,
        }
    }

    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_expiration_seconds(mut self, seconds: u64) -> Self {
        self.expiration_seconds = seconds;
        self
    }

    /// Check the algorithm is supported and the secret is long enough for it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let min = min_secret_len(self.algorithm)
            .ok_or(ConfigError::UnsupportedAlgorithm(self.algorithm))?;

        if self.secret.is_empty() {
            return Err(ConfigError::MissingSecret);
        }

        let actual = self.secret.len();
        if actual < min {
            return Err(ConfigError::SecretTooShort {
                algorithm: self.algorithm,
                min,
                actual,
            });
        }

        if self.expiration_seconds == 0 {
            return Err(ConfigError::InvalidTtl);
        }

        Ok(())
    }
}

/// Minimum HMAC key size in bytes (RFC 7518 §3.2: at least the hash output size).
pub fn min_secret_len(algorithm: Algorithm) -> Option<usize> {
    match algorithm {
        Algorithm::HS256 => Some(32),
        Algorithm::HS384 => Some(48),
        Algorithm::HS512 => Some(64),
        _ => None,
    }
}

/// Destination prefixes of the real-time channel.
///
/// Mirrors the broker layout of the messaging protocol: application
/// destinations, broker destinations, and per-user destinations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Prefix routed to application handlers.
    #[serde(default = "default_app_prefix")]
    pub app_prefix: String,
    /// Prefixes handled by the in-process broker.
    #[serde(default = "default_broker_prefixes")]
    pub broker_prefixes: Vec<String>,
    /// Prefix of user-scoped destinations.
    #[serde(default = "default_user_prefix")]
    pub user_prefix: String,
    /// Prefixes that anonymous channels may neither send to nor subscribe to.
    #[serde(default = "default_identity_prefixes")]
    pub identity_prefixes: Vec<String>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            app_prefix: default_app_prefix(),
            broker_prefixes: default_broker_prefixes(),
            user_prefix: default_user_prefix(),
            identity_prefixes: default_identity_prefixes(),
        }
    }
}

/// Top-level authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt: JwtConfig,
    /// Budget for one principal lookup before authentication reports `Unavailable`.
    #[serde(default = "default_loader_timeout_ms")]
    pub loader_timeout_ms: u64,
    /// What a channel does when its handshake credential is rejected.
    #[serde(default)]
    pub handshake_policy: HandshakePolicy,
    /// How long a revoked subject stays on the denylist.
    #[serde(default = "default_revocation_ttl_seconds")]
    pub revocation_ttl_seconds: u64,
    #[serde(default)]
    pub channel: ChannelConfig,
}

fn default_algorithm() -> Algorithm {
    Algorithm::HS256
}

fn default_token_ttl_seconds() -> u64 {
    DEFAULT_TOKEN_TTL_SECONDS
}

fn default_loader_timeout_ms() -> u64 {
    DEFAULT_LOADER_TIMEOUT_MS
}

fn default_revocation_ttl_seconds() -> u64 {
    DEFAULT_REVOCATION_TTL_SECONDS
}

fn default_app_prefix() -> String {
    "/app".to_string()
}

fn default_broker_prefixes() -> Vec<String> {
    vec!["/topic".to_string(), "/queue".to_string()]
}

fn default_user_prefix() -> String {
    "/user".to_string()
}

fn default_identity_prefixes() -> Vec<String> {
    vec!["/app".to_string(), "/queue".to_string(), "/user".to_string()]
}

impl AuthConfig {
    /// Build a config with defaults around the given signing settings.
    pub fn new(jwt: JwtConfig) -> Self {
        Self {
            jwt,
            loader_timeout_ms: DEFAULT_LOADER_TIMEOUT_MS,
            handshake_policy: HandshakePolicy::default(),
            revocation_ttl_seconds: DEFAULT_REVOCATION_TTL_SECONDS,
            channel: ChannelConfig::default(),
        }
    }

    pub fn with_handshake_policy(mut self, policy: HandshakePolicy) -> Self {
        self.handshake_policy = policy;
        self
    }

    pub fn loader_timeout(&self) -> Duration {
        Duration::from_millis(self.loader_timeout_ms)
    }

    pub fn revocation_ttl(&self) -> Duration {
        Duration::from_secs(self.revocation_ttl_seconds)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.jwt.validate()?;
        if self.loader_timeout_ms == 0 {
            return Err(ConfigError::InvalidLoaderTimeout);
        }
        if self.revocation_ttl_seconds > MAX_REVOCATION_TTL_SECONDS {
            return Err(ConfigError::InvalidRevocationTtl(self.revocation_ttl_seconds));
        }
        Ok(())
    }

    /// Build the configuration from `APP_JWT_*` environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        let secret = env::var("APP_JWT_SECRET").map_err(|_| ConfigError::MissingSecret)?;
        let mut jwt = JwtConfig::new(secret);

        if let Ok(raw) = env::var("APP_JWT_EXPIRATION_SECONDS") {
            jwt.expiration_seconds = raw
                .parse::<u64>()
                .map_err(|e| anyhow::anyhow!("Invalid APP_JWT_EXPIRATION_SECONDS `{}`: {}", raw, e))?;
        }

        if let Ok(raw) = env::var("APP_JWT_ALGORITHM") {
            jwt.algorithm = raw
                .parse::<Algorithm>()
                .map_err(|e| anyhow::anyhow!("Invalid APP_JWT_ALGORITHM `{}`: {}", raw, e))?;
        }

        let config = Self::new(jwt);
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON document, expanding `${VAR}` references in string values.
    pub fn from_json_str(raw: &str) -> anyhow::Result<Self> {
        let mut value: serde_json::Value = serde_json::from_str(raw)?;
        expand_value(&mut value);
        let config: Self = serde_json::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the config file if one can be found, otherwise from the environment.
    pub fn load() -> anyhow::Result<Self> {
        match resolve_config_path() {
            Some(path) => {
                let raw = fs::read_to_string(&path)
                    .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
                Self::from_json_str(&raw)
            }
            None => Self::from_env(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// No signing secret configured
    MissingSecret,
    /// Signing secret shorter than the algorithm's key size
    SecretTooShort {
        algorithm: Algorithm,
        min: usize,
        actual: usize,
    },
    /// Algorithm outside the HMAC family
    UnsupportedAlgorithm(Algorithm),
    /// Token lifetime of zero
    InvalidTtl,
    /// Principal lookup budget of zero
    InvalidLoaderTimeout,
    /// Denylist entry lifetime above the accepted maximum
    InvalidRevocationTtl(u64),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingSecret => write!(f, "JWT signing secret is not configured"),
            Self::SecretTooShort {
                algorithm,
                min,
                actual,
            } => write!(
                f,
                "JWT secret is {} bytes but {:?} requires at least {}",
                actual, algorithm, min
            ),
            Self::UnsupportedAlgorithm(alg) => {
                write!(f, "Unsupported signing algorithm: {:?}", alg)
            }
            Self::InvalidTtl => write!(f, "Token expiration must be greater than zero"),
            Self::InvalidLoaderTimeout => {
                write!(f, "Principal loader timeout must be greater than zero")
            }
            Self::InvalidRevocationTtl(seconds) => write!(
                f,
                "Revocation TTL of {} seconds exceeds the maximum of {}",
                seconds, MAX_REVOCATION_TTL_SECONDS
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Locate the config file: `SOCIAL_AUTH_CONFIG`, then the XDG config dir, then `./auth.json`.
pub fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(p) = env::var("SOCIAL_AUTH_CONFIG") {
        return Some(PathBuf::from(p));
    }

    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        let candidate = PathBuf::from(xdg).join("social-auth").join("auth.json");
        if candidate.exists() {
            return Some(candidate);
        }
    }

    let candidate = PathBuf::from("auth.json");
    if candidate.exists() {
        return Some(candidate);
    }

    None
}

fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next(); // consume '{'
            let mut name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                name.push(c);
            }
            if let Ok(val) = env::var(&name) {
                out.push_str(&val);
            } else {
                out.push_str("${");
                out.push_str(&name);
                out.push('}');
            }
        } else {
            out.push(ch);
        }
    }

    out
}

fn expand_value(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::String(s) => *s = expand_env_vars(s),
        serde_json::Value::Array(items) => items.iter_mut().for_each(expand_value),
        serde_json::Value::Object(map) => map.values_mut().for_each(expand_value),
        _ => {}
    }
}
