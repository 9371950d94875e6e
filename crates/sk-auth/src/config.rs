use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use sk_store::StoragePolicy;
use url::Url;

use crate::errors::{Result, SessionError};

/// Refresh endpoint path relative to the API base URL
pub const DEFAULT_REFRESH_PATH: &str = "/api/v1/auth/refresh";

/// Consecutive refresh failures tolerated before the session is dropped
pub const MAX_REFRESH_ATTEMPTS: u32 = 3;

/// No refresh is attempted this soon after a credential was saved
pub const REFRESH_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Upper bound for one refresh call
pub const REFRESH_TIMEOUT: Duration = Duration::from_secs(10);

/// Time skew for token expiration (refresh 30 seconds early)
pub const TOKEN_EXPIRY_SKEW: Duration = Duration::from_secs(30);

/// Prefix of the persisted credential keys
pub const DEFAULT_KEY_PREFIX: &str = "session_";

/// Names of the four persisted credential entries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageKeys {
    pub access_token: String,
    pub refresh_token: String,
    pub subject_id: String,
    pub saved_at: String,
}

impl StorageKeys {
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            access_token: format!("{prefix}access_token"),
            refresh_token: format!("{prefix}refresh_token"),
            subject_id: format!("{prefix}subject_id"),
            saved_at: format!("{prefix}saved_at"),
        }
    }

    pub fn all(&self) -> [&str; 4] {
        [
            self.access_token.as_str(),
            self.refresh_token.as_str(),
            self.subject_id.as_str(),
            self.saved_at.as_str(),
        ]
    }
}

impl Default for StorageKeys {
    fn default() -> Self {
        Self::with_prefix(DEFAULT_KEY_PREFIX)
    }
}

/// HTTP client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpTimeouts {
    pub connect: Duration,
    pub request: Duration,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(15),
            request: Duration::from_secs(30),
        }
    }
}

/// Refresh coordination policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshPolicy {
    pub max_attempts: u32,
    pub grace_window: Duration,
    pub timeout: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_REFRESH_ATTEMPTS,
            grace_window: REFRESH_GRACE_PERIOD,
            timeout: REFRESH_TIMEOUT,
        }
    }
}

/// Configuration for a `Session`
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base URL that relative request paths are resolved against
    pub api_base_url: Url,

    /// Refresh endpoint path
    pub refresh_path: String,

    /// Persisted key names
    pub keys: StorageKeys,

    /// Storage retry policy
    pub storage: StoragePolicy,

    /// Refresh retry and grace policy
    pub refresh: RefreshPolicy,

    /// Tokens expiring within this margin are refreshed before use
    pub expiry_margin: Duration,

    /// HTTP client timeouts
    pub http_timeouts: HttpTimeouts,

    /// Custom user agent (optional)
    pub user_agent: Option<String>,
}

impl SessionConfig {
    pub fn new(api_base_url: Url) -> Self {
        Self {
            api_base_url,
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
            keys: StorageKeys::default(),
            storage: StoragePolicy::default(),
            refresh: RefreshPolicy::default(),
            expiry_margin: TOKEN_EXPIRY_SKEW,
            http_timeouts: HttpTimeouts::default(),
            user_agent: Some("session-keeper".to_string()),
        }
    }

    /// Resolve a request URL; absolute URLs pass through unchanged
    pub fn resolve(&self, url: &str) -> Result<Url> {
        if url.starts_with("http://") || url.starts_with("https://") {
            return Url::parse(url).map_err(|e| SessionError::Config(format!("{url}: {e}")));
        }

        let base = self.api_base_url.as_str().trim_end_matches('/');
        let joined = if url.starts_with('/') {
            format!("{base}{url}")
        } else {
            format!("{base}/{url}")
        };

        Url::parse(&joined).map_err(|e| SessionError::Config(format!("{joined}: {e}")))
    }

    pub fn refresh_url(&self) -> Result<Url> {
        self.resolve(&self.refresh_path)
    }

    /// Parse the TOML form of the configuration
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: ConfigFile =
            toml::from_str(content).map_err(|e| SessionError::Config(e.to_string()))?;
        file.into_config()
    }

    /// Read and parse a TOML configuration file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| SessionError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }
}

/// On-disk configuration; every field except the base URL is optional
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    api_base_url: String,
    refresh_path: Option<String>,
    key_prefix: Option<String>,
    expiry_margin_ms: Option<u64>,
    user_agent: Option<String>,
    #[serde(default)]
    refresh: RefreshSection,
    #[serde(default)]
    storage: StorageSection,
    #[serde(default)]
    http: HttpSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RefreshSection {
    max_attempts: Option<u32>,
    grace_window_ms: Option<u64>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct StorageSection {
    read_retries: Option<u32>,
    verify_attempts: Option<u32>,
    backoff_step_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct HttpSection {
    connect_timeout_ms: Option<u64>,
    request_timeout_ms: Option<u64>,
}

impl ConfigFile {
    fn into_config(self) -> Result<SessionConfig> {
        let base = Url::parse(&self.api_base_url)
            .map_err(|e| SessionError::Config(format!("api_base_url: {e}")))?;
        let mut config = SessionConfig::new(base);
        let ms = Duration::from_millis;

        if let Some(path) = self.refresh_path {
            config.refresh_path = path;
        }
        if let Some(prefix) = self.key_prefix {
            config.keys = StorageKeys::with_prefix(&prefix);
        }
        if let Some(margin) = self.expiry_margin_ms {
            config.expiry_margin = ms(margin);
        }
        if self.user_agent.is_some() {
            config.user_agent = self.user_agent;
        }

        if let Some(max_attempts) = self.refresh.max_attempts {
            if max_attempts == 0 {
                return Err(SessionError::Config(
                    "refresh.max_attempts must be at least 1".to_string(),
                ));
            }
            config.refresh.max_attempts = max_attempts;
        }
        if let Some(grace) = self.refresh.grace_window_ms {
            config.refresh.grace_window = ms(grace);
        }
        if let Some(timeout) = self.refresh.timeout_ms {
            config.refresh.timeout = ms(timeout);
        }

        if let Some(retries) = self.storage.read_retries {
            config.storage.read_retries = retries;
        }
        if let Some(attempts) = self.storage.verify_attempts {
            config.storage.verify_attempts = attempts;
        }
        if let Some(step) = self.storage.backoff_step_ms {
            config.storage.backoff_step = ms(step);
        }

        if let Some(connect) = self.http.connect_timeout_ms {
            config.http_timeouts.connect = ms(connect);
        }
        if let Some(request) = self.http.request_timeout_ms {
            config.http_timeouts.request = ms(request);
        }

        Ok(config)
    }
}
