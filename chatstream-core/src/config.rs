use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct AuthCfg {
    /// Name of the environment variable that contains the `x-auth-token` value.
    #[serde(default)]
    pub token_env: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HttpCfg {
    /// TCP connect timeout in milliseconds (default 5000ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Total timeout for plain JSON calls in milliseconds (default 60000ms).
    /// Streaming responses are not bound by it.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Optional per-host idle connection pool cap (None = reqwest default)
    #[serde(default)]
    pub pool_max_idle_per_host: Option<usize>,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            pool_max_idle_per_host: None,
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_request_timeout_ms() -> u64 {
    60_000
}

/// Render-rate limiter knobs.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct StreamCfg {
    /// Deltas closer together than this count towards a burst (one frame).
    #[serde(default = "default_throttle_window_ms")]
    pub throttle_window_ms: u64,
    /// Notifications allowed inside one burst before ticks are skipped.
    #[serde(default = "default_max_burst")]
    pub max_burst: u32,
    /// Frame length. A scheduled notification is delivered on the next frame
    /// boundary, so it waits anywhere up to one interval.
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
}

impl Default for StreamCfg {
    fn default() -> Self {
        Self {
            throttle_window_ms: default_throttle_window_ms(),
            max_burst: default_max_burst(),
            frame_interval_ms: default_frame_interval_ms(),
        }
    }
}

impl StreamCfg {
    pub fn throttle_window(&self) -> Duration {
        Duration::from_millis(self.throttle_window_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

fn default_throttle_window_ms() -> u64 {
    crate::assembler::THROTTLE_WINDOW_MS
}
fn default_max_burst() -> u32 {
    crate::assembler::MAX_BURST
}
fn default_frame_interval_ms() -> u64 {
    16
}

fn default_base_url() -> String {
    "http://localhost:3000/api".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Config {
    /// API root; `/chat` and `/chats` are resolved against it.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub auth: AuthCfg,
    /// HTTP client configuration (timeouts, pooling). Missing → defaults.
    #[serde(default)]
    pub http: HttpCfg,
    #[serde(default)]
    pub stream: StreamCfg,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            auth: AuthCfg::default(),
            http: HttpCfg::default(),
            stream: StreamCfg::default(),
        }
    }
}

impl Config {
    /// Load a Config from a file path (JSON or TOML by extension). If the
    /// extension is missing or unrecognized, try JSON first, then TOML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> crate::error::CoreResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(crate::error::ChatStreamError::from)?;
        let s = std::str::from_utf8(&bytes)
            .map_err(|e| crate::error::ChatStreamError::Other(e.into()))?;
        let cfg: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str::<Self>(s)
                .map_err(|e| crate::error::ChatStreamError::Other(e.into()))?,
            Some("toml") => toml::from_str::<Self>(s)
                .map_err(|e| crate::error::ChatStreamError::Other(e.into()))?,
            _ => serde_json::from_str::<Self>(s)
                .map_err(|e| crate::error::ChatStreamError::Other(e.into()))
                .or_else(|_| {
                    toml::from_str::<Self>(s)
                        .map_err(|e| crate::error::ChatStreamError::Other(e.into()))
                })?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values that would make the stream loop misbehave.
    pub fn validate(&self) -> crate::error::CoreResult<()> {
        use crate::error::ChatStreamError::Validation;
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(Validation(format!(
                "base_url must be an http(s) URL, got '{}'",
                self.base_url
            )));
        }
        if self.stream.max_burst == 0 {
            return Err(Validation("stream.max_burst must be at least 1".into()));
        }
        if self.stream.frame_interval_ms == 0 {
            return Err(Validation("stream.frame_interval_ms must be positive".into()));
        }
        Ok(())
    }

    /// Resolve the auth token from the configured environment variable, if any.
    pub fn auth_token(&self) -> Option<secrecy::SecretString> {
        let var = self.auth.token_env.as_deref()?;
        std::env::var(var)
            .ok()
            .filter(|v| !v.is_empty())
            .map(|v| secrecy::SecretString::new(v.into()))
    }
}
