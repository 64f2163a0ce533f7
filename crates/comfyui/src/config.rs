use std::time::Duration;

/// Default ComfyUI base URL.
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8188";

/// Default overall wait budget per prompt.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Default delay between history polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// How often the wait loop checks the verdict slot in stream mode.
pub const DEFAULT_STREAM_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// How long a drained queue waits for an authoritative signal.
pub const DEFAULT_QUEUE_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Per-request HTTP timeout and WebSocket handshake timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Watcher configuration.
///
/// Built explicitly (or via [`WatchConfig::from_env`]) and handed to a
/// [`Watcher`](crate::watcher::Watcher); nothing is read from globals
/// after construction.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Base HTTP URL (e.g. `http://host:8188`).
    pub api_url: String,
    /// Base WebSocket URL (e.g. `ws://host:8188`).
    pub ws_url: String,
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub stream_check_interval: Duration,
    pub queue_drain_grace: Duration,
    pub request_timeout: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self::new(DEFAULT_API_URL)
    }
}

impl WatchConfig {
    /// Configuration for `api_url` with the WebSocket URL derived from it
    /// and default timings.
    pub fn new(api_url: impl Into<String>) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self {
            ws_url: derive_ws_url(&api_url),
            api_url,
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            stream_check_interval: DEFAULT_STREAM_CHECK_INTERVAL,
            queue_drain_grace: DEFAULT_QUEUE_DRAIN_GRACE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                        | Default                      |
    /// |--------------------------------|------------------------------|
    /// | `COMFYUI_URL`                  | `http://127.0.0.1:8188`      |
    /// | `COMFYUI_WS_URL`               | derived from `COMFYUI_URL`   |
    /// | `COMFYUI_TIMEOUT_SECS`         | `300`                        |
    /// | `COMFYUI_POLL_INTERVAL_MS`     | `1000`                       |
    /// | `COMFYUI_REQUEST_TIMEOUT_SECS` | `5`                          |
    ///
    /// Unparseable numbers fall back to the default.
    pub fn from_env() -> Self {
        let api_url = std::env::var("COMFYUI_URL").unwrap_or_else(|_| DEFAULT_API_URL.into());
        let mut config = Self::new(api_url);

        if let Ok(ws_url) = std::env::var("COMFYUI_WS_URL") {
            config.ws_url = ws_url.trim_end_matches('/').to_string();
        }
        if let Some(secs) = env_u64("COMFYUI_TIMEOUT_SECS") {
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = env_u64("COMFYUI_POLL_INTERVAL_MS") {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = env_u64("COMFYUI_REQUEST_TIMEOUT_SECS") {
            config.request_timeout = Duration::from_secs(secs);
        }
        config
    }
}

/// `http://` becomes `ws://` and `https://` becomes `wss://`. A URL
/// without a scheme is assumed to be plain `ws://`.
pub fn derive_ws_url(api_url: &str) -> String {
    let trimmed = api_url.trim_end_matches('/');
    if let Some(rest) = trimmed.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if trimmed.starts_with("ws://") || trimmed.starts_with("wss://") {
        trimmed.to_string()
    } else {
        format!("ws://{trimmed}")
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}
