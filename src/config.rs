//! Runtime configuration, resolved from the environment.
//!
//! | Variable        | Meaning                         | Default                  |
//! |-----------------|---------------------------------|--------------------------|
//! | `MCP_WS_URL`    | Backend WebSocket URL           | `ws://localhost:7310`    |
//! | `MCP_STDIO_LOG` | Diagnostic log file ("" = off)  | see [`default_log_path`] |
//! | `RUST_LOG`      | `tracing` filter                | `opendocs_bridge=info`   |

use std::path::PathBuf;

use thiserror::Error;
use url::Url;

/// Backend address used when `MCP_WS_URL` is unset.
pub const DEFAULT_BACKEND_URL: &str = "ws://localhost:7310";

/// Environment variable overriding the backend address.
pub const BACKEND_URL_ENV: &str = "MCP_WS_URL";

/// Environment variable overriding the log file location.
pub const LOG_FILE_ENV: &str = "MCP_STDIO_LOG";

/// Log file name inside the default log directory.
const LOG_FILE_NAME: &str = "mcp-stdio.log";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid backend URL {value:?}: {source}")]
    InvalidUrl {
        value: String,
        #[source]
        source: url::ParseError,
    },

    #[error("unsupported backend URL scheme {scheme:?} (expected ws or wss)")]
    UnsupportedScheme { scheme: String },
}

/// Resolved bridge settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Backend WebSocket URL.
    pub backend_url: Url,
    /// Diagnostic log file, `None` to log to stderr only.
    pub log_file: Option<PathBuf>,
}

impl BridgeConfig {
    /// Read settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if `MCP_WS_URL` is not a usable URL.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(
            std::env::var(BACKEND_URL_ENV).ok(),
            std::env::var(LOG_FILE_ENV).ok(),
        )
    }

    /// Build settings from explicit variable values.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if `backend_url` is not a usable URL.
    pub fn from_vars(
        backend_url: Option<String>,
        log_file: Option<String>,
    ) -> Result<Self, ConfigError> {
        let backend_url = match backend_url.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => parse_backend_url(raw)?,
            _ => parse_backend_url(DEFAULT_BACKEND_URL)?,
        };

        let log_file = match log_file {
            Some(path) if path.trim().is_empty() => None,
            Some(path) => Some(PathBuf::from(path)),
            None => Some(default_log_path()),
        };

        Ok(Self {
            backend_url,
            log_file,
        })
    }
}

/// Parse a backend URL, mapping `http(s)` onto `ws(s)`.
///
/// # Errors
///
/// Returns a [`ConfigError`] for unparsable URLs or schemes other than
/// `ws`, `wss`, `http` and `https`.
pub fn parse_backend_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(&http_to_ws_scheme(raw)).map_err(|source| ConfigError::InvalidUrl {
        value: raw.to_string(),
        source,
    })?;

    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(ConfigError::UnsupportedScheme {
            scheme: other.to_string(),
        }),
    }
}

/// Convert an HTTP(S) URL to the WS(S) scheme; `ws://` and `wss://` pass
/// through unchanged.
fn http_to_ws_scheme(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        url.to_string()
    }
}

/// Resolve the default log file path.
///
/// Resolution order:
/// 1. `<cache dir>/opendocs-bridge/mcp-stdio.log` (`~/.cache` on Linux,
///    `~/Library/Caches` on macOS)
/// 2. `<temp dir>/opendocs-bridge/mcp-stdio.log`
pub fn default_log_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("opendocs-bridge")
        .join(LOG_FILE_NAME)
}
