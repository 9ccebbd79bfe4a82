use axum::http::HeaderValue;
use cws_terminal::SessionConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_shell")]
    pub shell: String,

    /// Working directory for new shells; `$HOME` when unset.
    #[serde(default = "default_terminal_cwd")]
    pub terminal_cwd: Option<PathBuf>,

    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,

    #[serde(default = "default_backlog_bytes")]
    pub output_backlog_bytes: usize,

    #[serde(default = "default_reconnect_grace")]
    pub reconnect_grace_secs: u64,
}

fn default_bind_addr() -> String {
    std::env::var("CWS_GATEWAY_BIND").unwrap_or_else(|_| "0.0.0.0:8002".to_string())
}

fn default_shell() -> String {
    std::env::var("CWS_SHELL").unwrap_or_else(|_| "bash".to_string())
}

fn default_terminal_cwd() -> Option<PathBuf> {
    std::env::var_os("CWS_TERMINAL_CWD")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn default_cors_origin() -> String {
    std::env::var("CWS_CORS_ORIGIN").unwrap_or_else(|_| "*".to_string())
}

fn default_backlog_bytes() -> usize {
    std::env::var("CWS_OUTPUT_BACKLOG_BYTES")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(64 * 1024)
}

fn default_reconnect_grace() -> u64 {
    std::env::var("CWS_RECONNECT_GRACE_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            shell: default_shell(),
            terminal_cwd: default_terminal_cwd(),
            cors_origin: default_cors_origin(),
            output_backlog_bytes: default_backlog_bytes(),
            reconnect_grace_secs: default_reconnect_grace(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default()
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            shell: self.shell.clone(),
            cwd: self.terminal_cwd.clone(),
            backlog_bytes: self.output_backlog_bytes,
            reconnect_grace: Duration::from_secs(self.reconnect_grace_secs),
            ..Default::default()
        }
    }

    pub fn cors_layer(&self) -> CorsLayer {
        let origin = self.cors_origin.trim();
        if origin == "*" {
            return CorsLayer::new().allow_origin(Any);
        }
        match HeaderValue::from_str(origin) {
            Ok(value) => CorsLayer::new().allow_origin(value),
            Err(_) => {
                warn!(origin, "invalid CWS_CORS_ORIGIN, allowing any origin");
                CorsLayer::new().allow_origin(Any)
            }
        }
    }
}
