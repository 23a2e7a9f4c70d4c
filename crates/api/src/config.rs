use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use axum::http::HeaderValue;
use genrelay_comfyui::client::ws_url_from_api_url;
use genrelay_core::images::{ImageUrlBuilder, DEFAULT_IMAGE_PATH};
use genrelay_core::stage::{StageConfig, StageMatcher, DEFAULT_PREVIEW_STAGE, DEFAULT_PROGRESS_STAGE};
use genrelay_core::workflow::{WorkflowBindings, DEFAULT_PROMPT_NODE, DEFAULT_SEED_NODE};

use crate::ws::monitor::MonitorSettings;

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("expected 'text' or 'json', got '{other}'")),
        }
    }
}

/// A configuration variable with an unusable value.
#[derive(Debug, thiserror::Error)]
#[error("Invalid value '{value}' for {var}: {reason}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: String,
}

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development against a
/// ComfyUI instance on the same machine.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`.
    pub cors_origins: Vec<HeaderValue>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// ComfyUI HTTP base URL.
    pub comfyui_api_url: String,
    /// ComfyUI WebSocket base URL.
    pub comfyui_ws_url: String,
    /// Directory holding `<name>.json` workflow templates.
    pub workflow_dir: PathBuf,
    pub prompt_node: String,
    pub seed_node: String,
    /// Substring identifying progress-bearing nodes.
    pub progress_stage: String,
    /// Exact id of the node whose binary frames are previews.
    pub preview_stage: String,
    /// Path of the relay's image endpoint, used in derived image URLs.
    pub image_path: String,
    /// Idle limit for progress monitors; `None` disables it.
    pub monitor_idle_timeout_secs: Option<u64>,
    pub heartbeat_interval_secs: u64,
    pub log_format: LogFormat,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                     | Default                      |
    /// |-----------------------------|------------------------------|
    /// | `HOST`                      | `0.0.0.0`                    |
    /// | `PORT`                      | `8000`                       |
    /// | `CORS_ORIGINS`              | `http://localhost:5173`      |
    /// | `REQUEST_TIMEOUT_SECS`      | `30`                         |
    /// | `COMFYUI_API_URL`           | `http://127.0.0.1:8188`      |
    /// | `COMFYUI_WS_URL`            | derived from the API URL     |
    /// | `WORKFLOW_DIR`              | `workflow`                   |
    /// | `PROMPT_NODE_ID`            | `4`                          |
    /// | `SEED_NODE_ID`              | `11`                         |
    /// | `PROGRESS_STAGE`            | `KSampler`                   |
    /// | `PREVIEW_STAGE`             | `save_image_websocket_node`  |
    /// | `IMAGE_PATH`                | `/api/image`                 |
    /// | `MONITOR_IDLE_TIMEOUT_SECS` | unset (no timeout)           |
    /// | `HEARTBEAT_INTERVAL_SECS`   | `30`                         |
    /// | `LOG_FORMAT`                | `text`                       |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str, default: &str| -> String {
            lookup(var)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let comfyui_api_url = get("COMFYUI_API_URL", "http://127.0.0.1:8188");
        let comfyui_ws_url = lookup("COMFYUI_WS_URL")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| ws_url_from_api_url(&comfyui_api_url));

        let monitor_idle_timeout_secs = match lookup("MONITOR_IDLE_TIMEOUT_SECS") {
            Some(raw) if !raw.trim().is_empty() => {
                Some(parse_nonzero("MONITOR_IDLE_TIMEOUT_SECS", &raw)?)
            }
            _ => None,
        };

        Ok(Self {
            host: get("HOST", "0.0.0.0"),
            port: parse("PORT", &get("PORT", "8000"))?,
            cors_origins: parse_origins(&get("CORS_ORIGINS", "http://localhost:5173"))?,
            request_timeout_secs: parse("REQUEST_TIMEOUT_SECS", &get("REQUEST_TIMEOUT_SECS", "30"))?,
            comfyui_api_url,
            comfyui_ws_url,
            workflow_dir: PathBuf::from(get("WORKFLOW_DIR", "workflow")),
            prompt_node: get("PROMPT_NODE_ID", DEFAULT_PROMPT_NODE),
            seed_node: get("SEED_NODE_ID", DEFAULT_SEED_NODE),
            progress_stage: get("PROGRESS_STAGE", DEFAULT_PROGRESS_STAGE),
            preview_stage: get("PREVIEW_STAGE", DEFAULT_PREVIEW_STAGE),
            image_path: get("IMAGE_PATH", DEFAULT_IMAGE_PATH),
            monitor_idle_timeout_secs,
            heartbeat_interval_secs: parse_nonzero(
                "HEARTBEAT_INTERVAL_SECS",
                &get("HEARTBEAT_INTERVAL_SECS", "30"),
            )?,
            log_format: parse("LOG_FORMAT", &get("LOG_FORMAT", "text"))?,
        })
    }

    pub fn workflow_bindings(&self) -> WorkflowBindings {
        WorkflowBindings {
            prompt_node: self.prompt_node.clone(),
            seed_node: self.seed_node.clone(),
        }
    }

    pub fn stage_config(&self) -> StageConfig {
        StageConfig::new(
            StageMatcher::Contains(self.progress_stage.clone()),
            StageMatcher::Exact(self.preview_stage.clone()),
        )
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            stages: self.stage_config(),
            images: ImageUrlBuilder::new(self.image_path.clone()),
            seed_node: self.seed_node.clone(),
            idle_timeout: self.monitor_idle_timeout_secs.map(Duration::from_secs),
        }
    }
}

// ---- private helpers ----

fn parse<T>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError {
        var,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn parse_nonzero(var: &'static str, raw: &str) -> Result<u64, ConfigError> {
    match parse::<u64>(var, raw)? {
        0 => Err(ConfigError {
            var,
            value: raw.to_string(),
            reason: "must be greater than zero".to_string(),
        }),
        n => Ok(n),
    }
}

fn parse_origins(raw: &str) -> Result<Vec<HeaderValue>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|origin| {
            HeaderValue::from_str(origin).map_err(|e| ConfigError {
                var: "CORS_ORIGINS",
                value: origin.to_string(),
                reason: e.to_string(),
            })
        })
        .collect()
}
