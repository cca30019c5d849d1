use crate::replay::ReplayMode;
use serde::Deserialize;
use std::path::PathBuf;


/// Complete service configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub nats: NatsConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
}

/// Capture activation surface.
#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_output_directory")]
    pub output_directory: PathBuf,

    /// Seconds until the session stops itself; 0 means unbounded.
    #[serde(default = "default_duration_seconds")]
    pub duration_seconds: u64,

    /// Service asset cache, scanned for building-map images.
    #[serde(default = "default_cache_directory")]
    pub cache_directory: PathBuf,
}

fn default_output_directory() -> PathBuf {
    PathBuf::from("./captured_data")
}

fn default_duration_seconds() -> u64 {
    300
}

fn default_cache_directory() -> PathBuf {
    PathBuf::from("run/cache")
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            output_directory: default_output_directory(),
            duration_seconds: default_duration_seconds(),
            cache_directory: default_cache_directory(),
        }
    }
}

/// Middleware pub-sub connection.
#[derive(Debug, Clone, Deserialize)]
pub struct NatsConfig {
    #[serde(default = "default_nats_url")]
    pub url: String,

    /// Subject prefix for the middleware state topics
    /// (`{prefix}.door_states`, `{prefix}.map`, ...).
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
}

fn default_topic_prefix() -> String {
    "rmf".to_string()
}

fn default_nats_url() -> String {
    std::env::var("NATS_URL").unwrap_or_else(|_| "nats://localhost:4222".to_string())
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: default_nats_url(),
            topic_prefix: default_topic_prefix(),
        }
    }
}

/// Replay defaults; `source_file` always comes from the invocation.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplayConfig {
    #[serde(default)]
    pub mode: ReplayMode,

    #[serde(default = "default_speed_multiplier")]
    pub speed_multiplier: f64,

    #[serde(default)]
    pub info_only: bool,
}

fn default_speed_multiplier() -> f64 {
    1.0
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            mode: ReplayMode::default(),
            speed_multiplier: default_speed_multiplier(),
            info_only: false,
        }
    }
}

/// Load configuration from a TOML file.
pub fn load_config(path: &str) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read config file {}: {}", path, e))?;
    let config: Config = toml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {}", path, e))?;
    Ok(config)
}

/// Apply the environment overrides the service honors:
/// `RMF_CAPTURE_DATA`, `RMF_CAPTURE_OUTPUT_DIR`, `RMF_CAPTURE_DURATION`,
/// `NATS_URL`.
pub fn apply_env_overrides(config: &mut Config) {
    if let Ok(v) = std::env::var("RMF_CAPTURE_DATA") {
        config.capture.enabled = matches!(v.to_lowercase().as_str(), "1" | "true" | "yes");
    }
    if let Ok(v) = std::env::var("RMF_CAPTURE_OUTPUT_DIR") {
        config.capture.output_directory = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("RMF_CAPTURE_DURATION") {
        if let Ok(secs) = v.parse::<u64>() {
            config.capture.duration_seconds = secs;
        }
    }
    if let Ok(v) = std::env::var("NATS_URL") {
        config.nats.url = v;
    }
}
