//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml
//!
//! `MAIN_API_TOKEN` in the environment overrides `[directory].token`.

use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

/// Environment variable carrying the directory / feed bearer token
pub const TOKEN_ENV_VAR: &str = "MAIN_API_TOKEN";

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SiteConfig {
    #[serde(default = "default_site_id")]
    pub id: String,
    /// Deployment label reported by the status endpoint
    #[serde(default = "default_environment")]
    pub environment: String,
}

fn default_site_id() -> String {
    "facility".to_string()
}

fn default_environment() -> String {
    "dev".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryConfig {
    pub base_url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_directory_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_directory_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_readings_file")]
    pub readings_file: String,
    #[serde(default = "default_positions_file")]
    pub positions_file: String,
    #[serde(default = "default_sessions_file")]
    pub sessions_file: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            readings_file: default_readings_file(),
            positions_file: default_positions_file(),
            sessions_file: default_sessions_file(),
        }
    }
}

fn default_readings_file() -> String {
    "data/raw_readings.jsonl".to_string()
}

fn default_positions_file() -> String {
    "data/positions.jsonl".to_string()
}

fn default_sessions_file() -> String {
    "data/sessions.jsonl".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Push sessions to the positions API
    #[serde(default = "default_feed_enabled")]
    pub enabled: bool,
    #[serde(default = "default_feed_path")]
    pub path: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self { enabled: default_feed_enabled(), path: default_feed_path() }
    }
}

fn default_feed_enabled() -> bool {
    true
}

fn default_feed_path() -> String {
    "/api/positions".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeometryConfig {
    /// Far end of the point-in-polygon ray; must exceed every area's x-extent
    #[serde(default = "default_ray_far_x")]
    pub ray_far_x: f64,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self { ray_far_x: default_ray_far_x() }
    }
}

fn default_ray_far_x() -> f64 {
    10_000.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrilaterationConfig {
    /// Decimal places kept in solved coordinates
    #[serde(default = "default_decimals")]
    pub decimals: u32,
    /// Decimal places kept in input distances
    #[serde(default = "default_distance_decimals")]
    pub distance_decimals: u32,
}

impl Default for TrilaterationConfig {
    fn default() -> Self {
        Self { decimals: default_decimals(), distance_decimals: default_distance_decimals() }
    }
}

fn default_decimals() -> u32 {
    2
}

fn default_distance_decimals() -> u32 {
    6
}

#[derive(Debug, Clone, Deserialize)]
pub struct SegmenterConfig {
    #[serde(default = "default_split_gap_secs")]
    pub split_gap_secs: u64,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self { split_gap_secs: default_split_gap_secs() }
    }
}

fn default_split_gap_secs() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_server_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind_address: default_bind_address(), port: default_server_port() }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    3001
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    /// Window used when a trigger carries no timestamp
    #[serde(default = "default_lookback_secs")]
    pub default_lookback_secs: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self { queue_size: default_queue_size(), default_lookback_secs: default_lookback_secs() }
    }
}

fn default_queue_size() -> usize {
    16
}

fn default_lookback_secs() -> u64 {
    3600
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    pub directory: DirectoryConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub geometry: GeometryConfig,
    #[serde(default)]
    pub trilateration: TrilaterationConfig,
    #[serde(default)]
    pub segmenter: SegmenterConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    environment: String,
    directory_base_url: String,
    directory_token: Option<String>,
    directory_timeout_ms: u64,
    readings_file: String,
    positions_file: String,
    sessions_file: String,
    feed_enabled: bool,
    feed_path: String,
    ray_far_x: f64,
    decimals: u32,
    distance_decimals: u32,
    split_gap_secs: u64,
    bind_address: String,
    server_port: u16,
    queue_size: usize,
    default_lookback_secs: u64,
    log_json: bool,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            site_id: default_site_id(),
            environment: default_environment(),
            directory_base_url: "http://localhost:3000".to_string(),
            directory_token: None,
            directory_timeout_ms: default_directory_timeout_ms(),
            readings_file: default_readings_file(),
            positions_file: default_positions_file(),
            sessions_file: default_sessions_file(),
            feed_enabled: default_feed_enabled(),
            feed_path: default_feed_path(),
            ray_far_x: default_ray_far_x(),
            decimals: default_decimals(),
            distance_decimals: default_distance_decimals(),
            split_gap_secs: default_split_gap_secs(),
            bind_address: default_bind_address(),
            server_port: default_server_port(),
            queue_size: default_queue_size(),
            default_lookback_secs: default_lookback_secs(),
            log_json: false,
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str, source: &str) -> anyhow::Result<Self> {
        let toml_config: TomlConfig = toml::from_str(content)
            .with_context(|| format!("Failed to parse config file {}", source))?;

        Ok(Self {
            site_id: toml_config.site.id,
            environment: toml_config.site.environment,
            directory_base_url: toml_config.directory.base_url,
            directory_token: toml_config.directory.token,
            directory_timeout_ms: toml_config.directory.timeout_ms,
            readings_file: toml_config.store.readings_file,
            positions_file: toml_config.store.positions_file,
            sessions_file: toml_config.store.sessions_file,
            feed_enabled: toml_config.feed.enabled,
            feed_path: toml_config.feed.path,
            ray_far_x: toml_config.geometry.ray_far_x,
            decimals: toml_config.trilateration.decimals,
            distance_decimals: toml_config.trilateration.distance_decimals,
            split_gap_secs: toml_config.segmenter.split_gap_secs,
            bind_address: toml_config.server.bind_address,
            server_port: toml_config.server.port,
            queue_size: toml_config.jobs.queue_size.max(1),
            default_lookback_secs: toml_config.jobs.default_lookback_secs,
            log_json: toml_config.logging.json,
            config_file: source.to_string(),
        })
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        Self::from_toml_str(&content, &path.display().to_string())
    }

    /// Load configuration from a path, falling back to defaults, then apply env overrides
    pub fn load_from_path(path: &str) -> Self {
        let config = match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                Self::default()
            }
        };
        config.with_env_overrides()
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load(args: &[String]) -> Self {
        Self::load_from_path(&Self::resolve_config_path(args))
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(token) = env::var(TOKEN_ENV_VAR) {
            if !token.is_empty() {
                self.directory_token = Some(token);
            }
        }
        self
    }

    // Getters for all config fields
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn directory_base_url(&self) -> &str {
        &self.directory_base_url
    }

    pub fn directory_token(&self) -> Option<&str> {
        self.directory_token.as_deref()
    }

    pub fn directory_timeout_ms(&self) -> u64 {
        self.directory_timeout_ms
    }

    pub fn readings_file(&self) -> &str {
        &self.readings_file
    }

    pub fn positions_file(&self) -> &str {
        &self.positions_file
    }

    pub fn sessions_file(&self) -> &str {
        &self.sessions_file
    }

    pub fn feed_enabled(&self) -> bool {
        self.feed_enabled
    }

    pub fn feed_path(&self) -> &str {
        &self.feed_path
    }

    pub fn ray_far_x(&self) -> f64 {
        self.ray_far_x
    }

    pub fn decimals(&self) -> u32 {
        self.decimals
    }

    pub fn distance_decimals(&self) -> u32 {
        self.distance_decimals
    }

    pub fn split_gap_secs(&self) -> u64 {
        self.split_gap_secs
    }

    pub fn bind_address(&self) -> &str {
        &self.bind_address
    }

    pub fn server_port(&self) -> u16 {
        self.server_port
    }

    pub fn queue_size(&self) -> usize {
        self.queue_size
    }

    pub fn default_lookback_secs(&self) -> u64 {
        self.default_lookback_secs
    }

    pub fn log_json(&self) -> bool {
        self.log_json
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to point clients at another base URL
    #[cfg(test)]
    pub fn with_directory_base_url(mut self, url: &str) -> Self {
        self.directory_base_url = url.to_string();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server_port(), 3001);
        assert_eq!(config.ray_far_x(), 10_000.0);
        assert_eq!(config.decimals(), 2);
        assert_eq!(config.split_gap_secs(), 5);
        assert_eq!(config.feed_path(), "/api/positions");
        assert!(config.feed_enabled());
        assert!(config.directory_token().is_none());
    }

    #[test]
    fn test_minimal_toml_uses_section_defaults() {
        let config = Config::from_toml_str(
            r#"
[directory]
base_url = "http://directory.local"
"#,
            "inline",
        )
        .unwrap();

        assert_eq!(config.directory_base_url(), "http://directory.local");
        assert_eq!(config.directory_timeout_ms(), 5000);
        assert_eq!(config.sessions_file(), "data/sessions.jsonl");
        assert_eq!(config.queue_size(), 16);
        assert_eq!(config.config_file(), "inline");
    }

    #[test]
    fn test_missing_directory_section_is_an_error() {
        let result = Config::from_toml_str("[site]\nid = \"x\"\n", "inline");
        assert!(result.is_err());
    }

    #[test]
    fn test_queue_size_is_at_least_one() {
        let config = Config::from_toml_str(
            "[directory]\nbase_url = \"http://d\"\n[jobs]\nqueue_size = 0\n",
            "inline",
        )
        .unwrap();
        assert_eq!(config.queue_size(), 1);
    }

    #[test]
    fn test_resolve_config_path_from_arg() {
        let args: Vec<String> =
            vec!["beacon-positioning".to_string(), "--config".to_string(), "config/prod.toml".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/prod.toml");
    }

    #[test]
    fn test_resolve_config_path_from_arg_equals() {
        let args: Vec<String> =
            vec!["beacon-positioning".to_string(), "--config=config/site.toml".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/site.toml");
    }
}
