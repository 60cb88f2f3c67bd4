use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::cdp::LaunchOptions;
use crate::engine::Viewport;
use crate::session::SessionConfig;

/// Application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Environment (dev, staging, prod)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// CORS allowed origins, comma separated
    pub cors_origins: Option<String>,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// host[:port] participants reach the server at
    pub public_host: Option<String>,

    /// First page loaded after launch
    #[serde(default = "default_start_url")]
    pub start_url: String,

    /// Free-text address input is searched here
    #[serde(default = "default_search_url")]
    pub search_url: String,

    #[serde(default = "default_viewport_width")]
    pub viewport_width: u32,

    #[serde(default = "default_viewport_height")]
    pub viewport_height: u32,

    // Capture loop
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
    #[serde(default = "default_frame_quality")]
    pub frame_quality: u8,
    #[serde(default = "default_screenshot_timeout_ms")]
    pub screenshot_timeout_ms: u64,
    #[serde(default = "default_page_recovery_delay_ms")]
    pub page_recovery_delay_ms: u64,
    #[serde(default = "default_stream_restart_cooldown_ms")]
    pub stream_restart_cooldown_ms: u64,

    #[serde(default = "default_navigation_timeout_ms")]
    pub navigation_timeout_ms: u64,

    // Browser
    pub chrome_executable: Option<String>,
    #[serde(default = "default_headless")]
    pub headless: bool,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Re-check the control holder when a queued command is about to run
    #[serde(default)]
    pub recheck_control_on_execute: bool,
}

impl Config {
    /// Load configuration from environment variables or app.env file
    pub fn load() -> Result<Self, ConfigError> {
        // Try to load from app.env file first
        if std::path::Path::new("app.env").exists() {
            dotenvy::from_filename("app.env").ok();
        } else {
            // Fallback to .env file
            dotenvy::dotenv().ok();
        }

        Self::from_vars(std::env::vars())
    }

    /// Parse configuration from `NAME=value` pairs
    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Result<Self, ConfigError> {
        envy::from_iter(vars).map_err(ConfigError::EnvError)
    }

    /// Get the full server address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Address the session treats as its own when guarding navigation
    pub fn public_host(&self) -> String {
        self.public_host
            .clone()
            .unwrap_or_else(|| format!("localhost:{}", self.port))
    }

    /// Check if running in development mode
    pub fn is_development(&self) -> bool {
        self.environment.to_lowercase() == "dev" || self.environment.to_lowercase() == "development"
    }

    /// Check if running in production mode
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "prod" || self.environment.to_lowercase() == "production"
    }

    pub fn viewport(&self) -> Viewport {
        Viewport {
            width: self.viewport_width,
            height: self.viewport_height,
        }
    }

    pub fn launch_options(&self) -> LaunchOptions {
        LaunchOptions {
            executable: self.chrome_executable.as_ref().map(PathBuf::from),
            headless: self.headless,
            viewport: self.viewport(),
            request_timeout: Duration::from_millis(self.navigation_timeout_ms),
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        let user_agent = Some(self.user_agent.trim())
            .filter(|ua| !ua.is_empty())
            .map(str::to_string);
        SessionConfig {
            viewport: self.viewport(),
            home_url: self.start_url.clone(),
            navigate_home_on_start: true,
            search_url: self.search_url.clone(),
            public_host: self.public_host(),
            user_agent,
            frame_interval: Duration::from_millis(self.frame_interval_ms),
            frame_quality: self.frame_quality.min(100),
            screenshot_timeout: Duration::from_millis(self.screenshot_timeout_ms),
            navigation_timeout: Duration::from_millis(self.navigation_timeout_ms),
            page_recovery_delay: Duration::from_millis(self.page_recovery_delay_ms),
            stream_restart_cooldown: Duration::from_millis(self.stream_restart_cooldown_ms),
            recheck_control_on_execute: self.recheck_control_on_execute,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            log_level: default_log_level(),
            cors_origins: None,
            public_host: None,
            start_url: default_start_url(),
            search_url: default_search_url(),
            viewport_width: default_viewport_width(),
            viewport_height: default_viewport_height(),
            frame_interval_ms: default_frame_interval_ms(),
            frame_quality: default_frame_quality(),
            screenshot_timeout_ms: default_screenshot_timeout_ms(),
            page_recovery_delay_ms: default_page_recovery_delay_ms(),
            stream_restart_cooldown_ms: default_stream_restart_cooldown_ms(),
            navigation_timeout_ms: default_navigation_timeout_ms(),
            chrome_executable: None,
            headless: default_headless(),
            user_agent: default_user_agent(),
            recheck_control_on_execute: false,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    EnvError(envy::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::EnvError(e) => write!(f, "Environment variable error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_start_url() -> String {
    "https://www.google.com".to_string()
}

fn default_search_url() -> String {
    "https://www.google.com/search".to_string()
}

fn default_viewport_width() -> u32 {
    1280
}

fn default_viewport_height() -> u32 {
    720
}

fn default_frame_interval_ms() -> u64 {
    100
}

fn default_frame_quality() -> u8 {
    60
}

fn default_screenshot_timeout_ms() -> u64 {
    2000
}

fn default_page_recovery_delay_ms() -> u64 {
    1000
}

fn default_stream_restart_cooldown_ms() -> u64 {
    1000
}

fn default_navigation_timeout_ms() -> u64 {
    30_000
}

fn default_headless() -> bool {
    true
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string()
}
