//! Configuration module for the Tagged backend.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Pre-shared key for API authentication (required in production)
    pub api_psk: Option<String>,
    /// Path to SQLite database file
    pub db_path: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// How often the rotation scheduler checks for due groups
    pub rotation_check_interval: Duration,
    /// Push notification service endpoint; unset disables fanout
    pub push_url: Option<String>,
    /// Image-safety classifier endpoint; unset leaves posts pending
    pub vision_url: Option<String>,
    /// Blob store endpoint; unset skips image cleanup on post deletion
    pub blob_url: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let api_psk = env::var("TAGGED_API_PSK").ok();

        let db_path = env::var("TAGGED_DB_PATH")
            .unwrap_or_else(|_| "./data/app.sqlite".to_string())
            .into();

        let bind_addr = env::var("TAGGED_BIND_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()
            .expect("Invalid TAGGED_BIND_ADDR format");

        let log_level = env::var("TAGGED_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let rotation_check_interval = env::var("TAGGED_ROTATION_CHECK_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(60));

        let push_url = env::var("TAGGED_PUSH_URL").ok();
        let vision_url = env::var("TAGGED_VISION_URL").ok();
        let blob_url = env::var("TAGGED_BLOB_URL").ok();

        Self {
            api_psk,
            db_path,
            bind_addr,
            log_level,
            rotation_check_interval,
            push_url,
            vision_url,
            blob_url,
        }
    }
}
