//! Configuration module for the Fellowship backend.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use chrono::Duration;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to SQLite database file
    pub db_path: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Emit logs as JSON lines instead of human-readable text
    pub log_json: bool,
    /// Email address whose profile is bootstrapped with the admin role
    pub admin_email: Option<String>,
    /// Lifetime of a session token in hours
    pub session_ttl_hours: i64,
    /// Chat messages older than this are swept
    pub message_retention_hours: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: "./data/fellowship.sqlite".into(),
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            log_level: "info".to_string(),
            log_json: false,
            admin_email: None,
            session_ttl_hours: 72,
            message_retention_hours: 48,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, String> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let db_path = env::var("FELLOWSHIP_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let bind_addr = match env::var("FELLOWSHIP_BIND_ADDR") {
            Ok(raw) => raw
                .parse()
                .map_err(|e| format!("Invalid FELLOWSHIP_BIND_ADDR '{}': {}", raw, e))?,
            Err(_) => defaults.bind_addr,
        };

        let log_level = env::var("FELLOWSHIP_LOG_LEVEL").unwrap_or(defaults.log_level);

        let log_json = env::var("FELLOWSHIP_LOG_FORMAT")
            .map(|f| f.eq_ignore_ascii_case("json"))
            .unwrap_or(defaults.log_json);

        let admin_email = env::var("FELLOWSHIP_ADMIN_EMAIL")
            .ok()
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty());

        let session_ttl_hours = parse_hours("FELLOWSHIP_SESSION_TTL_HOURS", defaults.session_ttl_hours)?;
        let message_retention_hours =
            parse_hours("FELLOWSHIP_MESSAGE_RETENTION_HOURS", defaults.message_retention_hours)?;

        Ok(Self {
            db_path,
            bind_addr,
            log_level,
            log_json,
            admin_email,
            session_ttl_hours,
            message_retention_hours,
        })
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::hours(self.session_ttl_hours)
    }

    pub fn message_retention(&self) -> Duration {
        Duration::hours(self.message_retention_hours)
    }
}

fn parse_hours(var: &str, default: i64) -> Result<i64, String> {
    match env::var(var) {
        Ok(raw) => match raw.parse::<i64>() {
            Ok(hours) if hours > 0 => Ok(hours),
            _ => Err(format!("Invalid {} '{}': expected a positive number of hours", var, raw)),
        },
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert!(config.admin_email.is_none());
        assert_eq!(config.db_path, PathBuf::from("./data/fellowship.sqlite"));
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:8080");
        assert_eq!(config.log_level, "info");
        assert!(!config.log_json);
        assert_eq!(config.message_retention(), Duration::hours(48));
        assert_eq!(config.session_ttl(), Duration::hours(72));
    }

    #[test]
    fn test_parse_hours_rejects_non_positive() {
        env::set_var("FELLOWSHIP_TEST_HOURS_ZERO", "0");
        assert!(parse_hours("FELLOWSHIP_TEST_HOURS_ZERO", 1).is_err());
        env::set_var("FELLOWSHIP_TEST_HOURS_OK", "12");
        assert_eq!(parse_hours("FELLOWSHIP_TEST_HOURS_OK", 1), Ok(12));
        assert_eq!(parse_hours("FELLOWSHIP_TEST_HOURS_UNSET", 7), Ok(7));
    }
}
