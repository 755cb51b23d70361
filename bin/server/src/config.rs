//! Centralized server configuration.
//!
//! Strongly-typed configuration loaded via the `config` crate from
//! environment variables (`__` separates nesting, e.g.
//! `RATE_LIMIT__MAX_REQUESTS=50`).

use copper_courier_delivery::GatewayDefaults;
use copper_courier_quota::RateLimitConfig;
use serde::Deserialize;

/// Server configuration.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// PostgreSQL database connection URL.
    pub database_url: String,

    /// Address the HTTP server binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Rate limiting for the send operation.
    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    /// Service-level defaults for gateway connections.
    #[serde(default)]
    pub gateway: GatewayDefaults,
}

/// Rate limit settings for the send operation.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSettings {
    /// Maximum send requests per identity per window.
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,

    /// Window duration in seconds.
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u32,
}

fn default_listen_addr() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_max_requests() -> u32 {
    100
}

fn default_window_seconds() -> u32 {
    60
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_seconds: default_window_seconds(),
        }
    }
}

impl RateLimitSettings {
    /// Converts to the limiter's configuration type.
    #[must_use]
    pub fn to_config(&self) -> RateLimitConfig {
        RateLimitConfig::new(self.max_requests, self.window_seconds)
    }
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_settings_default_to_100_per_minute() {
        let settings = RateLimitSettings::default();
        assert_eq!(settings.max_requests, 100);
        assert_eq!(settings.window_seconds, 60);

        let config = settings.to_config();
        assert_eq!(config.max_requests, 100);
        assert_eq!(config.window_seconds, 60);
    }
}
