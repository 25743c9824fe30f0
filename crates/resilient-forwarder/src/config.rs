// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::error::ConfigError;
use std::env;
use std::time::Duration;

pub const DEFAULT_WORKERS: usize = 8;
pub const DEFAULT_CHAN_BUFFER: usize = 256;
pub const DEFAULT_ENV: &str = "dummy";
pub const DEFAULT_FORWARD_TIMEOUT: Duration = Duration::from_secs(30);

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Runtime configuration of the forwarder process.
#[derive(Debug, Clone)]
pub struct ForwarderConfig {
    /// System code reported by the health checks
    pub app_system_code: String,
    pub app_name: String,
    /// Splunk HEC endpoint
    pub forward_url: String,
    /// Splunk HEC token, sent as `Authorization: Splunk <token>`
    pub token: String,
    /// Environment tag, also used as the object key prefix in the cache bucket
    pub env: String,
    /// Worker count for each of the two pools
    pub workers: usize,
    /// Capacity of the outbound and inbound buffers
    pub chan_buffer: usize,
    pub bucket: String,
    pub aws_region: Option<String>,
    /// Transport timeout of a single delivery attempt
    pub forward_timeout: Duration,
    pub log_level: String,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            app_system_code: "resilient-splunk-forwarder".to_string(),
            app_name: "Resilient Splunk Forwarder".to_string(),
            forward_url: String::new(),
            token: String::new(),
            env: DEFAULT_ENV.to_string(),
            workers: DEFAULT_WORKERS,
            chan_buffer: DEFAULT_CHAN_BUFFER,
            bucket: String::new(),
            aws_region: None,
            forward_timeout: DEFAULT_FORWARD_TIMEOUT,
            log_level: "info".to_string(),
        }
    }
}

impl ForwarderConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            app_system_code: env::var("APP_SYSTEM_CODE").unwrap_or(defaults.app_system_code),
            app_name: env::var("APP_NAME").unwrap_or(defaults.app_name),
            forward_url: env::var("FORWARD_URL").unwrap_or_default(),
            token: env::var("TOKEN").unwrap_or_default(),
            env: env::var("ENV").unwrap_or(defaults.env),
            workers: parse_var("WORKERS")?.unwrap_or(defaults.workers),
            chan_buffer: parse_var("CHAN_BUFFER")?.unwrap_or(defaults.chan_buffer),
            bucket: env::var("BUCKET_NAME").unwrap_or_default(),
            aws_region: env::var("AWS_REGION").ok().filter(|r| !r.trim().is_empty()),
            forward_timeout: parse_var("FORWARD_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.forward_timeout),
            log_level: env::var("LOG_LEVEL")
                .map(|val| normalize_log_level(&val))
                .unwrap_or(defaults.log_level),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.forward_url.trim().is_empty() {
            return Err(ConfigError::Missing("FORWARD_URL"));
        }
        if self.token.trim().is_empty() {
            return Err(ConfigError::Missing("TOKEN"));
        }
        if self.bucket.trim().is_empty() {
            return Err(ConfigError::Missing("BUCKET_NAME"));
        }
        if self.env.trim().is_empty() {
            return Err(ConfigError::Missing("ENV"));
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid {
                name: "WORKERS",
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.chan_buffer == 0 {
            return Err(ConfigError::Invalid {
                name: "CHAN_BUFFER",
                reason: "must be greater than 0".to_string(),
            });
        }
        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid {
                name: "LOG_LEVEL",
                reason: format!(
                    "'{}' must be one of: trace, debug, info, warn, error",
                    self.log_level
                ),
            });
        }
        Ok(())
    }
}

/// Lowercases a level and folds the names tracing lacks onto its nearest
/// level: `panic` and `fatal` become `error`, `warning` becomes `warn`.
#[must_use]
pub fn normalize_log_level(level: &str) -> String {
    let level = level.trim().to_lowercase();
    match level.as_str() {
        "panic" | "fatal" => "error".to_string(),
        "warning" => "warn".to_string(),
        _ => level,
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(val) => val
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Invalid {
                name,
                reason: format!("'{val}': {e}"),
            }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> ForwarderConfig {
        ForwarderConfig {
            forward_url: "https://splunk.example.com/services/collector/event".to_string(),
            token: "secret".to_string(),
            bucket: "testbucket".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = ForwarderConfig::default();
        assert_eq!(config.workers, 8);
        assert_eq!(config.chan_buffer, 256);
        assert_eq!(config.env, "dummy");
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_valid_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_missing_required_values() {
        let config = ForwarderConfig {
            forward_url: String::new(),
            ..valid_config()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing("FORWARD_URL"))
        ));

        let config = ForwarderConfig {
            token: "  ".to_string(),
            ..valid_config()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Missing("TOKEN"))));

        let config = ForwarderConfig {
            bucket: String::new(),
            ..valid_config()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing("BUCKET_NAME"))
        ));
    }

    #[test]
    fn test_zero_pool_sizes_are_rejected() {
        let config = ForwarderConfig {
            workers: 0,
            ..valid_config()
        };
        assert!(config.validate().is_err());

        let config = ForwarderConfig {
            chan_buffer: 0,
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }

    // The only test touching the process environment.
    #[test]
    fn test_from_env() {
        env::set_var("FORWARD_URL", "http://localhost:8088/services/collector/raw");
        env::set_var("TOKEN", "secret");
        env::set_var("BUCKET_NAME", "testbucket");
        env::set_var("WORKERS", "4");
        env::set_var("FORWARD_TIMEOUT_SECS", "10");
        env::set_var("LOG_LEVEL", "PANIC");
        env::set_var("AWS_REGION", "");

        let config = ForwarderConfig::from_env().expect("config should load");
        assert_eq!(config.workers, 4);
        assert_eq!(config.chan_buffer, DEFAULT_CHAN_BUFFER);
        assert_eq!(config.forward_timeout, Duration::from_secs(10));
        assert_eq!(config.log_level, "error");
        assert_eq!(config.aws_region, None);

        env::set_var("WORKERS", "many");
        assert!(matches!(
            ForwarderConfig::from_env(),
            Err(ConfigError::Invalid { name: "WORKERS", .. })
        ));

        env::remove_var("TOKEN");
        env::remove_var("WORKERS");
        assert!(matches!(
            ForwarderConfig::from_env(),
            Err(ConfigError::Missing("TOKEN"))
        ));

        for name in [
            "FORWARD_URL",
            "BUCKET_NAME",
            "FORWARD_TIMEOUT_SECS",
            "LOG_LEVEL",
            "AWS_REGION",
        ] {
            env::remove_var(name);
        }
    }

    #[test]
    fn test_valid_log_levels() {
        for level in VALID_LOG_LEVELS {
            let config = ForwarderConfig {
                log_level: level.to_string(),
                ..valid_config()
            };
            assert!(
                config.validate().is_ok(),
                "Log level '{}' should be valid",
                level
            );
        }

        let config = ForwarderConfig {
            log_level: "verbose".to_string(),
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_log_level_aliases() {
        assert_eq!(normalize_log_level("PANIC"), "error");
        assert_eq!(normalize_log_level("fatal"), "error");
        assert_eq!(normalize_log_level(" Warning "), "warn");
        assert_eq!(normalize_log_level("DEBUG"), "debug");

        let config = ForwarderConfig {
            log_level: normalize_log_level("PANIC"),
            ..valid_config()
        };
        assert!(config.validate().is_ok());
    }
}
