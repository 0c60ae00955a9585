use std::time::Duration;

use arch_bot_commons::user_resolving::parse_userid;
use teloxide::types::UserId;
use thiserror::Error;

use crate::{database::DEFAULT_DB_PATH, reminders::SweepSettings, tracker::VerificationPolicy};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("environment variable {0} must be set")]
    Missing(&'static str),
    #[error("environment variable {var} has an invalid value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// Deployment settings. The bot token isn't here, it lives in the key file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Gets notifications and may use admin commands.
    pub admin_id: UserId,
    /// `sqlite:` URL of the database.
    pub database_url: String,
    pub policy: VerificationPolicy,
    pub sweep: SweepSettings,
}

impl Config {
    /// Reads the config from environment variables.
    ///
    /// # Errors
    ///
    /// Errors if `ADMIN_ID` is missing, or if any variable has an unusable value.
    pub fn from_env() -> Result<Config, ConfigError> {
        Config::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`Config::from_env`], but with variables coming from `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Config, ConfigError> {
        // Treat empty as unset.
        let get = |var: &str| lookup(var).filter(|value| !value.trim().is_empty());

        let admin_id = match get("ADMIN_ID") {
            Some(value) => parse_userid(&value).ok_or(ConfigError::Invalid {
                var: "ADMIN_ID",
                value,
                reason: "not a user ID",
            })?,
            None => return Err(ConfigError::Missing("ADMIN_ID")),
        };

        let database_url = get("VERIFY_DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string());

        let max_failed_attempts = match get("MAX_FAILED_ATTEMPTS") {
            Some(value) => match value.trim().parse::<u32>() {
                Ok(0) | Err(_) => {
                    return Err(ConfigError::Invalid {
                        var: "MAX_FAILED_ATTEMPTS",
                        value,
                        reason: "must be a positive integer",
                    })
                }
                Ok(max) => Some(max),
            },
            None => None,
        };

        let reverify_unbans = match get("REVERIFY_UNBANS") {
            Some(value) => parse_bool(&value).ok_or(ConfigError::Invalid {
                var: "REVERIFY_UNBANS",
                value,
                reason: "must be true or false",
            })?,
            None => false,
        };

        let defaults = SweepSettings::default();

        let interval = match get("SWEEP_INTERVAL_HOURS") {
            Some(value) => match value.trim().parse::<u64>() {
                Ok(hours) if hours > 0 => Duration::from_secs(hours * 60 * 60),
                _ => {
                    return Err(ConfigError::Invalid {
                        var: "SWEEP_INTERVAL_HOURS",
                        value,
                        reason: "must be a positive integer",
                    })
                }
            },
            None => defaults.interval,
        };

        let send_delay = match get("REMINDER_SEND_DELAY_SECS") {
            Some(value) => match value.trim().parse::<u64>() {
                Ok(secs) => Duration::from_secs(secs),
                Err(_) => {
                    return Err(ConfigError::Invalid {
                        var: "REMINDER_SEND_DELAY_SECS",
                        value,
                        reason: "must be a non-negative integer",
                    })
                }
            },
            None => defaults.send_delay,
        };

        Ok(Config {
            admin_id,
            database_url,
            policy: VerificationPolicy {
                max_failed_attempts,
                reverify_unbans,
            },
            sweep: SweepSettings {
                interval,
                send_delay,
                delivery_timeout: defaults.delivery_timeout,
            },
        })
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Some(true),
        "false" | "no" | "0" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn defaults() {
        let config = config(&[("ADMIN_ID", "1234")]).unwrap();
        assert_eq!(config.admin_id, UserId(1234));
        assert_eq!(config.database_url, DEFAULT_DB_PATH);
        assert_eq!(config.policy, VerificationPolicy::default());
        assert_eq!(config.sweep, SweepSettings::default());
        assert_eq!(config.sweep.interval, Duration::from_secs(6 * 60 * 60));
    }

    #[test]
    fn everything_set() {
        let config = config(&[
            ("ADMIN_ID", "1234"),
            ("VERIFY_DB_PATH", "sqlite:/var/lib/bot/db.sqlite"),
            ("MAX_FAILED_ATTEMPTS", "3"),
            ("REVERIFY_UNBANS", "TRUE"),
            ("SWEEP_INTERVAL_HOURS", "1"),
            ("REMINDER_SEND_DELAY_SECS", "0"),
        ])
        .unwrap();
        assert_eq!(config.database_url, "sqlite:/var/lib/bot/db.sqlite");
        assert_eq!(config.policy.max_failed_attempts, Some(3));
        assert!(config.policy.reverify_unbans);
        assert_eq!(config.sweep.interval, Duration::from_secs(3600));
        assert_eq!(config.sweep.send_delay, Duration::ZERO);
    }

    #[test]
    fn bad_values() {
        assert_eq!(config(&[]), Err(ConfigError::Missing("ADMIN_ID")));
        assert_eq!(
            config(&[("ADMIN_ID", "  ")]),
            Err(ConfigError::Missing("ADMIN_ID"))
        );
        assert!(matches!(
            config(&[("ADMIN_ID", "admin")]),
            Err(ConfigError::Invalid { var: "ADMIN_ID", .. })
        ));
        assert!(matches!(
            config(&[("ADMIN_ID", "1"), ("MAX_FAILED_ATTEMPTS", "0")]),
            Err(ConfigError::Invalid {
                var: "MAX_FAILED_ATTEMPTS",
                ..
            })
        ));
        assert!(matches!(
            config(&[("ADMIN_ID", "1"), ("REVERIFY_UNBANS", "maybe")]),
            Err(ConfigError::Invalid {
                var: "REVERIFY_UNBANS",
                ..
            })
        ));
        assert!(matches!(
            config(&[("ADMIN_ID", "1"), ("SWEEP_INTERVAL_HOURS", "0")]),
            Err(ConfigError::Invalid {
                var: "SWEEP_INTERVAL_HOURS",
                ..
            })
        ));
    }
}
