use std::env;

use crate::error::ConfigError;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub max_connections: u32,
    pub log_level: String,
    pub log_json: bool,
}

impl Settings {
    /// Reads settings from the process environment after loading `.env`, if any.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let read = |key: &str| {
            lookup(key).map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
        };

        let database_url = read("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;
        let max_connections = match read("DATABASE_MAX_CONNECTIONS") {
            Some(value) => value.parse::<u32>().map_err(|_| ConfigError::InvalidValue {
                field: "DATABASE_MAX_CONNECTIONS",
                value,
            })?,
            None => DEFAULT_MAX_CONNECTIONS,
        };

        Ok(Self {
            database_url,
            max_connections,
            log_level: read("LOG_LEVEL").unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
            log_json: read("LOG_JSON").is_some_and(|value| parse_bool(&value)),
        })
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE" | "yes" | "YES" | "on" | "ON")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn database_url_is_required() {
        assert!(matches!(settings(&[]), Err(ConfigError::Missing("DATABASE_URL"))));
        assert!(matches!(
            settings(&[("DATABASE_URL", "   ")]),
            Err(ConfigError::Missing("DATABASE_URL"))
        ));
    }

    #[test]
    fn defaults_apply_when_optional_values_absent() {
        let parsed = settings(&[("DATABASE_URL", "postgres://localhost/fcar")]).unwrap();
        assert_eq!(parsed.max_connections, 5);
        assert_eq!(parsed.log_level, "info");
        assert!(!parsed.log_json);
    }

    #[test]
    fn invalid_pool_size_is_reported() {
        let result = settings(&[
            ("DATABASE_URL", "postgres://localhost/fcar"),
            ("DATABASE_MAX_CONNECTIONS", "many"),
        ]);
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { field: "DATABASE_MAX_CONNECTIONS", .. })
        ));
    }

    #[test]
    fn json_logging_toggle() {
        let parsed = settings(&[("DATABASE_URL", "postgres://x"), ("LOG_JSON", "yes")]).unwrap();
        assert!(parsed.log_json);
    }
}
