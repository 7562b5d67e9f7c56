use secrecy::Secret;
use serde::Deserialize;

/// Where offers and redemptions are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Postgres,
    /// Single process only; state is lost on restart
    Memory,
}

impl std::str::FromStr for StorageBackend {
    type Err = config::ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            other => Err(config::ConfigError::Message(format!(
                "unknown storage backend: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub storage: StorageBackend,
    pub database_url: Option<Secret<String>>,
    pub db_max_connections: u32,
    pub host: String,
    pub port: u16,

    // Security
    pub secure_cookies: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Load .env file if it exists (for local development)
        let _ = dotenvy::dotenv();

        let settings = config::Config::builder()
            .add_source(config::Environment::default().separator("__"))
            .build()?;

        Self::from_settings(&settings)
    }

    fn from_settings(settings: &config::Config) -> Result<Self, config::ConfigError> {
        let storage = get_or(settings, "storage", "postgres".to_string())?.parse::<StorageBackend>()?;

        let database_url = get_or(settings, "database_url", None::<String>)?.map(Secret::new);
        if storage == StorageBackend::Postgres && database_url.is_none() {
            return Err(config::ConfigError::NotFound("database_url".to_string()));
        }

        let port: u16 = get_or(settings, "port", 8080)?;

        Ok(Self {
            storage,
            database_url,
            db_max_connections: get_or(settings, "db_max_connections", 20)?,
            host: get_or(settings, "host", "127.0.0.1".to_string())?,
            port,

            secure_cookies: get_or(settings, "secure_cookies", true)?,
        })
    }
}

/// Falls back to `default` only when the key is absent; a value that is
/// set but malformed is an error
fn get_or<T: serde::de::DeserializeOwned>(
    settings: &config::Config,
    key: &str,
    default: T,
) -> Result<T, config::ConfigError> {
    match settings.get::<T>(key) {
        Ok(value) => Ok(value),
        Err(config::ConfigError::NotFound(_)) => Ok(default),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_storage_backend_names() {
        assert_eq!("postgres".parse::<StorageBackend>().unwrap(), StorageBackend::Postgres);
        assert_eq!(" Memory ".parse::<StorageBackend>().unwrap(), StorageBackend::Memory);
        assert!("redis".parse::<StorageBackend>().is_err());
    }

    fn settings(pairs: &[(&str, &str)]) -> config::Config {
        pairs
            .iter()
            .try_fold(config::Config::builder(), |builder, (key, value)| {
                builder.set_override(*key, *value)
            })
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn absent_keys_take_defaults() {
        let config = Config::from_settings(&settings(&[("storage", "memory")])).unwrap();
        assert_eq!(config.storage, StorageBackend::Memory);
        assert_eq!(config.port, 8080);
        assert_eq!(config.db_max_connections, 20);
        assert_eq!(config.host, "127.0.0.1");
        assert!(config.secure_cookies);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn set_values_are_parsed() {
        let config = Config::from_settings(&settings(&[
            ("storage", "memory"),
            ("port", "9090"),
            ("db_max_connections", "5"),
            ("secure_cookies", "false"),
        ]))
        .unwrap();
        assert_eq!(config.port, 9090);
        assert_eq!(config.db_max_connections, 5);
        assert!(!config.secure_cookies);
    }

    #[test]
    fn malformed_values_are_rejected() {
        for (key, value) in [
            ("port", "eighty"),
            ("db_max_connections", "lots"),
            ("secure_cookies", "maybe"),
            ("storage", "redis"),
        ] {
            let result = Config::from_settings(&settings(&[("storage", "memory"), (key, value)]));
            assert!(result.is_err(), "{key}={value} should be rejected");
        }
    }

    #[test]
    fn postgres_requires_database_url() {
        let result = Config::from_settings(&settings(&[("storage", "postgres")]));
        assert!(matches!(result, Err(config::ConfigError::NotFound(_))));
    }
}
