use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// An entry of ADMIN_IDS is not an integer.
    InvalidAdminId(String),
    /// Validation error.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read config file '{}': {}", path.display(), source)
            }
            Self::ParseJson { path, source } => {
                write!(f, "failed to parse config file '{}': {}", path.display(), source)
            }
            Self::InvalidAdminId(raw) => write!(f, "invalid admin id '{}' in ADMIN_IDS", raw),
            Self::Validation(msg) => write!(f, "config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseJson { source, .. } => Some(source),
            Self::InvalidAdminId(_) | Self::Validation(_) => None,
        }
    }
}

#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    telegram_bot_token: String,
    /// Admins seeded into the database at startup.
    #[serde(default)]
    admin_ids: Vec<i64>,
    /// Directory for the database and logs. Defaults to current directory.
    data_dir: Option<String>,
    #[serde(default = "default_send_timeout_secs")]
    send_timeout_secs: u64,
    #[serde(default = "default_broadcast_concurrency")]
    broadcast_concurrency: usize,
    /// Greeting used until an admin runs /setwelcome.
    default_welcome: Option<String>,
}

fn default_send_timeout_secs() -> u64 {
    10
}

fn default_broadcast_concurrency() -> usize {
    8
}

#[derive(Debug)]
pub struct Config {
    pub telegram_bot_token: String,
    /// Initial admin set. The database is the source of truth afterwards.
    pub admin_ids: Vec<i64>,
    /// Directory for state files (database, logs).
    pub data_dir: PathBuf,
    pub send_timeout: Duration,
    pub broadcast_concurrency: usize,
    pub default_welcome: Option<String>,
}

impl Config {
    /// Load a JSON config file, then let `BOT_TOKEN` / `ADMIN_IDS` / `DATA_DIR`
    /// from the environment override it.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;
        Self::build(file, |key| std::env::var(key).ok())
    }

    /// Build the config from the environment alone.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::build(ConfigFile::default_values(), |key| std::env::var(key).ok())
    }

    fn build(mut file: ConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        if let Some(token) = env("BOT_TOKEN").filter(|t| !t.is_empty()) {
            file.telegram_bot_token = token;
        }
        if let Some(raw) = env("ADMIN_IDS").filter(|r| !r.trim().is_empty()) {
            file.admin_ids = parse_admin_ids(&raw)?;
        }
        if let Some(dir) = env("DATA_DIR").filter(|d| !d.is_empty()) {
            file.data_dir = Some(dir);
        }

        // Validate required fields
        if file.telegram_bot_token.is_empty() {
            return Err(ConfigError::Validation("telegram_bot_token (or BOT_TOKEN) is required".into()));
        }
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = file.telegram_bot_token.split(':').collect();
        if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
            return Err(ConfigError::Validation(
                "telegram_bot_token appears invalid (expected format: 123456789:ABCdefGHI...)".into()
            ));
        }
        if file.admin_ids.is_empty() {
            return Err(ConfigError::Validation("admin_ids (or ADMIN_IDS) must contain at least one admin ID".into()));
        }
        if file.send_timeout_secs == 0 {
            return Err(ConfigError::Validation("send_timeout_secs must be at least 1".into()));
        }
        if file.broadcast_concurrency == 0 {
            return Err(ConfigError::Validation("broadcast_concurrency must be at least 1".into()));
        }

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            telegram_bot_token: file.telegram_bot_token,
            admin_ids: file.admin_ids,
            data_dir,
            send_timeout: Duration::from_secs(file.send_timeout_secs),
            broadcast_concurrency: file.broadcast_concurrency,
            default_welcome: file.default_welcome,
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("relay.db")
    }
}

impl ConfigFile {
    fn default_values() -> Self {
        Self {
            send_timeout_secs: default_send_timeout_secs(),
            broadcast_concurrency: default_broadcast_concurrency(),
            ..Self::default()
        }
    }
}

/// Parse a comma-separated id list. Blank entries are skipped.
fn parse_admin_ids(raw: &str) -> Result<Vec<i64>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<i64>().map_err(|_| ConfigError::InvalidAdminId(s.to_string())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const TOKEN: &str = "123456789:ABCdefGHIjklMNOpqrsTUVwxyz";

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn parse_file(content: &str) -> ConfigFile {
        serde_json::from_str(content).unwrap()
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn env_of(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    fn assert_err<T>(result: Result<T, ConfigError>) -> ConfigError {
        match result {
            Ok(_) => panic!("expected error, got Ok"),
            Err(e) => e,
        }
    }

    #[test]
    fn test_valid_config() {
        let file = parse_file(r#"{
            "telegram_bot_token": "123456789:ABCdefGHIjklMNOpqrsTUVwxyz",
            "admin_ids": [123456]
        }"#);
        let config = Config::build(file, no_env).expect("should load valid config");
        assert_eq!(config.admin_ids, vec![123456]);
        assert_eq!(config.data_dir, PathBuf::from("."));
        assert_eq!(config.send_timeout, Duration::from_secs(10));
        assert_eq!(config.broadcast_concurrency, 8);
        assert_eq!(config.database_path(), PathBuf::from("./relay.db"));
    }

    #[test]
    fn test_load_from_file() {
        let file = write_config(&format!(r#"{{
            "telegram_bot_token": "{TOKEN}",
            "admin_ids": [1, 2],
            "data_dir": "/var/lib/relaybot",
            "send_timeout_secs": 3,
            "default_welcome": "hello"
        }}"#));
        let config = Config::load(file.path()).expect("should load config file");
        assert_eq!(config.admin_ids, vec![1, 2]);
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/relaybot"));
        assert_eq!(config.send_timeout, Duration::from_secs(3));
        assert_eq!(config.default_welcome.as_deref(), Some("hello"));
    }

    #[test]
    fn test_env_only() {
        let env = env_of(&[("BOT_TOKEN", TOKEN), ("ADMIN_IDS", "11, 22,,33"), ("DATA_DIR", "/data")]);
        let config = Config::build(ConfigFile::default_values(), env).unwrap();
        assert_eq!(config.telegram_bot_token, TOKEN);
        assert_eq!(config.admin_ids, vec![11, 22, 33]);
        assert_eq!(config.data_dir, PathBuf::from("/data"));
        assert_eq!(config.broadcast_concurrency, 8);
    }

    #[test]
    fn test_env_overrides_file() {
        let file = parse_file(r#"{
            "telegram_bot_token": "111:file",
            "admin_ids": [1]
        }"#);
        let config = Config::build(file, env_of(&[("BOT_TOKEN", TOKEN), ("ADMIN_IDS", "7")])).unwrap();
        assert_eq!(config.telegram_bot_token, TOKEN);
        assert_eq!(config.admin_ids, vec![7]);
    }

    #[test]
    fn test_invalid_admin_id_in_env() {
        let env = env_of(&[("BOT_TOKEN", TOKEN), ("ADMIN_IDS", "12,abc")]);
        let err = assert_err(Config::build(ConfigFile::default_values(), env));
        assert!(matches!(err, ConfigError::InvalidAdminId(ref s) if s == "abc"));
    }

    #[test]
    fn test_empty_admin_ids() {
        let file = parse_file(&format!(r#"{{ "telegram_bot_token": "{TOKEN}", "admin_ids": [] }}"#));
        let err = assert_err(Config::build(file, no_env));
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("admin_ids"));
    }

    #[test]
    fn test_empty_token() {
        let file = parse_file(r#"{ "telegram_bot_token": "", "admin_ids": [123] }"#);
        let err = assert_err(Config::build(file, no_env));
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("telegram_bot_token"));
    }

    #[test]
    fn test_invalid_token_format_no_colon() {
        let file = parse_file(r#"{ "telegram_bot_token": "invalid_token_no_colon", "admin_ids": [123] }"#);
        let err = assert_err(Config::build(file, no_env));
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("invalid"));
    }

    #[test]
    fn test_invalid_token_format_non_numeric_id() {
        let file = parse_file(r#"{ "telegram_bot_token": "notanumber:ABCdef", "admin_ids": [123] }"#);
        let err = assert_err(Config::build(file, no_env));
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_invalid_token_format_empty_secret() {
        let file = parse_file(r#"{ "telegram_bot_token": "123456789:", "admin_ids": [123] }"#);
        let err = assert_err(Config::build(file, no_env));
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let file = parse_file(&format!(
            r#"{{ "telegram_bot_token": "{TOKEN}", "admin_ids": [1], "broadcast_concurrency": 0 }}"#
        ));
        let err = assert_err(Config::build(file, no_env));
        assert!(err.to_string().contains("broadcast_concurrency"));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let file = parse_file(&format!(
            r#"{{ "telegram_bot_token": "{TOKEN}", "admin_ids": [1], "send_timeout_secs": 0 }}"#
        ));
        let err = assert_err(Config::build(file, no_env));
        assert!(err.to_string().contains("send_timeout_secs"));
    }

    #[test]
    fn test_file_not_found() {
        let err = assert_err(Config::load("/nonexistent/path/config.json"));
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_invalid_json() {
        let file = write_config("{ invalid json }");
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::ParseJson { .. }));
    }
}
