//! Configuration for the karst S3 server

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Server configuration.
///
/// Sources, in priority order: command-line flags, `KARST_*` environment
/// variables, YAML configuration file, built-in defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Address to listen on
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Directory holding object blobs and staging files
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Metadata store file. Defaults to `<data_dir>/metadata.sqlite3`;
    /// WAL sidecars live next to it so the replication sidecar can tail them.
    #[serde(default)]
    pub metadata_path: Option<PathBuf>,

    /// S3 access key id (SigV4)
    #[serde(default)]
    pub access_key_id: Option<String>,

    /// S3 secret access key (SigV4)
    #[serde(default)]
    pub secret_access_key: Option<String>,

    /// Skip signature verification entirely. Test fixtures only.
    #[serde(default)]
    pub auth_disabled: bool,

    /// Log level: debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format: text or json
    #[serde(default)]
    pub log_format: LogFormat,

    /// Region reported by GetBucketLocation and used in credential scopes
    #[serde(default = "default_region")]
    pub region: String,

    /// Tokio blocking-thread pool cap; None keeps the runtime default
    #[serde(default)]
    pub blocking_threads: Option<usize>,
}

// Default value functions for serde
fn default_listen_addr() -> SocketAddr {
    "127.0.0.1:9000".parse().unwrap()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            data_dir: default_data_dir(),
            metadata_path: None,
            access_key_id: None,
            secret_access_key: None,
            auth_disabled: false,
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            region: default_region(),
            blocking_threads: None,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let config: Config =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(config)
    }

    /// Apply `KARST_*` environment variable overrides on top of `self`.
    pub fn apply_env(&mut self) {
        if let Ok(addr) = std::env::var("KARST_LISTEN_ADDR") {
            if let Ok(parsed) = addr.parse() {
                self.listen_addr = parsed;
            }
        }
        if let Ok(port) = std::env::var("KARST_PORT") {
            if let Ok(parsed) = port.parse() {
                self.listen_addr.set_port(parsed);
            }
        }
        if let Ok(dir) = std::env::var("KARST_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Ok(path) = std::env::var("KARST_METADATA_PATH") {
            self.metadata_path = Some(PathBuf::from(path));
        }
        if let Ok(key) = std::env::var("KARST_ACCESS_KEY_ID") {
            self.access_key_id = Some(key);
        }
        if let Ok(secret) = std::env::var("KARST_SECRET_ACCESS_KEY") {
            self.secret_access_key = Some(secret);
        }
        if let Ok(v) = std::env::var("KARST_AUTH_DISABLED") {
            self.auth_disabled = v == "true" || v == "1";
        }
        if let Ok(level) = std::env::var("KARST_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Ok(format) = std::env::var("KARST_LOG_FORMAT") {
            match format.as_str() {
                "json" => self.log_format = LogFormat::Json,
                "text" => self.log_format = LogFormat::Text,
                _ => {}
            }
        }
        if let Ok(region) = std::env::var("KARST_REGION") {
            self.region = region;
        }
        if let Ok(bt) = std::env::var("KARST_BLOCKING_THREADS") {
            if let Ok(parsed) = bt.parse() {
                self.blocking_threads = Some(parsed);
            }
        }
    }

    /// Load configuration: explicit file if given, else well-known file
    /// locations, else defaults; environment overrides apply in all cases.
    pub fn load(file: Option<&str>) -> Result<Self, ConfigError> {
        let mut config = if let Some(path) = file {
            Self::from_file(path)?
        } else if let Ok(path) = std::env::var("KARST_CONFIG") {
            Self::from_file(&path)?
        } else {
            let mut found = None;
            for path in &["karst.yaml", "/etc/karst/config.yaml"] {
                if std::path::Path::new(path).exists() {
                    found = Some(Self::from_file(path)?);
                    break;
                }
            }
            found.unwrap_or_default()
        };

        config.apply_env();
        Ok(config)
    }

    /// Resolved metadata store path.
    pub fn metadata_path(&self) -> PathBuf {
        self.metadata_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("metadata.sqlite3"))
    }

    /// Whether SigV4 verification is active.
    pub fn auth_enabled(&self) -> bool {
        !self.auth_disabled && self.access_key_id.is_some() && self.secret_access_key.is_some()
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.listen_addr.port(), 9000);
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert!(!config.auth_disabled);
        assert!(!config.auth_enabled());
    }

    #[test]
    fn test_config_parse_yaml() {
        let yaml = r#"
listen_addr: "0.0.0.0:8080"
data_dir: /var/lib/karst
access_key_id: AKIAEXAMPLE
secret_access_key: secret
log_level: debug
log_format: json
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.listen_addr.port(), 8080);
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/karst"));
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.log_format, LogFormat::Json);
        assert!(config.auth_enabled());
    }

    #[test]
    fn test_metadata_path_defaults_into_data_dir() {
        let config = Config {
            data_dir: PathBuf::from("/srv/karst"),
            ..Config::default()
        };
        assert_eq!(
            config.metadata_path(),
            PathBuf::from("/srv/karst/metadata.sqlite3")
        );

        let explicit = Config {
            metadata_path: Some(PathBuf::from("/elsewhere/meta.db")),
            ..Config::default()
        };
        assert_eq!(explicit.metadata_path(), PathBuf::from("/elsewhere/meta.db"));
    }

    #[test]
    fn test_auth_disabled_wins_over_credentials() {
        let config = Config {
            access_key_id: Some("k".into()),
            secret_access_key: Some("s".into()),
            auth_disabled: true,
            ..Config::default()
        };
        assert!(!config.auth_enabled());
    }
}
