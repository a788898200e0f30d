//! Configuration loader and validator for the fiscal-note console.
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub services: Services,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub http_timeout_secs: u64,
}

/// Base URLs of the remote collaborators. Each must be an absolute URL
/// ending with `/` so endpoint paths can be joined onto it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Services {
    pub orders: Endpoint,
    pub directory: Endpoint,
    pub authority: Endpoint,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Endpoint {
    pub base_url: String,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.http_timeout_secs == 0 {
        return Err(ConfigError::Invalid("app.http_timeout_secs must be > 0"));
    }

    validate_endpoint(
        &cfg.services.orders,
        "services.orders.base_url must be an absolute URL ending with '/'",
    )?;
    validate_endpoint(
        &cfg.services.directory,
        "services.directory.base_url must be an absolute URL ending with '/'",
    )?;
    validate_endpoint(
        &cfg.services.authority,
        "services.authority.base_url must be an absolute URL ending with '/'",
    )?;

    Ok(())
}

fn validate_endpoint(endpoint: &Endpoint, msg: &'static str) -> Result<(), ConfigError> {
    if endpoint.base_url.trim().is_empty()
        || Url::parse(&endpoint.base_url).is_err()
        || !endpoint.base_url.ends_with('/')
    {
        return Err(ConfigError::Invalid(msg));
    }
    Ok(())
}

/// Returns a canonical example YAML config.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  http_timeout_secs: 30

services:
  orders:
    base_url: "http://localhost:5000/orders/"
  directory:
    base_url: "http://localhost:5000/recipients/"
  authority:
    base_url: "http://localhost:5000/invoice-authority/"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
    }

    #[test]
    fn invalid_data_dir() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.data_dir = "".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("data_dir")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn invalid_timeout() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.http_timeout_secs = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_base_urls() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.services.directory.base_url = "".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("directory")),
            _ => panic!("wrong error"),
        }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.services.authority.base_url = "not a url".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        // Missing trailing slash would break Url::join.
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.services.orders.base_url = "http://localhost:5000/orders".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn ensure_dirs_creates_data_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.data_dir = data_path.to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(data_path.exists());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.app.http_timeout_secs, 30);
    }
}
