use std::{fs, path::PathBuf};

use serde::{Deserialize, Serialize};

pub const APP_NAME: &str = "caims";
pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Default log level, overridden by RUST_LOG
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub workload: WorkloadConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Project to discover workloads in (defaults to the metadata server's)
    #[serde(default)]
    pub project_id: Option<String>,
    /// Used to derive the Cloud Run endpoint
    #[serde(default)]
    pub project_number: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    /// Public URL of the broker, overrides the derived Cloud Run endpoint
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_max_request_tokens")]
    pub max_request_tokens: usize,
    #[serde(default)]
    pub require_production: bool,
    #[serde(default = "default_discovery_interval_secs")]
    pub discovery_interval_secs: u64,
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadConfig {
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Broker the workload registers with (defaults to the project's Cloud Run broker)
    #[serde(default)]
    pub broker_endpoint: Option<String>,
    #[serde(default = "default_registration_interval_secs")]
    pub registration_interval_secs: u64,
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub broker_endpoint: Option<String>,
    #[serde(default = "default_max_tokens_per_prompt")]
    pub max_tokens_per_prompt: usize,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_listen_port() -> u16 {
    8080
}

fn default_max_request_tokens() -> usize {
    10
}

fn default_discovery_interval_secs() -> u64 {
    60
}

fn default_max_concurrent_requests() -> usize {
    10
}

fn default_registration_interval_secs() -> u64 {
    300
}

fn default_max_message_size() -> usize {
    common::protocol::DEFAULT_MAX_MESSAGE_SIZE
}

fn default_max_tokens_per_prompt() -> usize {
    5
}

fn default_poll_interval_secs() -> u64 {
    5
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            broker: BrokerConfig::default(),
            workload: WorkloadConfig::default(),
            client: ClientConfig::default(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            listen_port: default_listen_port(),
            project_id: None,
            project_number: None,
            region: None,
            endpoint: None,
            max_request_tokens: default_max_request_tokens(),
            require_production: false,
            discovery_interval_secs: default_discovery_interval_secs(),
            max_concurrent_requests: default_max_concurrent_requests(),
        }
    }
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            listen_port: default_listen_port(),
            broker_endpoint: None,
            registration_interval_secs: default_registration_interval_secs(),
            max_concurrent_requests: default_max_concurrent_requests(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            broker_endpoint: None,
            max_tokens_per_prompt: default_max_tokens_per_prompt(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

impl AppConfig {
    pub fn log_level(&self) -> tracing::Level {
        self.log_level.parse().unwrap_or(tracing::Level::INFO)
    }
}

#[derive(Debug, Clone)]
pub struct AppState {
    /// Path to the caims directory (~/.caims)
    pub caims_dir: PathBuf,
    /// Path to the config file
    pub config_path: PathBuf,
    /// Loaded configuration
    pub config: AppConfig,
}

impl AppState {
    /// Get the caims directory path (custom or default ~/.caims)
    pub fn caims_dir(custom_path: Option<PathBuf>) -> Result<PathBuf, StateError> {
        if let Some(path) = custom_path {
            return Ok(path);
        }

        let home = dirs::home_dir().ok_or(StateError::NoHomeDirectory)?;
        Ok(home.join(format!(".{}", APP_NAME)))
    }

    /// Initialize a new caims directory with a config file
    pub fn init(custom_path: Option<PathBuf>, config: Option<AppConfig>) -> Result<Self, StateError> {
        let caims_dir = Self::caims_dir(custom_path)?;
        let config_path = caims_dir.join(CONFIG_FILE_NAME);

        if config_path.exists() {
            return Err(StateError::AlreadyInitialized);
        }

        fs::create_dir_all(&caims_dir)?;

        let config = config.unwrap_or_default();
        let config_toml = toml::to_string_pretty(&config)?;
        fs::write(&config_path, config_toml)?;

        Ok(Self {
            caims_dir,
            config_path,
            config,
        })
    }

    /// Load existing state from the caims directory
    pub fn load(custom_path: Option<PathBuf>) -> Result<Self, StateError> {
        let caims_dir = Self::caims_dir(custom_path)?;
        let config_path = caims_dir.join(CONFIG_FILE_NAME);

        if !caims_dir.exists() {
            return Err(StateError::NotInitialized);
        }
        if !config_path.exists() {
            return Err(StateError::MissingFile(CONFIG_FILE_NAME.to_string()));
        }

        let config_toml = fs::read_to_string(&config_path)?;
        let config: AppConfig = toml::from_str(&config_toml)?;

        Ok(Self {
            caims_dir,
            config_path,
            config,
        })
    }

    /// Load state, falling back to defaults when nothing was initialized.
    ///
    /// Servers typically run from container images without a config file.
    pub fn load_or_default(custom_path: Option<PathBuf>) -> Result<Self, StateError> {
        match Self::load(custom_path.clone()) {
            Err(StateError::NotInitialized) | Err(StateError::MissingFile(_)) => {
                let caims_dir = Self::caims_dir(custom_path)?;
                Ok(Self {
                    config_path: caims_dir.join(CONFIG_FILE_NAME),
                    caims_dir,
                    config: AppConfig::default(),
                })
            }
            result => result,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("caims directory not initialized. Run 'caims init' first")]
    NotInitialized,

    #[error("caims directory already initialized")]
    AlreadyInitialized,

    #[error("no home directory found")]
    NoHomeDirectory,

    #[error("missing required file: {0}")]
    MissingFile(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_init_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("caims");

        let state = AppState::init(Some(path.clone()), None).unwrap();
        assert!(state.config_path.exists());

        let loaded = AppState::load(Some(path.clone())).unwrap();
        assert_eq!(loaded.config, AppConfig::default());

        assert!(matches!(
            AppState::init(Some(path), None),
            Err(StateError::AlreadyInitialized)
        ));
    }

    #[test]
    fn test_load_or_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent");

        assert!(matches!(
            AppState::load(Some(path.clone())),
            Err(StateError::NotInitialized)
        ));
        let state = AppState::load_or_default(Some(path)).unwrap();
        assert_eq!(state.config.broker.max_request_tokens, 10);
        assert_eq!(state.config.workload.max_message_size, 1024);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            log_level = "debug"

            [broker]
            project_id = "my-project"
            require_production = true

            [client]
            broker_endpoint = "https://broker.example.com/"
            "#,
        )
        .unwrap();

        assert_eq!(config.log_level(), tracing::Level::DEBUG);
        assert_eq!(config.broker.project_id.as_deref(), Some("my-project"));
        assert!(config.broker.require_production);
        assert_eq!(config.broker.listen_port, 8080);
        assert_eq!(config.broker.discovery_interval_secs, 60);
        assert_eq!(config.workload.registration_interval_secs, 300);
        assert_eq!(config.client.max_tokens_per_prompt, 5);
    }
}
