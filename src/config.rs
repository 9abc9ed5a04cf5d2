//! Server configuration module
//!
//! Handles loading and parsing of server configuration from files and environment variables.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::crypto::SessionKey;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Path to the configuration file
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Whether `config_path` existed and was read
    #[serde(skip)]
    pub loaded_from_file: bool,

    /// Server name used in logs
    #[serde(default = "default_server_name")]
    pub server_name: String,

    /// Address to bind the frontend listener on
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Frontend port (TCP)
    #[serde(default = "default_frontend_port")]
    pub frontend_port: u16,

    /// Directory holding the canned response blobs
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,

    /// Hex encoded 32-byte session key (empty generates a random one)
    #[serde(default)]
    pub session_key: String,

    /// Maximum number of concurrent connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Log output format ("pretty" or "json")
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Credentials exchange settings
    #[serde(default)]
    pub frontend: FrontendConfig,

    /// Grouping manager bootstrap settings
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

/// Credentials exchange configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FrontendConfig {
    /// Answer credentials with a login queue status instead of the
    /// encryption-changed blob
    #[serde(default)]
    pub simulate_queue: bool,

    /// Reported place in the login queue
    #[serde(default = "default_place_in_line")]
    pub place_in_line: u64,

    /// Reported number of players in the login queue
    #[serde(default = "default_number_in_line")]
    pub number_in_line: u64,
}

/// Grouping manager bootstrap configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BootstrapConfig {
    /// Mux channel the chat broadcast is sent on
    #[serde(default = "default_broadcast_channel")]
    pub broadcast_channel: u16,

    /// Chat broadcast sender name
    #[serde(default = "default_chat_sender")]
    pub chat_sender: String,

    /// Chat broadcast body
    #[serde(default = "default_chat_message")]
    pub chat_message: String,

    /// Chat broadcast prestige level (0-6)
    #[serde(default = "default_chat_prestige")]
    pub chat_prestige: u32,

    /// Synthetic current server game time
    #[serde(default = "default_current_server_time")]
    pub current_server_time: u64,

    /// Synthetic game start time
    #[serde(default = "default_game_start_time")]
    pub game_start_time: u64,

    /// Synthetic server game id
    #[serde(default = "default_server_game_id")]
    pub server_game_id: u64,

    /// Version string announced to the client
    #[serde(default = "default_server_version")]
    pub server_version: String,

    /// Replay the recorded first-frame blobs instead of building the
    /// clock and version announcements
    #[serde(default)]
    pub replay_recorded_frames: bool,
}

// Default value functions
fn default_server_name() -> String {
    "Frontline".to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_frontend_port() -> u16 {
    4306
}

fn default_data_path() -> PathBuf {
    PathBuf::from("./data/blobs")
}

fn default_max_connections() -> usize {
    1000
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_place_in_line() -> u64 {
    1337
}

fn default_number_in_line() -> u64 {
    9001
}

fn default_broadcast_channel() -> u16 {
    2
}

fn default_chat_sender() -> String {
    "Frontline".to_string()
}

fn default_chat_message() -> String {
    "Welcome to Frontline".to_string()
}

fn default_chat_prestige() -> u32 {
    6
}

fn default_current_server_time() -> u64 {
    161351681600
}

fn default_game_start_time() -> u64 {
    1
}

fn default_server_game_id() -> u64 {
    1125336957151523818
}

fn default_server_version() -> String {
    "1.52.0.1700".to_string()
}

impl Default for FrontendConfig {
    fn default() -> Self {
        Self {
            simulate_queue: false,
            place_in_line: default_place_in_line(),
            number_in_line: default_number_in_line(),
        }
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            broadcast_channel: default_broadcast_channel(),
            chat_sender: default_chat_sender(),
            chat_message: default_chat_message(),
            chat_prestige: default_chat_prestige(),
            current_server_time: default_current_server_time(),
            game_start_time: default_game_start_time(),
            server_game_id: default_server_game_id(),
            server_version: default_server_version(),
            replay_recorded_frames: false,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("config/server.toml"),
            loaded_from_file: false,
            server_name: default_server_name(),
            bind_address: default_bind_address(),
            frontend_port: default_frontend_port(),
            data_path: default_data_path(),
            session_key: String::new(),
            max_connections: default_max_connections(),
            log_format: default_log_format(),
            frontend: FrontendConfig::default(),
            bootstrap: BootstrapConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from file and environment variables
    ///
    /// Logs nothing; callers report `loaded_from_file` once logging is up.
    pub async fn load() -> Result<Self> {
        // Determine config path from environment or use default
        let config_path = env::var("FRONTLINE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/server.toml"));

        let mut config = Self::load_file(&config_path).await?;

        // Override with environment variables
        config.apply_env_overrides();

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Read a config file, falling back to defaults when it does not exist
    pub async fn load_file(config_path: &Path) -> Result<Self> {
        let mut config = if config_path.exists() {
            let content = tokio::fs::read_to_string(config_path)
                .await
                .with_context(|| {
                    format!("Failed to read config file: {}", config_path.display())
                })?;

            let mut config = Self::from_toml(&content).with_context(|| {
                format!("Failed to parse config file: {}", config_path.display())
            })?;
            config.loaded_from_file = true;
            config
        } else {
            Self::default()
        };

        config.config_path = config_path.to_path_buf();
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("FRONTLINE_SERVER_NAME") {
            self.server_name = val;
        }
        if let Ok(val) = env::var("FRONTLINE_BIND_ADDRESS") {
            self.bind_address = val;
        }
        if let Ok(val) = env::var("FRONTLINE_PORT") {
            if let Ok(port) = val.parse() {
                self.frontend_port = port;
            }
        }
        if let Ok(val) = env::var("FRONTLINE_DATA_PATH") {
            self.data_path = PathBuf::from(val);
        }
        if let Ok(val) = env::var("FRONTLINE_MAX_CONNECTIONS") {
            if let Ok(max) = val.parse() {
                self.max_connections = max;
            }
        }
        if let Ok(val) = env::var("FRONTLINE_LOG_FORMAT") {
            self.log_format = val;
        }
        if let Ok(val) = env::var("FRONTLINE_SIMULATE_QUEUE") {
            self.frontend.simulate_queue = val.to_lowercase() == "true" || val == "1";
        }

        // Key material (from secure environment)
        if let Ok(val) = env::var("FRONTLINE_SESSION_KEY") {
            self.session_key = val;
        }
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.frontend_port == 0 {
            anyhow::bail!("Frontend port must be non-zero");
        }

        if self.max_connections == 0 {
            anyhow::bail!("Max connections must be at least 1");
        }

        if self.log_format != "pretty" && self.log_format != "json" {
            anyhow::bail!("Log format must be \"pretty\" or \"json\"");
        }

        if self.bootstrap.broadcast_channel == 0 {
            anyhow::bail!("Broadcast channel must be non-zero");
        }

        if self.bootstrap.chat_prestige > 6 {
            anyhow::bail!("Chat prestige level must be between 0 and 6");
        }

        if !self.session_key.is_empty() {
            SessionKey::from_hex(&self.session_key).context("Invalid session key")?;
        }

        Ok(())
    }

    /// Resolve the session key, generating one when none is configured
    pub fn session_key(&self) -> Result<SessionKey> {
        if self.session_key.is_empty() {
            tracing::warn!("No session key configured, generating a random one");
            return Ok(SessionKey::generate());
        }
        Ok(SessionKey::from_hex(&self.session_key)?)
    }

    /// Get the listener socket address string
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.frontend_port)
    }
}
