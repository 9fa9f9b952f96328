//! Configuration storage abstraction.
//!
//! This module provides the agent settings types and a trait for the storage
//! they are loaded from. The Linux binary reads them from a JSON file; tests
//! use an in-memory map.
//!
//! Provisioned devices and service groups can be listed in the settings to
//! seed the in-memory registry.

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::model::{DeviceDescriptor, ServiceGroup};

/// Transport used for configuration replies when neither the device nor its
/// group names one.
pub const DEFAULT_TRANSPORT: &str = "MQTT";

/// Errors that can occur during configuration operations.
#[derive(Debug)]
pub enum ConfigError {
    /// The requested configuration was not found.
    NotFound(String),
    /// Failed to read configuration.
    ReadError(String),
    /// Failed to write configuration.
    WriteError(String),
    /// Configuration data is invalid.
    InvalidData(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::NotFound(key) => write!(f, "Configuration not found: {}", key),
            ConfigError::ReadError(msg) => write!(f, "Read error: {}", msg),
            ConfigError::WriteError(msg) => write!(f, "Write error: {}", msg),
            ConfigError::InvalidData(msg) => write!(f, "Invalid data: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Abstract configuration storage.
///
/// All methods are synchronous; settings are read once at startup.
pub trait ConfigStorage: Send + Sync {
    /// Load agent settings.
    fn load_settings(&self) -> Result<AgentSettings, ConfigError> {
        self.load_value(SETTINGS_KEY)
    }

    /// Save agent settings.
    fn save_settings(&self, settings: &AgentSettings) -> Result<(), ConfigError> {
        self.save_value(SETTINGS_KEY, settings)
    }

    /// Load a value by key.
    fn load_value<T: DeserializeOwned>(&self, key: &str) -> Result<T, ConfigError>;

    /// Save a value by key.
    fn save_value<T: Serialize>(&self, key: &str, value: &T) -> Result<(), ConfigError>;

    /// Check if a key exists.
    fn has_key(&self, key: &str) -> bool;

    /// Delete a key.
    fn delete_key(&self, key: &str) -> Result<(), ConfigError>;
}

/// Key the agent settings are stored under.
pub const SETTINGS_KEY: &str = "settings";

/// Agent settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSettings {
    /// Resource path used to look up service groups.
    #[serde(default)]
    pub default_resource: String,

    /// Outbound transport used when neither device nor group sets one.
    #[serde(default = "default_transport")]
    pub default_transport: String,

    /// API key assumed for topics that do not carry one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_api_key: Option<String>,

    #[serde(default)]
    pub http: HttpSettings,

    /// Devices provisioned at startup.
    #[serde(default)]
    pub devices: Vec<DeviceDescriptor>,

    /// Service groups provisioned at startup.
    #[serde(default)]
    pub groups: Vec<ServiceGroup>,
}

fn default_transport() -> String {
    DEFAULT_TRANSPORT.to_string()
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            default_resource: String::new(),
            default_transport: default_transport(),
            default_api_key: None,
            http: HttpSettings::default(),
            devices: Vec::new(),
            groups: Vec::new(),
        }
    }
}

/// HTTP ingress settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    7896
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}
