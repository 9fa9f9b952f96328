//! File-backed configuration storage.
//!
//! The file is a JSON object keyed by storage key; the agent settings live
//! under `"settings"`.

use std::path::{Path, PathBuf};

use iotagent_core::config::{ConfigError, ConfigStorage};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

pub struct FileConfigStorage {
    path: PathBuf,
}

impl FileConfigStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> Result<Map<String, Value>, ConfigError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(ConfigError::ReadError(e.to_string())),
        };
        match serde_json::from_str(&text) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(ConfigError::InvalidData(format!(
                "{} is not a JSON object",
                self.path.display()
            ))),
            Err(e) => Err(ConfigError::InvalidData(e.to_string())),
        }
    }

    fn write_document(&self, document: Map<String, Value>) -> Result<(), ConfigError> {
        let text = serde_json::to_string_pretty(&Value::Object(document))
            .map_err(|e| ConfigError::WriteError(e.to_string()))?;
        std::fs::write(&self.path, text).map_err(|e| ConfigError::WriteError(e.to_string()))
    }
}

impl ConfigStorage for FileConfigStorage {
    fn load_value<T: DeserializeOwned>(&self, key: &str) -> Result<T, ConfigError> {
        let value = self
            .read_document()?
            .remove(key)
            .ok_or_else(|| ConfigError::NotFound(key.to_string()))?;
        serde_json::from_value(value).map_err(|e| ConfigError::InvalidData(e.to_string()))
    }

    fn save_value<T: Serialize>(&self, key: &str, value: &T) -> Result<(), ConfigError> {
        let value =
            serde_json::to_value(value).map_err(|e| ConfigError::WriteError(e.to_string()))?;
        let mut document = self.read_document()?;
        document.insert(key.to_string(), value);
        self.write_document(document)
    }

    fn has_key(&self, key: &str) -> bool {
        self.read_document()
            .map(|document| document.contains_key(key))
            .unwrap_or(false)
    }

    fn delete_key(&self, key: &str) -> Result<(), ConfigError> {
        let mut document = self.read_document()?;
        if document.remove(key).is_none() {
            return Err(ConfigError::NotFound(key.to_string()));
        }
        self.write_document(document)
    }
}
