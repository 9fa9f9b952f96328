//! Configuration message types.
//!
//! Devices publish configuration requests on their `configuration/commands`
//! topic and receive the answer as a notification on their outbound channel:
//! - Device → Agent: ConfigurationRequest
//! - Agent → Device: ConfigurationNotification
//!
//! Messages are serialized as JSON.

use iotagent_core::{AttributeRecord, ServiceGroup};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Timestamp format of the `dt` member in notifications.
pub const NOTIFICATION_DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Kind of configuration request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigurationKind {
    /// Read the current values of the listed attributes.
    Configuration,
    /// Subscribe the device to changes of the listed attributes.
    Subscription,
    #[serde(other)]
    Unknown,
}

/// Configuration request sent by a device.
///
/// # Example
/// ```json
/// { "type": "configuration", "fields": ["sleepTime", "warningLevel"] }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationRequest {
    #[serde(rename = "type")]
    pub kind: ConfigurationKind,

    #[serde(default)]
    pub fields: Vec<String>,
}

/// Configuration values sent back to a device.
///
/// Serializes as a flat object of attribute values plus a `dt` timestamp.
///
/// # Example
/// ```json
/// { "sleepTime": 200, "warningLevel": "ERROR", "dt": "20240117T103000Z" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigurationNotification(pub Map<String, Value>);

impl ConfigurationNotification {
    /// Build a notification from queried attributes, stamped with the current time.
    pub fn new(values: &[AttributeRecord]) -> Self {
        Self::at(values, chrono::Utc::now())
    }

    /// Build a notification stamped with the given time.
    pub fn at(values: &[AttributeRecord], now: chrono::DateTime<chrono::Utc>) -> Self {
        let mut map: Map<String, Value> = values
            .iter()
            .map(|record| (record.name.clone(), record.value.clone()))
            .collect();
        map.insert(
            "dt".to_string(),
            Value::String(now.format(NOTIFICATION_DATE_FORMAT).to_string()),
        );
        Self(map)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }
}

/// Everything an outbound transport needs to answer a configuration request.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigurationDelivery {
    pub api_key: String,
    pub group: ServiceGroup,
    pub device_id: String,
    pub notification: ConfigurationNotification,
}

impl ConfigurationDelivery {
    /// Topic the notification is published on.
    pub fn topic(&self) -> String {
        format!("/{}/{}/configuration/values", self.api_key, self.device_id)
    }
}
