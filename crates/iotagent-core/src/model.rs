//! Device and attribute data model types.
//!
//! These types represent the structures the agent works with while processing
//! a single message:
//! - Device descriptors borrowed from the registry
//! - Attribute records handed to the context backend
//! - The payload dialect a device declares for its measures

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Attribute name that always resolves to the timestamp type.
pub const TIMESTAMP_ATTRIBUTE: &str = "TimeInstant";

/// Type given to the timestamp attribute in NGSIv2 updates.
pub const TIMESTAMP_TYPE_NGSI2: &str = "DateTime";

/// Type used when neither the device nor the payload declares one.
pub const DEFAULT_ATTRIBUTE_TYPE: &str = "Text";

/// Type tag carried by the `@context` member of NGSI-LD payloads.
pub const LD_CONTEXT: &str = "@context";

/// A raw message as delivered by a transport.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    pub topic: String,
    pub body: Vec<u8>,
}

impl RawMessage {
    pub fn new(topic: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            body: body.into(),
        }
    }
}

/// A decoded message body.
///
/// JSON arrays decode to [`ParsedPayload::Batch`], any other JSON value to
/// [`ParsedPayload::Single`]. Bodies that are not JSON are kept as their hex
/// rendering in [`ParsedPayload::Opaque`]. All three can be viewed as a
/// sequence of elements.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedPayload {
    Single(Value),
    Batch(Vec<Value>),
    /// Always holds a `Value::String` with the hex encoded body.
    Opaque(Value),
}

impl ParsedPayload {
    pub fn opaque(hex: impl Into<String>) -> Self {
        ParsedPayload::Opaque(Value::String(hex.into()))
    }

    /// The payload as a sequence; single values are a one-element slice.
    pub fn elements(&self) -> &[Value] {
        match self {
            ParsedPayload::Single(value) | ParsedPayload::Opaque(value) => {
                std::slice::from_ref(value)
            }
            ParsedPayload::Batch(values) => values,
        }
    }

    pub fn first(&self) -> Option<&Value> {
        self.elements().first()
    }

    pub fn len(&self) -> usize {
        self.elements().len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements().is_empty()
    }

    /// True when there is at least one element and every element is a JSON object.
    pub fn all_records(&self) -> bool {
        !self.is_empty() && self.elements().iter().all(Value::is_object)
    }

    pub fn is_opaque(&self) -> bool {
        matches!(self, ParsedPayload::Opaque(_))
    }

}

/// Payload dialect declared by a device.
///
/// Resolved once from the device's `payloadType` string. Comparison is
/// case-insensitive and any unrecognized value selects [`Dialect::Plain`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "String")]
pub enum Dialect {
    /// Flat `{"attr": value}` objects.
    #[default]
    Plain,
    /// NGSIv2 entities: `{"attr": {"value": .., "type": .., "metadata": ..}}`.
    ContextV2,
    /// NGSI-LD entities with Property / GeoProperty / Relationship members.
    ContextLd,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Plain => "json",
            Dialect::ContextV2 => "ngsiv2",
            Dialect::ContextLd => "ngsild",
        }
    }
}

impl From<&str> for Dialect {
    fn from(s: &str) -> Self {
        if s.eq_ignore_ascii_case("ngsiv2") {
            Dialect::ContextV2
        } else if s.eq_ignore_ascii_case("ngsild") {
            Dialect::ContextLd
        } else {
            Dialect::Plain
        }
    }
}

impl From<Option<String>> for Dialect {
    fn from(s: Option<String>) -> Self {
        s.as_deref().map(Dialect::from).unwrap_or_default()
    }
}

impl From<Dialect> for String {
    fn from(d: Dialect) -> Self {
        d.as_str().to_string()
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An active attribute declared in the device's static configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveAttribute {
    pub name: String,

    #[serde(rename = "type")]
    pub attr_type: String,

    /// Name the attribute takes on the entity, if different.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
}

impl ActiveAttribute {
    pub fn new(name: impl Into<String>, attr_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attr_type: attr_type.into(),
            object_id: None,
        }
    }
}

/// A provisioned device as resolved by the registry.
///
/// Read-only from the agent's point of view: the registry owns it and the
/// pipeline borrows it for the duration of one message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescriptor {
    /// Device id as it appears in transport topics.
    pub id: String,

    /// Entity type of the device in the context backend.
    #[serde(rename = "type")]
    pub device_type: String,

    /// Entity name in the context backend.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default)]
    pub service: String,

    #[serde(default)]
    pub subservice: String,

    /// Preferred outbound transport (e.g. "MQTT", "AMQP").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<String>,

    #[serde(default)]
    pub payload_type: Dialect,

    #[serde(default)]
    pub active: Vec<ActiveAttribute>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl DeviceDescriptor {
    pub fn new(id: impl Into<String>, device_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            device_type: device_type.into(),
            name: None,
            service: String::new(),
            subservice: String::new(),
            transport: None,
            payload_type: Dialect::Plain,
            active: Vec::new(),
            api_key: None,
        }
    }

    pub fn with_active(mut self, name: &str, attr_type: &str) -> Self {
        self.active.push(ActiveAttribute::new(name, attr_type));
        self
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.payload_type = dialect;
        self
    }

    /// The entity this device maps to: its name, or `<type>:<id>`.
    pub fn entity_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("{}:{}", self.device_type, self.id))
    }

    /// Look up a declared active attribute by exact name.
    pub fn active_attribute(&self, name: &str) -> Option<&ActiveAttribute> {
        self.active.iter().find(|a| a.name == name)
    }
}

/// A typed attribute ready for upsert into the context backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeRecord {
    pub name: String,

    #[serde(rename = "type")]
    pub attr_type: String,

    pub value: Value,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl AttributeRecord {
    pub fn new(name: impl Into<String>, attr_type: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            attr_type: attr_type.into(),
            value,
            metadata: None,
        }
    }
}

/// Result of extracting attributes from one decoded record.
///
/// A record carrying exactly one entity flattens to [`Extracted::Single`];
/// more than one entity keeps one list per entity.
#[derive(Debug, Clone, PartialEq)]
pub enum Extracted {
    Single(Vec<AttributeRecord>),
    Batch(Vec<Vec<AttributeRecord>>),
}

impl Extracted {
    /// Normalize to a list of attribute lists, one per logical update.
    pub fn into_batches(self) -> Vec<Vec<AttributeRecord>> {
        match self {
            Extracted::Single(values) => vec![values],
            Extracted::Batch(batches) => batches,
        }
    }

    pub fn is_batch(&self) -> bool {
        matches!(self, Extracted::Batch(_))
    }
}

/// Service group (API key scoped provisioning) as resolved by the registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceGroup {
    #[serde(default)]
    pub apikey: String,

    #[serde(default)]
    pub resource: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<String>,

    #[serde(default)]
    pub service: String,

    #[serde(default)]
    pub subservice: String,
}
