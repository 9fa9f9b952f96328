//! Context entity store.
//!
//! The store keeps the current attributes of every entity the agent has
//! updated. It backs the in-memory context backend used by the binary and by
//! tests; a production deployment talks to an external context broker instead.

use crate::model::AttributeRecord;
use serde_json::{json, Map, Value};

/// Prefix given to entity identity members sent as measures.
pub const MEASURE_PREFIX: &str = "measure_";

/// Trait for context entity storage implementations.
pub trait ContextStore: Send + Sync {
    /// Upsert attributes on an entity, creating it if needed.
    fn apply_update(&mut self, entity_id: &str, entity_type: &str, values: &[AttributeRecord]);

    /// Get the full entity (`{"id", "type", <attr>: {"type", "value", "metadata"}}`).
    fn get_entity(&self, entity_id: &str) -> Option<Value>;

    /// Get one attribute of an entity.
    fn get_attribute(&self, entity_id: &str, name: &str) -> Option<Value>;

    /// Read back the requested attributes of an entity as records.
    ///
    /// Attributes the entity does not have are skipped.
    fn query(&self, entity_id: &str, fields: &[String]) -> Vec<AttributeRecord>;

    /// Get every entity as JSON.
    fn entities(&self) -> &Value;
}

/// In-memory context store implementation.
///
/// Stores entities as a JSON object keyed by entity id.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    data: Value,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            data: Value::Object(Map::new()),
        }
    }

    /// Stored attribute name for a record.
    ///
    /// `id` and `type` would clobber the entity identity, so they are kept
    /// as `measure_id` / `measure_type`.
    fn attribute_key(name: &str) -> String {
        match name {
            "id" | "type" => format!("{}{}", MEASURE_PREFIX, name),
            _ => name.to_string(),
        }
    }

    fn entity_mut(&mut self, entity_id: &str, entity_type: &str) -> Option<&mut Map<String, Value>> {
        let entities = self.data.as_object_mut()?;
        let entity = entities
            .entry(entity_id.to_string())
            .or_insert_with(|| json!({ "id": entity_id, "type": entity_type }));
        entity.as_object_mut()
    }

    /// Get the number of entities in the store.
    pub fn entity_count(&self) -> usize {
        self.data.as_object().map(Map::len).unwrap_or(0)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextStore for MemoryStore {
    fn apply_update(&mut self, entity_id: &str, entity_type: &str, values: &[AttributeRecord]) {
        let Some(entity) = self.entity_mut(entity_id, entity_type) else {
            return;
        };

        for record in values {
            let mut attribute = json!({
                "type": record.attr_type,
                "value": record.value,
            });
            if let Some(metadata) = &record.metadata {
                attribute["metadata"] = metadata.clone();
            }
            entity.insert(Self::attribute_key(&record.name), attribute);
        }
    }

    fn get_entity(&self, entity_id: &str) -> Option<Value> {
        self.data.get(entity_id).cloned()
    }

    fn get_attribute(&self, entity_id: &str, name: &str) -> Option<Value> {
        self.data.get(entity_id)?.get(name).cloned()
    }

    fn query(&self, entity_id: &str, fields: &[String]) -> Vec<AttributeRecord> {
        let Some(entity) = self.data.get(entity_id) else {
            return Vec::new();
        };

        fields
            .iter()
            .filter_map(|field| {
                let attribute = entity.get(field)?;
                Some(AttributeRecord {
                    name: field.clone(),
                    attr_type: attribute
                        .get("type")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    value: attribute.get("value").cloned().unwrap_or(Value::Null),
                    metadata: attribute.get("metadata").cloned(),
                })
            })
            .collect()
    }

    fn entities(&self) -> &Value {
        &self.data
    }
}
