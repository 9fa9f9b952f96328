//! Attribute extraction from decoded records.
//!
//! A decoded record is turned into typed [`AttributeRecord`]s according to the
//! device's [`Dialect`]:
//! - `Plain`: every key of the object is an attribute
//! - `ContextV2`: NGSIv2 entities, `{"attr": {"value", "type", "metadata"}}`
//! - `ContextLd`: NGSI-LD entities with Property / GeoProperty / Relationship
//!
//! Both NGSI dialects accept either a bare entity or a batch envelope
//! (`{"actionType": .., "entities": [..]}`).

use serde_json::{json, Map, Value};

use crate::inference::infer_type;
use crate::model::{AttributeRecord, DeviceDescriptor, Dialect, Extracted, LD_CONTEXT};

/// Extract the attributes carried by one decoded record.
///
/// Plain records always produce [`Extracted::Single`]. NGSI records produce
/// `Single` when they hold exactly one entity and [`Extracted::Batch`] with one
/// list per entity, in input order, otherwise.
pub fn extract(device: &DeviceDescriptor, record: &Value, dialect: Dialect) -> Extracted {
    match dialect {
        Dialect::Plain => Extracted::Single(extract_plain(device, record)),
        Dialect::ContextV2 | Dialect::ContextLd => extract_entities(device, record, dialect),
    }
}

fn extract_plain(device: &DeviceDescriptor, record: &Value) -> Vec<AttributeRecord> {
    let Some(map) = record.as_object() else {
        return Vec::new();
    };

    map.iter()
        .map(|(name, value)| AttributeRecord::new(name, infer_type(name, device, None), value.clone()))
        .collect()
}

/// Normalize an NGSI record to its list of entities.
///
/// A batch envelope needs both `actionType` and an `entities` array; anything
/// else is treated as a single entity.
pub fn entities(record: &Value) -> Vec<&Value> {
    if let Some(map) = record.as_object() {
        if map.contains_key("actionType") {
            if let Some(Value::Array(entities)) = map.get("entities") {
                return entities.iter().collect();
            }
        }
    }
    vec![record]
}

fn extract_entities(device: &DeviceDescriptor, record: &Value, dialect: Dialect) -> Extracted {
    let mut per_entity: Vec<Vec<AttributeRecord>> = entities(record)
        .into_iter()
        .map(|entity| extract_entity(device, entity, dialect))
        .collect();

    if per_entity.len() > 1 {
        Extracted::Batch(per_entity)
    } else {
        Extracted::Single(per_entity.pop().unwrap_or_default())
    }
}

fn extract_entity(device: &DeviceDescriptor, entity: &Value, dialect: Dialect) -> Vec<AttributeRecord> {
    let Some(map) = entity.as_object() else {
        return Vec::new();
    };

    map.iter()
        .map(|(name, member)| {
            if name == "id" || name == "type" {
                // Entity identity travels as a plain measure; the backend renames it.
                AttributeRecord::new(name, infer_type(name, device, None), member.clone())
            } else if dialect == Dialect::ContextLd {
                ld_attribute(device, name, member)
            } else {
                v2_attribute(device, name, member)
            }
        })
        .collect()
}

fn v2_attribute(device: &DeviceDescriptor, name: &str, member: &Value) -> AttributeRecord {
    let Some(obj) = member.as_object() else {
        return AttributeRecord::new(name, infer_type(name, device, None), member.clone());
    };

    let hint = obj.get("type").and_then(Value::as_str);
    AttributeRecord {
        name: name.to_string(),
        attr_type: infer_type(name, device, hint),
        value: obj.get("value").cloned().unwrap_or(Value::Null),
        metadata: obj.get("metadata").cloned(),
    }
}

fn ld_attribute(device: &DeviceDescriptor, name: &str, member: &Value) -> AttributeRecord {
    if name.eq_ignore_ascii_case(LD_CONTEXT) {
        return AttributeRecord::new(name, LD_CONTEXT, member.clone());
    }

    let Some(obj) = member.as_object() else {
        return AttributeRecord::new(name, infer_type(name, device, None), member.clone());
    };

    let declared = obj.get("type").and_then(Value::as_str);
    let value = match declared.map(str::to_ascii_lowercase).as_deref() {
        Some("property") | Some("geoproperty") => obj.get("value"),
        Some("relationship") => obj.get("object"),
        _ => None,
    };

    let metadata: Map<String, Value> = obj
        .iter()
        .filter(|(key, _)| !matches!(key.to_ascii_lowercase().as_str(), "type" | "value" | "object"))
        .map(|(key, field)| (key.clone(), json!({ "value": field })))
        .collect();

    AttributeRecord {
        name: name.to_string(),
        attr_type: infer_type(name, device, declared),
        value: value.cloned().unwrap_or(Value::Null),
        metadata: (!metadata.is_empty()).then(|| Value::Object(metadata)),
    }
}
