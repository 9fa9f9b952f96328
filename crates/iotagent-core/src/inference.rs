//! Attribute type inference.
//!
//! The device's static configuration is authoritative: a declared active
//! attribute always wins over any type carried in the payload itself.

use crate::model::{
    DeviceDescriptor, DEFAULT_ATTRIBUTE_TYPE, TIMESTAMP_ATTRIBUTE, TIMESTAMP_TYPE_NGSI2,
};

/// Decide the type of an attribute.
///
/// Resolution order, first match wins:
/// 1. the type declared for `name` in `device.active`
/// 2. the timestamp type, when `name` is the timestamp attribute
/// 3. the `hint` supplied by the caller (e.g. an NGSI `type` member)
/// 4. [`DEFAULT_ATTRIBUTE_TYPE`]
pub fn infer_type(name: &str, device: &DeviceDescriptor, hint: Option<&str>) -> String {
    if let Some(active) = device.active_attribute(name) {
        return active.attr_type.clone();
    }

    if name.eq_ignore_ascii_case(TIMESTAMP_ATTRIBUTE) {
        return TIMESTAMP_TYPE_NGSI2.to_string();
    }

    hint.unwrap_or(DEFAULT_ATTRIBUTE_TYPE).to_string()
}
