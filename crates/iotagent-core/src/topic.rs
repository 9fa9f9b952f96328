//! Transport topic parsing and flow selection.
//!
//! Topics are slash-separated strings of the form
//! `/<apiKey>/<segment>/<deviceId>/<action>[/<attribute>]`. Segments are
//! positional: the device id is always at index 3 and a single-attribute name,
//! when present, at index 5 (index 0 is the empty segment before the leading
//! slash).

use thiserror::Error;

use crate::model::ParsedPayload;

/// Reserved token selecting the configuration flow.
pub const CONFIGURATION_TOKEN: &str = "configuration";

/// Reserved token following [`CONFIGURATION_TOKEN`].
pub const COMMANDS_TOKEN: &str = "commands";

const API_KEY_INDEX: usize = 1;
const DEVICE_ID_INDEX: usize = 3;
const ACTION_INDEX: usize = 4;
const ATTRIBUTE_INDEX: usize = 5;

/// A parsed transport topic.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicParts {
    /// The normalized topic (always starts with '/')
    raw: String,
    /// Topic segments split by '/'
    segments: Vec<String>,
}

impl TopicParts {
    /// Normalize a topic to start with '/' and split it into segments.
    pub fn parse(topic: &str) -> Self {
        let raw = if topic.starts_with('/') {
            topic.to_string()
        } else {
            format!("/{}", topic)
        };

        Self {
            segments: raw.split('/').map(String::from).collect(),
            raw,
        }
    }

    /// Get the normalized topic string.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Segment at `index`, if present and non-empty.
    pub fn segment(&self, index: usize) -> Option<&str> {
        self.segments
            .get(index)
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn api_key(&self) -> Option<&str> {
        self.segment(API_KEY_INDEX)
    }

    pub fn device_id(&self) -> Option<&str> {
        self.segment(DEVICE_ID_INDEX)
    }

    pub fn action(&self) -> Option<&str> {
        self.segment(ACTION_INDEX)
    }

    /// Name of the single attribute addressed by the topic.
    pub fn attribute(&self) -> Option<&str> {
        self.segment(ATTRIBUTE_INDEX)
    }

    /// True when the topic carries the `configuration/commands` token pair.
    ///
    /// The pair is accepted right after the device id (`.../<deviceId>/configuration/commands`)
    /// as well as in place of it (`.../configuration/commands`).
    pub fn is_configuration_topic(&self) -> bool {
        let pair_at = |i: usize| {
            self.segment(i) == Some(CONFIGURATION_TOKEN)
                && self.segment(i + 1) == Some(COMMANDS_TOKEN)
        };
        pair_at(DEVICE_ID_INDEX) || pair_at(ACTION_INDEX)
    }
}

impl std::fmt::Display for TopicParts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl From<&str> for TopicParts {
    fn from(s: &str) -> Self {
        TopicParts::parse(s)
    }
}

/// The processing flow a message is routed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    /// The device asks for configuration values or subscriptions.
    Configuration,
    /// The payload is the value of one attribute named by the topic.
    SingleMeasure { attribute: String },
    /// Every payload element is a record of attributes.
    MultiMeasure,
}

impl Flow {
    pub fn name(&self) -> &'static str {
        match self {
            Flow::Configuration => "configuration",
            Flow::SingleMeasure { .. } => "single-measure",
            Flow::MultiMeasure => "multi-measure",
        }
    }
}

/// Errors that can occur when routing a message.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RouteError {
    #[error("No device id in topic {0}")]
    MissingDeviceId(String),

    #[error("Topic {topic} and payload match no known message format")]
    FormatMismatch { topic: String },
}

/// A topic resolved to its device and flow.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub device_id: String,
    pub api_key: String,
    pub flow: Flow,
}

/// Select the flow for a parsed topic and decoded payload.
///
/// Order matters: the configuration token pair overrides any attribute
/// segment, and a payload that is neither addressed to an attribute nor made
/// of records is rejected.
pub fn select_flow(parts: &TopicParts, payload: &ParsedPayload) -> Result<Flow, RouteError> {
    if parts.is_configuration_topic() && !payload.is_empty() {
        Ok(Flow::Configuration)
    } else if let Some(attribute) = parts.attribute() {
        Ok(Flow::SingleMeasure {
            attribute: attribute.to_string(),
        })
    } else if payload.all_records() {
        Ok(Flow::MultiMeasure)
    } else {
        Err(RouteError::FormatMismatch {
            topic: parts.as_str().to_string(),
        })
    }
}

/// Parse a topic and select its flow in one step.
pub fn route(topic: &str, payload: &ParsedPayload) -> Result<Route, RouteError> {
    let parts = TopicParts::parse(topic);
    let device_id = parts
        .device_id()
        .ok_or_else(|| RouteError::MissingDeviceId(parts.as_str().to_string()))?
        .to_string();
    let flow = select_flow(&parts, payload)?;

    Ok(Route {
        device_id,
        api_key: parts.api_key().unwrap_or_default().to_string(),
        flow,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object() -> ParsedPayload {
        ParsedPayload::Single(json!({"temp": 21}))
    }

    #[test]
    fn test_topic_parsing() {
        let parts = TopicParts::parse("/k/x/dev1/attrs/temp");
        assert_eq!(parts.segments(), &["", "k", "x", "dev1", "attrs", "temp"]);
        assert_eq!(parts.api_key(), Some("k"));
        assert_eq!(parts.device_id(), Some("dev1"));
        assert_eq!(parts.action(), Some("attrs"));
        assert_eq!(parts.attribute(), Some("temp"));
    }

    #[test]
    fn test_leading_slash_normalized() {
        let parts = TopicParts::parse("bp/meter/emeter-313/data");
        assert_eq!(parts.as_str(), "/bp/meter/emeter-313/data");
        assert_eq!(parts.device_id(), Some("emeter-313"));
        assert_eq!(parts.attribute(), None);
    }

    #[test]
    fn test_single_measure_route() {
        let route = route("/k/x/dev1/attrs/temp", &ParsedPayload::Single(json!(21))).unwrap();
        assert_eq!(route.device_id, "dev1");
        assert_eq!(
            route.flow,
            Flow::SingleMeasure {
                attribute: "temp".to_string()
            }
        );
    }

    #[test]
    fn test_configuration_overrides_attribute() {
        let payload = ParsedPayload::Single(json!({"type": "configuration", "fields": ["a"]}));
        let route = route("/k/x/dev1/configuration/commands", &payload).unwrap();
        assert_eq!(route.flow, Flow::Configuration);
        assert_eq!(route.device_id, "dev1");
    }

    #[test]
    fn test_configuration_tokens_in_device_position() {
        let parts = TopicParts::parse("/k/x/configuration/commands");
        assert!(parts.is_configuration_topic());
        assert_eq!(select_flow(&parts, &object()).unwrap(), Flow::Configuration);
    }

    #[test]
    fn test_configuration_requires_payload() {
        let parts = TopicParts::parse("/k/x/dev1/configuration/commands");
        let flow = select_flow(&parts, &ParsedPayload::Batch(vec![])).unwrap();
        assert_eq!(
            flow,
            Flow::SingleMeasure {
                attribute: "commands".to_string()
            }
        );
    }

    #[test]
    fn test_multi_measure_route() {
        let payload = ParsedPayload::Batch(vec![json!({"a": 1}), json!({"b": 2})]);
        let route = route("/k/x/dev1/attrs", &payload).unwrap();
        assert_eq!(route.flow, Flow::MultiMeasure);
    }

    #[test]
    fn test_format_mismatch() {
        let payload = ParsedPayload::opaque("deadbeef");
        let err = route("/k/x/dev1/attrs", &payload).unwrap_err();
        assert!(matches!(err, RouteError::FormatMismatch { .. }));

        let mixed = ParsedPayload::Batch(vec![json!({"a": 1}), json!(3)]);
        assert!(route("/k/x/dev1/attrs", &mixed).is_err());
    }

    #[test]
    fn test_missing_device_id() {
        let err = route("/k/x", &object()).unwrap_err();
        assert_eq!(err, RouteError::MissingDeviceId("/k/x".to_string()));
    }
}
