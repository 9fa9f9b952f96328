//! Alarm bookkeeping.
//!
//! Alarms are a side channel: they flag a faulty condition (a broken
//! transport, an unreachable context backend) without affecting message
//! processing. Only transitions are logged.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use tracing::{error, info};

/// Raised when a configuration request cannot be answered.
pub const TRANSPORT_ALARM: &str = "MQTTB-ALARM";

/// Raised when the context backend rejects an update.
pub const BACKEND_ALARM: &str = "ORION-ALARM";

/// Fault-signalling side channel.
pub trait AlarmSink: Send + Sync {
    fn raise(&self, code: &str, details: &str);

    fn release(&self, code: &str);
}

/// In-process alarm registry.
#[derive(Debug, Default)]
pub struct AlarmRegistry {
    active: RwLock<HashMap<String, String>>,
}

impl AlarmRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self, code: &str) -> bool {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(code)
    }

    /// Currently raised alarms with their details.
    pub fn active_alarms(&self) -> Vec<(String, String)> {
        self.active
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(code, details)| (code.clone(), details.clone()))
            .collect()
    }
}

impl AlarmSink for AlarmRegistry {
    fn raise(&self, code: &str, details: &str) {
        let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
        if active.insert(code.to_string(), details.to_string()).is_none() {
            error!("Raising [{}]: {}", code, details);
        }
    }

    fn release(&self, code: &str) {
        let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
        if active.remove(code).is_some() {
            info!("Releasing [{}]", code);
        }
    }
}
