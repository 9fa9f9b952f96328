//! Per-message logging context.
//!
//! Every message gets its own [`LogContext`], passed explicitly down the call
//! chain and entered as a tracing span, so concurrently processed messages
//! never share or overwrite each other's correlation data.

use iotagent_core::DeviceDescriptor;
use tracing::Span;
use uuid::Uuid;

const NOT_AVAILABLE: &str = "n/a";

/// Correlation and tenancy data attached to every log line of one message.
#[derive(Debug, Clone, PartialEq)]
pub struct LogContext {
    /// Operation name (e.g. "IoTAgentJSON.MQTTBinding").
    pub op: &'static str,
    /// Correlation id shared by everything triggered by the same message.
    pub corr: Uuid,
    /// Transaction id of the current update attempt.
    pub trans_id: Uuid,
    pub service: String,
    pub subservice: String,
}

impl LogContext {
    /// Start a new context with fresh correlation and transaction ids.
    pub fn new(op: &'static str) -> Self {
        let id = Uuid::new_v4();
        Self {
            op,
            corr: id,
            trans_id: id,
            service: NOT_AVAILABLE.to_string(),
            subservice: NOT_AVAILABLE.to_string(),
        }
    }

    /// Copy of this context with the device's service and subservice.
    pub fn fill_service(&self, device: &DeviceDescriptor) -> Self {
        let mut ctx = self.clone();
        if !device.service.is_empty() {
            ctx.service = device.service.clone();
        }
        if !device.subservice.is_empty() {
            ctx.subservice = device.subservice.clone();
        }
        ctx
    }

    /// Copy of this context with a new transaction id and the same correlation id.
    pub fn child(&self) -> Self {
        Self {
            trans_id: Uuid::new_v4(),
            ..self.clone()
        }
    }

    /// Span carrying this context's fields.
    pub fn span(&self) -> Span {
        tracing::info_span!(
            "iota",
            op = self.op,
            corr = %self.corr,
            trans = %self.trans_id,
            srv = %self.service,
            subsrv = %self.subservice,
        )
    }
}
