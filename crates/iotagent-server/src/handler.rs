//! Transport entry points.
//!
//! Each incoming message gets a fresh [`LogContext`], has its body decoded
//! and topic parsed, and is matched to a device before the [`Dispatcher`]
//! takes over. Processing is fire-and-forget from the transport's side:
//! [`MessageHandler::spawn_message`] runs it on its own task and every error
//! ends in a log line.

use std::sync::Arc;

use iotagent_core::{select_flow, RawMessage, Route, RouteError, TopicParts};
use iotagent_protocol::decode;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn, Instrument};

use crate::alarms::TRANSPORT_ALARM;
use crate::collaborators::AgentServices;
use crate::context::LogContext;
use crate::dispatcher::{DispatchOutcome, DispatchSettings, Dispatcher};
use crate::error::IngestError;

/// Operation name logged for messages arriving over MQTT.
pub const MQTT_OPERATION: &str = "IoTAgentJSON.MQTTBinding";

/// Operation name logged for messages arriving over AMQP.
pub const AMQP_OPERATION: &str = "IoTAgentJSON.AMQPBinding";

/// Operation name logged for messages arriving over HTTP.
pub const HTTP_OPERATION: &str = "IoTAgentJSON.HTTPBinding";

pub struct MessageHandler {
    dispatcher: Dispatcher,
}

impl MessageHandler {
    pub fn new(services: AgentServices, settings: DispatchSettings) -> Self {
        Self {
            dispatcher: Dispatcher::new(services, settings),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub async fn mqtt_message_handler(
        &self,
        topic: &str,
        body: &[u8],
    ) -> Result<DispatchOutcome, IngestError> {
        self.process(LogContext::new(MQTT_OPERATION), RawMessage::new(topic, body))
            .await
    }

    pub async fn amqp_message_handler(
        &self,
        topic: &str,
        body: &[u8],
    ) -> Result<DispatchOutcome, IngestError> {
        self.process(LogContext::new(AMQP_OPERATION), RawMessage::new(topic, body))
            .await
    }

    /// Process one message to completion.
    pub async fn process(
        &self,
        ctx: LogContext,
        message: RawMessage,
    ) -> Result<DispatchOutcome, IngestError> {
        let span = ctx.span();
        self.process_in_context(ctx, message).instrument(span).await
    }

    async fn process_in_context(
        &self,
        ctx: LogContext,
        message: RawMessage,
    ) -> Result<DispatchOutcome, IngestError> {
        let services = self.dispatcher.services();
        let parts = TopicParts::parse(&message.topic);
        let payload = decode(&message.body);
        debug!("Processing message on topic {}", parts);

        // The transport delivered a message, so it is healthy again.
        services.alarms.release(TRANSPORT_ALARM);

        let device_id = parts
            .device_id()
            .ok_or_else(|| RouteError::MissingDeviceId(parts.as_str().to_string()))?;

        let device = match services.registry.retrieve_device(&ctx, device_id).await {
            Ok(device) => device,
            Err(e) => {
                warn!("Device not found for topic {}: {}", parts, e);
                return Err(IngestError::DeviceNotFound {
                    topic: parts.as_str().to_string(),
                    source: e,
                });
            }
        };

        let ctx = ctx.fill_service(&device);
        let flow = match select_flow(&parts, &payload) {
            Ok(flow) => flow,
            Err(e) => {
                error!(
                    "Couldn't process message on topic {} for device {} due to format issues: {}",
                    parts, device_id, e
                );
                return Err(e.into());
            }
        };

        let api_key = parts
            .api_key()
            .or(device.api_key.as_deref())
            .or(self.dispatcher.settings().default_api_key.as_deref())
            .unwrap_or_default();
        let route = Route {
            device_id: device_id.to_string(),
            api_key: api_key.to_string(),
            flow,
        };
        let span = ctx.span();
        Ok(self
            .dispatcher
            .dispatch(&ctx, &route, &device, &payload)
            .instrument(span)
            .await)
    }

    /// Process a message on its own task.
    ///
    /// Errors have already been logged when the task finishes.
    pub fn spawn_message(
        self: &Arc<Self>,
        op: &'static str,
        message: RawMessage,
    ) -> JoinHandle<Option<DispatchOutcome>> {
        let handler = Arc::clone(self);
        tokio::spawn(async move {
            let topic = message.topic.clone();
            match handler.process(LogContext::new(op), message).await {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    debug!("Message on topic {} dropped: {}", topic, e);
                    None
                }
            }
        })
    }
}

impl std::fmt::Debug for MessageHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageHandler")
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}
