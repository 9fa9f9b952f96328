//! Update dispatch.
//!
//! Runs one of the three flows for a routed message:
//! - configuration requests are answered through the device's transport
//! - a single measure becomes one attribute update
//! - every record of a multi-measure payload is extracted and forwarded
//!
//! Failures stop at this boundary. They are logged, flagged through the alarm
//! sink and counted in the returned [`DispatchOutcome`], and each update
//! attempt closes its own [`Transaction`] however it ends.

use futures::future::join_all;
use iotagent_core::config::{AgentSettings, DEFAULT_TRANSPORT};
use iotagent_core::{
    extract, infer_type, AttributeRecord, DeviceDescriptor, Flow, ParsedPayload, Route,
    ServiceGroup,
};
use iotagent_protocol::{
    decode_configuration_request, ConfigurationDelivery, ConfigurationKind,
    ConfigurationNotification,
};
use serde_json::Value;
use tracing::{debug, error, info, Instrument};

use crate::alarms::{BACKEND_ALARM, TRANSPORT_ALARM};
use crate::collaborators::AgentServices;
use crate::context::LogContext;
use crate::error::ConfigurationError;
use crate::transaction::Transaction;

/// Defaults used when answering configuration requests.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchSettings {
    /// Resource the service group of an API key is looked up under.
    pub default_resource: String,
    /// Transport used when neither the device nor its group names one.
    pub default_transport: String,
    /// API key used when neither the topic nor the device carries one.
    pub default_api_key: Option<String>,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            default_resource: String::new(),
            default_transport: DEFAULT_TRANSPORT.to_string(),
            default_api_key: None,
        }
    }
}

impl From<&AgentSettings> for DispatchSettings {
    fn from(settings: &AgentSettings) -> Self {
        Self {
            default_resource: settings.default_resource.clone(),
            default_transport: settings.default_transport.clone(),
            default_api_key: settings.default_api_key.clone(),
        }
    }
}

/// What happened to one dispatched message.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    pub flow: Flow,
    /// Update attempts (or configuration requests) that went through.
    pub succeeded: usize,
    /// Update attempts (or configuration requests) that failed.
    pub failed: usize,
}

impl DispatchOutcome {
    fn tally(flow: Flow, results: impl IntoIterator<Item = bool>) -> Self {
        let mut outcome = Self {
            flow,
            succeeded: 0,
            failed: 0,
        };
        for ok in results {
            if ok {
                outcome.succeeded += 1;
            } else {
                outcome.failed += 1;
            }
        }
        outcome
    }

    /// Total number of update attempts.
    pub fn attempts(&self) -> usize {
        self.succeeded + self.failed
    }
}

pub struct Dispatcher {
    services: AgentServices,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(services: AgentServices, settings: DispatchSettings) -> Self {
        Self { services, settings }
    }

    pub fn services(&self) -> &AgentServices {
        &self.services
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Run the flow selected for a message.
    pub async fn dispatch(
        &self,
        ctx: &LogContext,
        route: &Route,
        device: &DeviceDescriptor,
        payload: &ParsedPayload,
    ) -> DispatchOutcome {
        debug!(
            "Dispatching {} message for device {}",
            route.flow.name(),
            route.device_id
        );
        match &route.flow {
            Flow::Configuration => {
                self.manage_configuration_request(ctx, &route.api_key, &route.device_id, device, payload)
                    .await
            }
            Flow::SingleMeasure { attribute } => {
                self.single_measure(ctx, &route.api_key, &route.device_id, attribute, device, payload)
                    .await
            }
            Flow::MultiMeasure => {
                self.multiple_measures(ctx, &route.api_key, &route.device_id, device, payload)
                    .await
            }
        }
    }

    /// Update one attribute named by the topic with the first payload element.
    pub async fn single_measure(
        &self,
        ctx: &LogContext,
        api_key: &str,
        device_id: &str,
        attribute: &str,
        device: &DeviceDescriptor,
        payload: &ParsedPayload,
    ) -> DispatchOutcome {
        let value = payload.first().cloned().unwrap_or(Value::Null);
        let record = AttributeRecord::new(attribute, infer_type(attribute, device, None), value);
        debug!("Processing single measure {} for device {}", attribute, device_id);

        let ok = self
            .send_update(ctx.child(), api_key, device_id, vec![record], device)
            .await;
        DispatchOutcome::tally(
            Flow::SingleMeasure {
                attribute: attribute.to_string(),
            },
            [ok],
        )
    }

    /// Extract every record of the payload and forward each attribute list.
    ///
    /// Updates run concurrently and may complete in any order.
    pub async fn multiple_measures(
        &self,
        ctx: &LogContext,
        api_key: &str,
        device_id: &str,
        device: &DeviceDescriptor,
        payload: &ParsedPayload,
    ) -> DispatchOutcome {
        let dialect = device.payload_type;
        debug!(
            "Processing {} multiple measure record(s) for device {} as {}",
            payload.len(),
            device_id,
            dialect
        );

        let updates: Vec<_> = payload
            .elements()
            .iter()
            .flat_map(|record| extract(device, record, dialect).into_batches())
            .map(|values| self.send_update(ctx.child(), api_key, device_id, values, device))
            .collect();

        DispatchOutcome::tally(Flow::MultiMeasure, join_all(updates).await)
    }

    /// Answer every configuration request element of the payload.
    pub async fn manage_configuration_request(
        &self,
        ctx: &LogContext,
        api_key: &str,
        device_id: &str,
        device: &DeviceDescriptor,
        payload: &ParsedPayload,
    ) -> DispatchOutcome {
        let requests = payload.elements().iter().map(|element| async move {
            let txn = Transaction::begin(self.services.transactions.clone(), ctx.child());
            let result = self
                .manage_configuration(txn.context(), api_key, device_id, device, element)
                .instrument(txn.context().span())
                .await;
            match result {
                Ok(()) => {
                    self.services.alarms.release(TRANSPORT_ALARM);
                    debug!("Configuration request finished for device {}", device_id);
                    true
                }
                Err(e) => {
                    error!(
                        "Couldn't process configuration request for device {}: {}",
                        device_id, e
                    );
                    self.services.alarms.raise(TRANSPORT_ALARM, &e.to_string());
                    false
                }
            }
        });

        DispatchOutcome::tally(Flow::Configuration, join_all(requests).await)
    }

    async fn manage_configuration(
        &self,
        ctx: &LogContext,
        api_key: &str,
        device_id: &str,
        device: &DeviceDescriptor,
        element: &Value,
    ) -> Result<(), ConfigurationError> {
        let request = decode_configuration_request(element)?;
        match request.kind {
            ConfigurationKind::Configuration => {
                let values = self
                    .services
                    .backend
                    .query(ctx, device, &request.fields)
                    .await?;
                self.send_configuration_to_device(ctx, api_key, device_id, device, &values)
                    .await
            }
            ConfigurationKind::Subscription => {
                self.services
                    .backend
                    .subscribe(ctx, device, &request.fields)
                    .await?;
                Ok(())
            }
            ConfigurationKind::Unknown => {
                error!(
                    "CONFIG-001: Unknown command type from device {}: {}",
                    device_id, element
                );
                Ok(())
            }
        }
    }

    async fn send_configuration_to_device(
        &self,
        ctx: &LogContext,
        api_key: &str,
        device_id: &str,
        device: &DeviceDescriptor,
        values: &[AttributeRecord],
    ) -> Result<(), ConfigurationError> {
        let group = match self
            .services
            .groups
            .get_configuration(&self.settings.default_resource, api_key)
            .await
        {
            Ok(group) => group,
            Err(e) => {
                debug!("No group for API key {} ({}), using defaults", api_key, e);
                ServiceGroup::default()
            }
        };

        let transport = device
            .transport
            .clone()
            .or_else(|| group.transport.clone())
            .unwrap_or_else(|| self.settings.default_transport.clone());

        let delivery = ConfigurationDelivery {
            api_key: api_key.to_string(),
            group,
            device_id: device_id.to_string(),
            notification: ConfigurationNotification::new(values),
        };
        self.services
            .transports
            .dispatch(ctx, &transport, delivery)
            .await?;
        Ok(())
    }

    /// Forward one attribute list to the backend inside its own transaction.
    async fn send_update(
        &self,
        ctx: LogContext,
        api_key: &str,
        device_id: &str,
        values: Vec<AttributeRecord>,
        device: &DeviceDescriptor,
    ) -> bool {
        let span = ctx.span();
        let txn = Transaction::begin(self.services.transactions.clone(), ctx);
        let result = self
            .services
            .backend
            .update(
                txn.context(),
                device_id,
                &device.device_type,
                api_key,
                &values,
                device,
            )
            .instrument(span)
            .await;

        match result {
            Ok(()) => {
                self.services.alarms.release(BACKEND_ALARM);
                info!(
                    "Measures for device {} with API key {} successfully updated",
                    device_id, api_key
                );
                true
            }
            Err(e) => {
                error!(
                    "MEASURES-002: Couldn't send the updated values to the Context Broker due to an error: {}",
                    e
                );
                self.services.alarms.raise(BACKEND_ALARM, &e.to_string());
                false
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("settings", &self.settings)
            .field("transports", &self.services.transports)
            .finish()
    }
}
