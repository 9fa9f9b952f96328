//! External collaborators of the agent.
//!
//! The dispatcher talks to the outside world only through these traits:
//! - [`DeviceRegistry`] resolves a device id to its descriptor
//! - [`GroupResolver`] finds the service group of an API key
//! - [`ContextBackend`] receives attribute updates and answers queries
//! - [`TransportBinding`] publishes configuration replies to devices
//!
//! [`AgentServices`] bundles one implementation of each, plus the alarm and
//! transaction sinks, so the handler can be wired once at startup.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use iotagent_core::{AttributeRecord, DeviceDescriptor, ServiceGroup};
use iotagent_protocol::ConfigurationDelivery;
use tracing::debug;

use crate::alarms::{AlarmRegistry, AlarmSink};
use crate::context::LogContext;
use crate::error::{BackendError, RegistryError, TransportError};
use crate::transaction::{LoggingTransactions, TransactionSink};

#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    async fn retrieve_device(
        &self,
        ctx: &LogContext,
        device_id: &str,
    ) -> Result<DeviceDescriptor, RegistryError>;
}

#[async_trait]
pub trait GroupResolver: Send + Sync {
    async fn get_configuration(
        &self,
        resource: &str,
        api_key: &str,
    ) -> Result<ServiceGroup, RegistryError>;
}

/// Destination of attribute updates.
#[async_trait]
pub trait ContextBackend: Send + Sync {
    /// Push one list of attributes to the device's entity.
    async fn update(
        &self,
        ctx: &LogContext,
        device_id: &str,
        device_type: &str,
        api_key: &str,
        values: &[AttributeRecord],
        device: &DeviceDescriptor,
    ) -> Result<(), BackendError>;

    /// Read the current value of the given attributes.
    async fn query(
        &self,
        ctx: &LogContext,
        device: &DeviceDescriptor,
        fields: &[String],
    ) -> Result<Vec<AttributeRecord>, BackendError>;

    /// Ask to be told when the given attributes change.
    async fn subscribe(
        &self,
        ctx: &LogContext,
        device: &DeviceDescriptor,
        fields: &[String],
    ) -> Result<(), BackendError>;
}

/// Outbound transport able to reach devices.
#[async_trait]
pub trait TransportBinding: Send + Sync {
    /// Transport name, matched case-insensitively (e.g. "MQTT").
    fn name(&self) -> &str;

    async fn send_configuration(
        &self,
        ctx: &LogContext,
        delivery: ConfigurationDelivery,
    ) -> Result<(), TransportError>;
}

/// Routes configuration replies to the binding of a named transport.
#[derive(Default, Clone)]
pub struct TransportSelector {
    bindings: HashMap<String, Arc<dyn TransportBinding>>,
}

impl TransportSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binding(mut self, binding: Arc<dyn TransportBinding>) -> Self {
        self.register(binding);
        self
    }

    pub fn register(&mut self, binding: Arc<dyn TransportBinding>) {
        self.bindings
            .insert(binding.name().to_ascii_uppercase(), binding);
    }

    pub fn get(&self, transport: &str) -> Option<&Arc<dyn TransportBinding>> {
        self.bindings.get(&transport.to_ascii_uppercase())
    }

    pub async fn dispatch(
        &self,
        ctx: &LogContext,
        transport: &str,
        delivery: ConfigurationDelivery,
    ) -> Result<(), TransportError> {
        let binding = self
            .get(transport)
            .ok_or_else(|| TransportError::UnknownTransport(transport.to_string()))?;
        debug!(
            "Sending configuration to device {} through {}",
            delivery.device_id,
            binding.name()
        );
        binding.send_configuration(ctx, delivery).await
    }
}

impl std::fmt::Debug for TransportSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSelector")
            .field("bindings", &self.bindings.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Every collaborator the message pipeline needs.
#[derive(Clone)]
pub struct AgentServices {
    pub registry: Arc<dyn DeviceRegistry>,
    pub groups: Arc<dyn GroupResolver>,
    pub backend: Arc<dyn ContextBackend>,
    pub transports: TransportSelector,
    pub alarms: Arc<dyn AlarmSink>,
    pub transactions: Arc<dyn TransactionSink>,
}

impl AgentServices {
    /// Services with an in-process alarm registry and logging transactions.
    pub fn new(
        registry: Arc<dyn DeviceRegistry>,
        groups: Arc<dyn GroupResolver>,
        backend: Arc<dyn ContextBackend>,
        transports: TransportSelector,
    ) -> Self {
        Self {
            registry,
            groups,
            backend,
            transports,
            alarms: Arc::new(AlarmRegistry::new()),
            transactions: Arc::new(LoggingTransactions),
        }
    }

    pub fn with_alarms(mut self, alarms: Arc<dyn AlarmSink>) -> Self {
        self.alarms = alarms;
        self
    }

    pub fn with_transactions(mut self, transactions: Arc<dyn TransactionSink>) -> Self {
        self.transactions = transactions;
        self
    }
}
