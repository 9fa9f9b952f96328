//! In-process collaborator implementations.
//!
//! Used by the standalone binary and by tests:
//! - [`MemoryRegistry`] serves devices and groups from configuration
//! - [`StoreBackend`] applies updates to a [`ContextStore`]
//! - [`OutboxBinding`] records published configuration replies

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use iotagent_core::config::AgentSettings;
use iotagent_core::{AttributeRecord, ContextStore, DeviceDescriptor, MemoryStore, ServiceGroup};
use iotagent_protocol::{encode_notification, ConfigurationDelivery};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::collaborators::{ContextBackend, DeviceRegistry, GroupResolver, TransportBinding};
use crate::context::LogContext;
use crate::error::{BackendError, RegistryError, TransportError};

/// Device and group registry held in memory.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    devices: RwLock<HashMap<String, DeviceDescriptor>>,
    groups: RwLock<Vec<ServiceGroup>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the devices and groups of the settings.
    pub fn from_settings(settings: &AgentSettings) -> Self {
        let devices = settings
            .devices
            .iter()
            .map(|device| (device.id.clone(), device.clone()))
            .collect();
        Self {
            devices: RwLock::new(devices),
            groups: RwLock::new(settings.groups.clone()),
        }
    }

    pub async fn register_device(&self, device: DeviceDescriptor) {
        info!("Registering device {} ({})", device.id, device.device_type);
        self.devices.write().await.insert(device.id.clone(), device);
    }

    pub async fn register_group(&self, group: ServiceGroup) {
        info!("Registering group for API key {}", group.apikey);
        self.groups.write().await.push(group);
    }

    pub async fn device_count(&self) -> usize {
        self.devices.read().await.len()
    }
}

#[async_trait]
impl DeviceRegistry for MemoryRegistry {
    async fn retrieve_device(
        &self,
        _ctx: &LogContext,
        device_id: &str,
    ) -> Result<DeviceDescriptor, RegistryError> {
        self.devices
            .read()
            .await
            .get(device_id)
            .cloned()
            .ok_or_else(|| RegistryError::DeviceNotFound(device_id.to_string()))
    }
}

#[async_trait]
impl GroupResolver for MemoryRegistry {
    async fn get_configuration(
        &self,
        resource: &str,
        api_key: &str,
    ) -> Result<ServiceGroup, RegistryError> {
        self.groups
            .read()
            .await
            .iter()
            .find(|group| group.apikey == api_key && group.resource == resource)
            .cloned()
            .ok_or_else(|| RegistryError::GroupNotFound {
                resource: resource.to_string(),
                api_key: api_key.to_string(),
            })
    }
}

/// Context backend writing into a shared [`ContextStore`].
pub struct StoreBackend<S: ContextStore = MemoryStore> {
    store: Arc<RwLock<S>>,
    subscriptions: RwLock<HashMap<String, Vec<String>>>,
}

impl<S: ContextStore> StoreBackend<S> {
    pub fn new(store: Arc<RwLock<S>>) -> Self {
        Self {
            store,
            subscriptions: RwLock::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> Arc<RwLock<S>> {
        self.store.clone()
    }

    /// Attributes subscribed to for an entity.
    pub async fn subscriptions(&self, entity_id: &str) -> Vec<String> {
        self.subscriptions
            .read()
            .await
            .get(entity_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl<S: ContextStore + 'static> ContextBackend for StoreBackend<S> {
    async fn update(
        &self,
        _ctx: &LogContext,
        device_id: &str,
        device_type: &str,
        _api_key: &str,
        values: &[AttributeRecord],
        device: &DeviceDescriptor,
    ) -> Result<(), BackendError> {
        let entity_id = device.entity_name();
        debug!(
            "Updating entity {} of device {} with {} attribute(s)",
            entity_id,
            device_id,
            values.len()
        );
        self.store
            .write()
            .await
            .apply_update(&entity_id, device_type, values);
        Ok(())
    }

    async fn query(
        &self,
        _ctx: &LogContext,
        device: &DeviceDescriptor,
        fields: &[String],
    ) -> Result<Vec<AttributeRecord>, BackendError> {
        let entity_id = device.entity_name();
        let store = self.store.read().await;
        if store.get_entity(&entity_id).is_none() {
            return Err(BackendError::EntityNotFound(entity_id));
        }
        Ok(store.query(&entity_id, fields))
    }

    async fn subscribe(
        &self,
        _ctx: &LogContext,
        device: &DeviceDescriptor,
        fields: &[String],
    ) -> Result<(), BackendError> {
        let entity_id = device.entity_name();
        info!("Subscribing to {:?} on entity {}", fields, entity_id);
        let mut subscriptions = self.subscriptions.write().await;
        let subscribed = subscriptions.entry(entity_id).or_default();
        for field in fields {
            if !subscribed.contains(field) {
                subscribed.push(field.clone());
            }
        }
        Ok(())
    }
}

/// A configuration reply as it would go on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: String,
}

/// Transport binding that keeps every reply in an outbox.
#[derive(Debug)]
pub struct OutboxBinding {
    name: String,
    sent: RwLock<Vec<OutboundMessage>>,
}

impl OutboxBinding {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sent: RwLock::new(Vec::new()),
        }
    }

    pub async fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.read().await.clone()
    }
}

#[async_trait]
impl TransportBinding for OutboxBinding {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send_configuration(
        &self,
        _ctx: &LogContext,
        delivery: ConfigurationDelivery,
    ) -> Result<(), TransportError> {
        let message = OutboundMessage {
            topic: delivery.topic(),
            payload: encode_notification(&delivery.notification)?,
        };
        debug!("Publishing {} on {}", message.payload, message.topic);
        self.sent.write().await.push(message);
        Ok(())
    }
}
