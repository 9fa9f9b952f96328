//! Integration tests for message ingestion.
//!
//! These tests wire a [`MessageHandler`] to in-memory and recording
//! collaborators and push raw transport messages through it.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use iotagent_core::{
    AttributeRecord, ContextStore, DeviceDescriptor, Dialect, Flow, MemoryStore, RawMessage,
    RouteError, ServiceGroup,
};
use iotagent_server::memory::{MemoryRegistry, OutboxBinding, StoreBackend};
use iotagent_server::{
    AgentServices, AlarmRegistry, BackendError, ContextBackend, DispatchSettings, IngestError,
    LogContext, MessageHandler, TransactionSink, TransportSelector, BACKEND_ALARM,
    TRANSPORT_ALARM,
};

/// Backend that records every update and rejects lists carrying a `fail` attribute.
#[derive(Default)]
struct RecordingBackend {
    updates: Mutex<Vec<Vec<AttributeRecord>>>,
}

impl RecordingBackend {
    fn updates(&self) -> Vec<Vec<AttributeRecord>> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl ContextBackend for RecordingBackend {
    async fn update(
        &self,
        _ctx: &LogContext,
        _device_id: &str,
        _device_type: &str,
        _api_key: &str,
        values: &[AttributeRecord],
        _device: &DeviceDescriptor,
    ) -> Result<(), BackendError> {
        self.updates.lock().unwrap().push(values.to_vec());
        if values.iter().any(|record| record.name == "fail") {
            return Err(BackendError::Rejected("bad attribute".to_string()));
        }
        Ok(())
    }

    async fn query(
        &self,
        _ctx: &LogContext,
        _device: &DeviceDescriptor,
        _fields: &[String],
    ) -> Result<Vec<AttributeRecord>, BackendError> {
        Ok(Vec::new())
    }

    async fn subscribe(
        &self,
        _ctx: &LogContext,
        _device: &DeviceDescriptor,
        _fields: &[String],
    ) -> Result<(), BackendError> {
        Ok(())
    }
}

#[derive(Default)]
struct CountingTransactions {
    closed: Mutex<Vec<uuid::Uuid>>,
}

impl CountingTransactions {
    fn closed(&self) -> Vec<uuid::Uuid> {
        self.closed.lock().unwrap().clone()
    }
}

impl TransactionSink for CountingTransactions {
    fn close(&self, ctx: &LogContext) {
        self.closed.lock().unwrap().push(ctx.trans_id);
    }
}

struct Harness {
    handler: Arc<MessageHandler>,
    registry: Arc<MemoryRegistry>,
    transactions: Arc<CountingTransactions>,
    alarms: Arc<AlarmRegistry>,
    outbox: Arc<OutboxBinding>,
}

impl Harness {
    async fn new(backend: Arc<dyn ContextBackend>, devices: Vec<DeviceDescriptor>) -> Self {
        Self::with_settings(backend, devices, DispatchSettings::default()).await
    }

    async fn with_settings(
        backend: Arc<dyn ContextBackend>,
        devices: Vec<DeviceDescriptor>,
        settings: DispatchSettings,
    ) -> Self {
        let registry = Arc::new(MemoryRegistry::new());
        for device in devices {
            registry.register_device(device).await;
        }
        let transactions = Arc::new(CountingTransactions::default());
        let alarms = Arc::new(AlarmRegistry::new());
        let outbox = Arc::new(OutboxBinding::new("MQTT"));

        let services = AgentServices::new(
            registry.clone(),
            registry.clone(),
            backend,
            TransportSelector::new().with_binding(outbox.clone()),
        )
        .with_alarms(alarms.clone())
        .with_transactions(transactions.clone());

        Self {
            handler: Arc::new(MessageHandler::new(services, settings)),
            registry,
            transactions,
            alarms,
            outbox,
        }
    }

    async fn recording(devices: Vec<DeviceDescriptor>) -> (Self, Arc<RecordingBackend>) {
        let backend = Arc::new(RecordingBackend::default());
        (Self::new(backend.clone(), devices).await, backend)
    }
}

fn sensor() -> DeviceDescriptor {
    DeviceDescriptor::new("dev1", "Sensor").with_active("temp", "Number")
}

#[tokio::test]
async fn test_single_measure_update() {
    let (harness, backend) = Harness::recording(vec![sensor()]).await;

    let outcome = harness
        .handler
        .mqtt_message_handler("/k/x/dev1/attrs/temp", b"21")
        .await
        .unwrap();

    assert_eq!(
        outcome.flow,
        Flow::SingleMeasure {
            attribute: "temp".to_string()
        }
    );
    assert_eq!(outcome.succeeded, 1);
    assert_eq!(
        backend.updates(),
        vec![vec![AttributeRecord::new("temp", "Number", json!(21))]]
    );
    assert_eq!(harness.transactions.closed().len(), 1);
}

#[tokio::test]
async fn test_single_measure_opaque_body() {
    let (harness, backend) = Harness::recording(vec![sensor()]).await;

    harness
        .handler
        .mqtt_message_handler("k/x/dev1/attrs/status", b"t|21")
        .await
        .unwrap();

    assert_eq!(
        backend.updates(),
        vec![vec![AttributeRecord::new("status", "Text", json!("747c3231"))]]
    );
}

#[tokio::test]
async fn test_multi_measure_plain_record() {
    let (harness, backend) = Harness::recording(vec![sensor()]).await;

    let outcome = harness
        .handler
        .mqtt_message_handler("/k/x/dev1/attrs", br#"{"temp": 21, "status": "ok"}"#)
        .await
        .unwrap();

    assert_eq!(outcome.flow, Flow::MultiMeasure);
    assert_eq!(
        backend.updates(),
        vec![vec![
            AttributeRecord::new("temp", "Number", json!(21)),
            AttributeRecord::new("status", "Text", json!("ok")),
        ]]
    );
}

#[tokio::test]
async fn test_batch_failure_does_not_block_siblings() {
    let (harness, backend) = Harness::recording(vec![sensor()]).await;

    let outcome = harness
        .handler
        .mqtt_message_handler(
            "/k/x/dev1/attrs",
            br#"[{"temp": 1}, {"fail": 2}, {"temp": 3}]"#,
        )
        .await
        .unwrap();

    assert_eq!(outcome.succeeded, 2);
    assert_eq!(outcome.failed, 1);
    assert_eq!(backend.updates().len(), 3);

    // One close per update attempt, each with its own transaction id.
    let mut closed = harness.transactions.closed();
    assert_eq!(closed.len(), 3);
    closed.sort();
    closed.dedup();
    assert_eq!(closed.len(), 3);
}

#[tokio::test]
async fn test_empty_record_still_forwarded() {
    let (harness, backend) = Harness::recording(vec![sensor()]).await;

    let outcome = harness
        .handler
        .mqtt_message_handler("/k/x/dev1/attrs", br#"[{}, {"temp": 1}]"#)
        .await
        .unwrap();

    assert_eq!(outcome.attempts(), 2);
    let mut updates = backend.updates();
    updates.sort_by_key(Vec::len);
    assert_eq!(
        updates,
        vec![
            vec![],
            vec![AttributeRecord::new("temp", "Number", json!(1))],
        ]
    );
    assert_eq!(harness.transactions.closed().len(), 2);
}

#[tokio::test]
async fn test_backend_alarm_raised_and_released() {
    let (harness, _backend) = Harness::recording(vec![sensor()]).await;

    harness
        .handler
        .mqtt_message_handler("/k/x/dev1/attrs/fail", b"1")
        .await
        .unwrap();
    assert!(harness.alarms.is_active(BACKEND_ALARM));

    harness
        .handler
        .mqtt_message_handler("/k/x/dev1/attrs/temp", b"1")
        .await
        .unwrap();
    assert!(!harness.alarms.is_active(BACKEND_ALARM));
}

#[tokio::test]
async fn test_ngsiv2_entities_envelope() {
    let device = sensor().with_dialect(Dialect::ContextV2);
    let (harness, backend) = Harness::recording(vec![device]).await;

    let body = json!({
        "actionType": "append",
        "entities": [
            {"id": "e1", "type": "T", "temp": {"value": 21, "type": "Float"}},
            {"id": "e2", "type": "T", "humidity": {"value": 60, "type": "Number"}}
        ]
    });
    let outcome = harness
        .handler
        .amqp_message_handler("/k/x/dev1/attrs", body.to_string().as_bytes())
        .await
        .unwrap();

    assert_eq!(outcome.succeeded, 2);
    let mut updates = backend.updates();
    updates.sort_by_key(|values| values[0].value.to_string());
    assert_eq!(
        updates,
        vec![
            vec![
                AttributeRecord::new("id", "Text", json!("e1")),
                AttributeRecord::new("type", "Text", json!("T")),
                AttributeRecord::new("temp", "Number", json!(21)),
            ],
            vec![
                AttributeRecord::new("id", "Text", json!("e2")),
                AttributeRecord::new("type", "Text", json!("T")),
                AttributeRecord::new("humidity", "Number", json!(60)),
            ],
        ]
    );
    assert_eq!(harness.transactions.closed().len(), 2);
}

#[tokio::test]
async fn test_device_not_found() {
    let (harness, backend) = Harness::recording(vec![sensor()]).await;

    let err = harness
        .handler
        .mqtt_message_handler("/k/x/unknown/attrs/temp", b"21")
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::DeviceNotFound { .. }));
    assert!(backend.updates().is_empty());
    assert!(harness.transactions.closed().is_empty());
}

#[tokio::test]
async fn test_missing_device_id() {
    let (harness, _backend) = Harness::recording(vec![sensor()]).await;

    let err = harness
        .handler
        .mqtt_message_handler("/k", b"21")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        IngestError::Route(RouteError::MissingDeviceId(_))
    ));
}

#[tokio::test]
async fn test_format_mismatch() {
    let (harness, backend) = Harness::recording(vec![sensor()]).await;

    let err = harness
        .handler
        .mqtt_message_handler("/k/x/dev1/attrs", b"21")
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        IngestError::Route(RouteError::FormatMismatch { .. })
    ));
    assert!(backend.updates().is_empty());
    assert!(harness.transactions.closed().is_empty());
}

#[tokio::test]
async fn test_configuration_request_answered() {
    let store = Arc::new(tokio::sync::RwLock::new(MemoryStore::new()));
    store.write().await.apply_update(
        "Sensor:dev1",
        "Sensor",
        &[AttributeRecord::new("sleepTime", "Number", json!(200))],
    );
    let backend = Arc::new(StoreBackend::new(store));
    let harness = Harness::new(backend, vec![sensor()]).await;

    let outcome = harness
        .handler
        .mqtt_message_handler(
            "/k/x/dev1/configuration/commands",
            br#"{"type": "configuration", "fields": ["sleepTime", "missing"]}"#,
        )
        .await
        .unwrap();

    assert_eq!(outcome.flow, Flow::Configuration);
    assert_eq!(outcome.succeeded, 1);

    let sent = harness.outbox.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].topic, "/k/dev1/configuration/values");

    let payload: Value = serde_json::from_str(&sent[0].payload).unwrap();
    assert_eq!(payload["sleepTime"], json!(200));
    assert!(payload["dt"].is_string());
    assert!(payload.get("missing").is_none());

    assert_eq!(harness.transactions.closed().len(), 1);
    assert!(!harness.alarms.is_active(TRANSPORT_ALARM));
}

#[tokio::test]
async fn test_configuration_overrides_attribute_segment() {
    let (harness, backend) = Harness::recording(vec![sensor()]).await;

    let outcome = harness
        .handler
        .mqtt_message_handler(
            "/k/x/dev1/configuration/commands/temp",
            br#"{"type": "subscription", "fields": ["temp"]}"#,
        )
        .await
        .unwrap();

    assert_eq!(outcome.flow, Flow::Configuration);
    assert!(backend.updates().is_empty());
}

#[tokio::test]
async fn test_configuration_transport_from_group() {
    let settings = DispatchSettings {
        default_resource: "/iot/json".to_string(),
        default_transport: "HTTP".to_string(),
        default_api_key: None,
    };
    let harness = Harness::with_settings(
        Arc::new(RecordingBackend::default()),
        vec![sensor()],
        settings,
    )
    .await;
    harness
        .registry
        .register_group(ServiceGroup {
            apikey: "k".to_string(),
            resource: "/iot/json".to_string(),
            transport: Some("MQTT".to_string()),
            ..Default::default()
        })
        .await;

    let outcome = harness
        .handler
        .mqtt_message_handler(
            "/k/x/dev1/configuration/commands",
            br#"{"type": "configuration", "fields": ["temp"]}"#,
        )
        .await
        .unwrap();

    // The default transport has no binding, so only the group's MQTT can succeed.
    assert_eq!(outcome.succeeded, 1);
    let sent = harness.outbox.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].topic, "/k/dev1/configuration/values");
    assert!(!harness.alarms.is_active(TRANSPORT_ALARM));
}

#[tokio::test]
async fn test_configuration_unknown_transport_raises_alarm() {
    let mut device = sensor();
    device.transport = Some("AMQP".to_string());
    let (harness, _backend) = Harness::recording(vec![device]).await;

    let outcome = harness
        .handler
        .mqtt_message_handler(
            "/k/x/dev1/configuration/commands",
            br#"{"type": "configuration", "fields": ["temp"]}"#,
        )
        .await
        .unwrap();

    assert_eq!(outcome.failed, 1);
    assert_eq!(harness.transactions.closed().len(), 1);
    assert!(harness.outbox.sent().await.is_empty());
    assert!(harness.alarms.is_active(TRANSPORT_ALARM));

    // Any later message releases the transport alarm on arrival.
    harness
        .handler
        .mqtt_message_handler("/k/x/dev1/attrs/temp", b"1")
        .await
        .unwrap();
    assert!(!harness.alarms.is_active(TRANSPORT_ALARM));
}

#[tokio::test]
async fn test_configuration_unknown_type_is_handled() {
    let (harness, backend) = Harness::recording(vec![sensor()]).await;

    let outcome = harness
        .handler
        .mqtt_message_handler(
            "/k/x/dev1/configuration/commands",
            br#"[{"type": "reboot"}, {"type": "subscription", "fields": ["temp"]}]"#,
        )
        .await
        .unwrap();

    assert_eq!(outcome.succeeded, 2);
    assert_eq!(harness.transactions.closed().len(), 2);
    assert!(backend.updates().is_empty());
    assert!(harness.outbox.sent().await.is_empty());
}

#[tokio::test]
async fn test_spawned_messages_land_in_store() {
    let store = Arc::new(tokio::sync::RwLock::new(MemoryStore::new()));
    let backend = Arc::new(StoreBackend::new(store.clone()));
    let devices = (0..5)
        .map(|i| {
            let mut device = DeviceDescriptor::new(format!("dev{}", i), "Sensor")
                .with_active("temp", "Number");
            device.name = Some(format!("urn:sensor:{}", i));
            device
        })
        .collect();
    let harness = Harness::new(backend, devices).await;
    assert_eq!(harness.registry.device_count().await, 5);

    let tasks: Vec<_> = (0..5)
        .map(|i| {
            harness.handler.spawn_message(
                "test",
                RawMessage::new(format!("/k/x/dev{}/attrs", i), format!(r#"{{"temp": {}}}"#, i)),
            )
        })
        .collect();
    for outcome in futures::future::join_all(tasks).await {
        assert_eq!(outcome.unwrap().map(|o| o.succeeded), Some(1));
    }

    let store = store.read().await;
    assert_eq!(store.entity_count(), 5);
    assert_eq!(
        store.get_attribute("urn:sensor:3", "temp"),
        Some(json!({"type": "Number", "value": 3}))
    );
}

#[tokio::test]
async fn test_ngsi_identity_kept_as_measures() {
    let store = Arc::new(tokio::sync::RwLock::new(MemoryStore::new()));
    let backend = Arc::new(StoreBackend::new(store.clone()));
    let device = sensor().with_dialect(Dialect::ContextV2);
    let harness = Harness::new(backend, vec![device]).await;

    harness
        .handler
        .mqtt_message_handler(
            "/k/x/dev1/attrs",
            br#"{"id": "e1", "type": "T", "temp": {"value": 21}}"#,
        )
        .await
        .unwrap();

    let entity = store.read().await.get_entity("Sensor:dev1").unwrap();
    assert_eq!(entity["id"], json!("Sensor:dev1"));
    assert_eq!(entity["type"], json!("Sensor"));
    assert_eq!(entity["measure_id"]["value"], json!("e1"));
    assert_eq!(entity["measure_type"]["value"], json!("T"));
    assert_eq!(entity["temp"]["value"], json!(21));
}
