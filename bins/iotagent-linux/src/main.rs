mod http;
mod storage;

use std::net::SocketAddr;
use std::sync::Arc;

use iotagent_core::config::{AgentSettings, ConfigError, ConfigStorage};
use iotagent_core::MemoryStore;
use iotagent_server::memory::{MemoryRegistry, OutboxBinding, StoreBackend};
use iotagent_server::{AgentServices, DispatchSettings, MessageHandler, TransportSelector};
use tokio::sync::RwLock;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::http::AppState;
use crate::storage::FileConfigStorage;

/// Transports a configuration reply can be addressed to.
const TRANSPORTS: [&str; 3] = ["MQTT", "AMQP", "HTTP"];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,iotagent_server=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("JSON IoT agent starting...");

    let config_path = std::env::var("IOTA_CONFIG").unwrap_or_else(|_| "config.json".into());
    let storage = FileConfigStorage::new(&config_path);
    let settings = match storage.load_settings() {
        Ok(settings) => settings,
        Err(ConfigError::NotFound(_)) => {
            tracing::warn!("No settings in {}, using defaults", config_path);
            AgentSettings::default()
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to load {}: {}", config_path, e)),
    };

    let registry = Arc::new(MemoryRegistry::from_settings(&settings));
    tracing::info!(
        "Provisioned {} device(s) and {} group(s)",
        settings.devices.len(),
        settings.groups.len()
    );

    let store = Arc::new(RwLock::new(MemoryStore::new()));
    let backend = Arc::new(StoreBackend::new(store.clone()));

    let outboxes: Vec<Arc<OutboxBinding>> = TRANSPORTS
        .iter()
        .map(|name| Arc::new(OutboxBinding::new(*name)))
        .collect();
    let transports = outboxes
        .iter()
        .fold(TransportSelector::new(), |selector, outbox| {
            selector.with_binding(outbox.clone())
        });

    let services = AgentServices::new(registry.clone(), registry, backend, transports);
    let handler = Arc::new(MessageHandler::new(
        services,
        DispatchSettings::from(&settings),
    ));

    let addr: SocketAddr = format!("{}:{}", settings.http.host, settings.http.port).parse()?;
    let state = AppState {
        handler,
        store,
        outboxes,
    };

    let http_handle = tokio::spawn(async move {
        if let Err(e) = http::serve(addr, state).await {
            tracing::error!("HTTP server error: {}", e);
        }
    });

    tracing::info!("JSON IoT agent ready!");
    tracing::info!("   Measures: POST http://{}/iot/json/<apiKey>/<segment>/<deviceId>/attrs", addr);
    tracing::info!("   Entities: GET  http://{}/v2/entities/<entityId>", addr);

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, shutting down...");
        }
        _ = http_handle => {
            tracing::warn!("HTTP server stopped");
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
