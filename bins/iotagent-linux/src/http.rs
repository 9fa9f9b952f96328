//! HTTP ingress and inspection API.
//!
//! - `POST /iot/json/*topic` hands the body to the agent as a transport message
//! - `GET /v2/entities/:id` reads an entity back from the context store
//! - `GET /configuration/outbox` lists configuration replies sent to devices

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use iotagent_core::{ContextStore, MemoryStore, RawMessage};
use iotagent_server::handler::HTTP_OPERATION;
use iotagent_server::memory::OutboxBinding;
use iotagent_server::{MessageHandler, TransportBinding};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub handler: Arc<MessageHandler>,
    pub store: Arc<RwLock<MemoryStore>>,
    pub outboxes: Vec<Arc<OutboxBinding>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/iot/json/*topic", post(measure_handler))
        .route("/v2/entities", get(entities_handler))
        .route("/v2/entities/:id", get(entity_handler))
        .route("/configuration/outbox", get(outbox_handler))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// Start the HTTP server
pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("HTTP server listening on {}", addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Accept a measure message; processing continues in the background.
async fn measure_handler(
    Path(topic): Path<String>,
    State(state): State<AppState>,
    body: Bytes,
) -> StatusCode {
    state
        .handler
        .spawn_message(HTTP_OPERATION, RawMessage::new(topic, body.to_vec()));
    StatusCode::ACCEPTED
}

async fn entities_handler(State(state): State<AppState>) -> Json<Value> {
    let store = state.store.read().await;
    Json(store.entities().clone())
}

async fn entity_handler(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Value>, StatusCode> {
    let store = state.store.read().await;
    match store.get_entity(&id) {
        Some(entity) => Ok(Json(entity)),
        None => Err(StatusCode::NOT_FOUND),
    }
}

async fn outbox_handler(State(state): State<AppState>) -> Json<Value> {
    let mut sent = Vec::new();
    for outbox in &state.outboxes {
        for message in outbox.sent().await {
            sent.push(json!({
                "transport": outbox.name(),
                "topic": message.topic,
                "payload": message.payload,
            }));
        }
    }
    Json(Value::Array(sent))
}
