use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use gateway::HttpGateway;
use serde::Deserialize;
use shared::{
    domain::{ContactId, Conversation},
    error::{ApiError, ErrorCode},
    protocol::{GatewayEvent, SendMessageRequest, SendMessageResponse},
};
use storage::ConversationStore;
use sync_engine::{hub, run_ingestion, send_message, DedupPolicy, DistributionHub, SyncContext};
use tokio::sync::{broadcast::error::RecvError, mpsc};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

mod app_state;
mod config;

use app_state::AppState;
use config::load_settings;

const MAX_REQUEST_BYTES: usize = 256 * 1024;

#[derive(Debug, Deserialize)]
struct ConversationQuery {
    q: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = load_settings();
    let gateway_url = Url::parse(&settings.gateway_url)
        .with_context(|| format!("invalid gateway url '{}'", settings.gateway_url))?;

    let store = ConversationStore::open(&settings.data_file).await;
    info!(
        path = %store.path().display(),
        conversations = store.len(),
        "conversation store ready"
    );
    let sync = SyncContext::new(
        store,
        DistributionHub::new(settings.event_buffer),
        DedupPolicy::new(Duration::from_millis(settings.dedup_window_ms)),
    );

    let (ingest, ingest_rx) = mpsc::channel(settings.event_buffer.max(1));
    tokio::spawn(run_ingestion(sync.clone(), ingest_rx));

    let state = AppState {
        sync,
        gateway: Arc::new(HttpGateway::new(gateway_url)),
        ingest,
        send_timeout: Duration::from_millis(settings.send_timeout_ms),
    };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings
        .server_bind
        .parse()
        .with_context(|| format!("invalid bind address '{}'", settings.server_bind))?;
    info!(%addr, gateway = %settings.gateway_url, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/conversations", get(http_list_conversations))
        .route("/conversations/:contact_id", get(http_get_conversation))
        .route("/conversations/:contact_id/read", post(http_mark_read))
        .route("/messages", post(http_send_message))
        .route("/gateway/events", post(http_gateway_event))
        .route("/ws", get(ws_handler))
        .layer(RequestBodyLimitLayer::new(MAX_REQUEST_BYTES))
        .with_state(state)
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Gateway => StatusCode::BAD_GATEWAY,
        ErrorCode::GatewayTimeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorCode::Storage | ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn api_error(error: impl Into<ApiError>) -> (StatusCode, Json<ApiError>) {
    let error = error.into();
    (status_for(error.code), Json(error))
}

fn parse_contact(raw: &str) -> Result<ContactId, (StatusCode, Json<ApiError>)> {
    ContactId::parse(raw).ok_or_else(|| api_error(ApiError::validation("invalid contact id")))
}

async fn healthz() -> &'static str {
    "ok"
}

async fn http_list_conversations(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ConversationQuery>,
) -> Response {
    match q.q {
        Some(query) => Json(hub::search(&state.sync, &query).await).into_response(),
        None => Json(hub::snapshot(&state.sync).await).into_response(),
    }
}

async fn http_get_conversation(
    State(state): State<Arc<AppState>>,
    Path(contact_id): Path<String>,
) -> Result<Json<Conversation>, (StatusCode, Json<ApiError>)> {
    let contact_id = parse_contact(&contact_id)?;
    hub::conversation(&state.sync, &contact_id)
        .await
        .map(Json)
        .ok_or_else(|| api_error(ApiError::not_found("conversation not found")))
}

async fn http_mark_read(
    State(state): State<Arc<AppState>>,
    Path(contact_id): Path<String>,
) -> Result<Json<Conversation>, (StatusCode, Json<ApiError>)> {
    let contact_id = parse_contact(&contact_id)?;
    let conversation = hub::mark_read(&state.sync, &contact_id)
        .await
        .map_err(api_error)?;
    Ok(Json(conversation))
}

async fn http_send_message(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SendMessageRequest>,
) -> (StatusCode, Json<SendMessageResponse>) {
    match send_message(&state.sync, state.gateway.as_ref(), req, state.send_timeout).await {
        Ok(_) => (StatusCode::OK, Json(SendMessageResponse::ok())),
        Err(error) => {
            let error = ApiError::from(error);
            (
                status_for(error.code),
                Json(SendMessageResponse::failed(error.message)),
            )
        }
    }
}

async fn http_gateway_event(
    State(state): State<Arc<AppState>>,
    Json(raw): Json<serde_json::Value>,
) -> Result<StatusCode, (StatusCode, Json<ApiError>)> {
    let event = serde_json::from_value::<GatewayEvent>(raw).map_err(|error| {
        warn!(%error, "dropping undecodable gateway event");
        api_error(ApiError::validation(format!("malformed gateway event: {error}")))
    })?;
    state.ingest.send(event).await.map_err(|_| {
        error!("ingestion loop is not running");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ApiError::new(ErrorCode::Internal, "ingestion is not running")),
        )
    })?;
    Ok(StatusCode::ACCEPTED)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ws_connection(state, socket))
}

async fn ws_connection(state: Arc<AppState>, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    info!("viewer connected");

    let send_task = tokio::spawn(async move {
        let (mut next, mut events) = hub::attach(&state.sync).await;
        loop {
            match serde_json::to_string(&next) {
                Ok(text) => {
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(error) => warn!(%error, "failed to encode viewer notification"),
            }

            next = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "viewer fell behind; sending a fresh snapshot");
                    let (bootstrap, fresh) = hub::attach(&state.sync).await;
                    events = fresh;
                    bootstrap
                }
                Err(RecvError::Closed) => break,
            };
        }
    });

    while let Some(Ok(_msg)) = receiver.next().await {}

    send_task.abort();
    debug!("viewer disconnected");
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
