use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use anyhow::Context;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use futures_util::{sink::SinkExt, stream::StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::{
    sync::{mpsc, RwLock},
    task::JoinHandle,
};
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::config::Config;
use crate::types::SessionEvent;
use crate::widget::{ChatEngine, ChatWidget};

pub struct AppState {
    engine: ChatEngine,
    widgets: RwLock<HashMap<String, Arc<ChatWidget>>>,
    next_client_id: AtomicUsize,
}

impl AppState {
    pub fn new(engine: ChatEngine) -> Self {
        Self {
            engine,
            widgets: RwLock::new(HashMap::new()),
            next_client_id: AtomicUsize::new(0),
        }
    }

    pub async fn session_count(&self) -> usize {
        self.widgets.read().await.len()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateWidgetBody {
    #[serde(default)]
    tenant_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageBody {
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResolveQuery {
    q: String,
    #[serde(default)]
    tenant_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventEnvelopeIn {
    event: String,
    #[serde(default)]
    data: Value,
}

fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

fn clean_tenant(tenant_id: Option<String>) -> Option<String> {
    tenant_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
}

fn event_payload<T: Serialize>(event: &str, data: T) -> Option<String> {
    serde_json::to_string(&json!({ "event": event, "data": data })).ok()
}

/// Store events carry no session id; add it so one socket can follow
/// several widgets.
fn session_event_payload(session_id: &str, event: &SessionEvent) -> Option<String> {
    let mut value = serde_json::to_value(event).ok()?;
    if let Some(object) = value.as_object_mut() {
        object.insert("sessionId".to_string(), json!(session_id));
    }
    serde_json::to_string(&value).ok()
}

fn not_found() -> axum::response::Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "unknown session" })),
    )
        .into_response()
}

async fn find_widget(state: &Arc<AppState>, session_id: &str) -> Option<Arc<ChatWidget>> {
    state.widgets.read().await.get(session_id).cloned()
}

/// Returns the widget for `session_id`, mounting it first if needed. The flag
/// is true when this call did the mounting.
async fn mount_widget(
    state: &Arc<AppState>,
    session_id: String,
    tenant_id: Option<String>,
) -> (Arc<ChatWidget>, bool) {
    let mut widgets = state.widgets.write().await;
    if let Some(existing) = widgets.get(&session_id) {
        return (existing.clone(), false);
    }
    let widget = Arc::new(state.engine.mount(tenant_id));
    widgets.insert(session_id.clone(), widget.clone());
    tracing::debug!(session_id = %session_id, "mounted widget session");
    (widget, true)
}

async fn unmount_widget(state: &Arc<AppState>, session_id: &str) {
    let removed = state.widgets.write().await.remove(session_id);
    if let Some(widget) = removed {
        widget.dispose();
        tracing::debug!(session_id = %session_id, "unmounted widget session");
    }
}

fn widget_snapshot(session_id: &str, widget: &ChatWidget) -> Value {
    let snapshot = widget.snapshot();
    json!({
        "sessionId": session_id,
        "messages": snapshot.messages,
        "isTyping": snapshot.is_typing,
        "isChatOpen": snapshot.is_chat_open,
        "tenantId": snapshot.user_id,
    })
}

async fn health() -> impl IntoResponse {
    Json(json!({ "ok": true, "now": now_iso() }))
}

async fn post_widget(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateWidgetBody>,
) -> impl IntoResponse {
    let session_id = Uuid::new_v4().to_string();
    let (widget, _) = mount_widget(&state, session_id.clone(), clean_tenant(body.tenant_id)).await;
    (
        StatusCode::CREATED,
        Json(widget_snapshot(&session_id, &widget)),
    )
}

async fn get_widget(
    Path(session_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    match find_widget(&state, &session_id).await {
        Some(widget) => Json(widget_snapshot(&session_id, &widget)).into_response(),
        None => not_found(),
    }
}

async fn post_message(
    Path(session_id): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<SendMessageBody>,
) -> impl IntoResponse {
    if body.text.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "text is required" })),
        )
            .into_response();
    }

    let Some(widget) = find_widget(&state, &session_id).await else {
        return not_found();
    };

    let Some(pending) = widget.send_message(&body.text) else {
        return (
            StatusCode::CONFLICT,
            Json(json!({ "error": "session is closed" })),
        )
            .into_response();
    };

    (
        StatusCode::ACCEPTED,
        Json(json!({ "message": pending.message() })),
    )
        .into_response()
}

async fn post_toggle(
    Path(session_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let Some(widget) = find_widget(&state, &session_id).await else {
        return not_found();
    };
    widget.toggle_chat_open();
    Json(json!({ "isChatOpen": widget.snapshot().is_chat_open })).into_response()
}

async fn post_reset(
    Path(session_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let Some(widget) = find_widget(&state, &session_id).await else {
        return not_found();
    };
    widget.reset_session();
    Json(widget_snapshot(&session_id, &widget)).into_response()
}

async fn put_tenant(
    Path(session_id): Path<String>,
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateWidgetBody>,
) -> impl IntoResponse {
    let Some(widget) = find_widget(&state, &session_id).await else {
        return not_found();
    };
    widget.set_tenant(clean_tenant(body.tenant_id));
    Json(widget_snapshot(&session_id, &widget)).into_response()
}

async fn delete_widget(
    Path(session_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    if find_widget(&state, &session_id).await.is_none() {
        return not_found();
    }
    unmount_widget(&state, &session_id).await;
    StatusCode::NO_CONTENT.into_response()
}

async fn resolve_question(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ResolveQuery>,
) -> impl IntoResponse {
    let tenant_id = clean_tenant(query.tenant_id);
    let answer = state
        .engine
        .resolver()
        .resolve(&query.q, tenant_id.as_deref())
        .await;
    Json(json!({ "answer": answer }))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

fn spawn_forwarder(
    session_id: String,
    widget: &ChatWidget,
    tx: mpsc::UnboundedSender<String>,
) -> JoinHandle<()> {
    let mut events = widget.subscribe();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let Some(payload) = session_event_payload(&session_id, &event) else {
                continue;
            };
            if tx.send(payload).is_err() {
                break;
            }
        }
    })
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let client_id = state.next_client_id.fetch_add(1, Ordering::Relaxed) + 1;
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let mut forwarders: HashMap<String, JoinHandle<()>> = HashMap::new();
    // Sessions this socket created; they live as long as the socket does.
    let mut mounted: HashSet<String> = HashSet::new();

    let (mut ws_sender, mut ws_receiver) = socket.split();

    let send_task = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if ws_sender.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    tracing::debug!(client_id, "widget socket connected");

    while let Some(Ok(message)) = ws_receiver.next().await {
        let text = match message {
            Message::Text(text) => text.to_string(),
            Message::Close(_) => break,
            _ => continue,
        };

        let Ok(envelope) = serde_json::from_str::<EventEnvelopeIn>(&text) else {
            continue;
        };

        let session_id = envelope
            .data
            .get("sessionId")
            .and_then(Value::as_str)
            .map(str::to_string);

        match envelope.event.as_str() {
            "widget:join" => {
                let tenant_id = clean_tenant(
                    envelope
                        .data
                        .get("tenantId")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                );
                let session_id = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
                let (widget, created) = mount_widget(&state, session_id.clone(), tenant_id).await;
                if created {
                    mounted.insert(session_id.clone());
                }

                if let Some(previous) = forwarders.remove(&session_id) {
                    previous.abort();
                }
                forwarders.insert(
                    session_id.clone(),
                    spawn_forwarder(session_id.clone(), &widget, tx.clone()),
                );

                if let Some(payload) =
                    event_payload("session:history", widget_snapshot(&session_id, &widget))
                {
                    let _ = tx.send(payload);
                }
            }
            "widget:message" => {
                let text = envelope.data.get("text").and_then(Value::as_str);
                if let (Some(session_id), Some(text)) = (session_id, text) {
                    if let Some(widget) = find_widget(&state, &session_id).await {
                        let _ = widget.send_message(text);
                    }
                }
            }
            "widget:toggle" => {
                if let Some(session_id) = session_id {
                    if let Some(widget) = find_widget(&state, &session_id).await {
                        widget.toggle_chat_open();
                    }
                }
            }
            "widget:reset" => {
                if let Some(session_id) = session_id {
                    if let Some(widget) = find_widget(&state, &session_id).await {
                        widget.reset_session();
                    }
                }
            }
            _ => {}
        }
    }

    for (_, forwarder) in forwarders {
        forwarder.abort();
    }
    for session_id in mounted {
        unmount_widget(&state, &session_id).await;
    }
    send_task.abort();
    tracing::debug!(client_id, "widget socket closed");
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/widget", post(post_widget))
        .route(
            "/api/widget/{session_id}",
            get(get_widget).delete(delete_widget),
        )
        .route("/api/widget/{session_id}/message", post(post_message))
        .route("/api/widget/{session_id}/toggle", post(post_toggle))
        .route("/api/widget/{session_id}/reset", post(post_reset))
        .route("/api/widget/{session_id}/tenant", put(put_tenant))
        .route("/api/qa/resolve", get(resolve_question))
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run(config: Config) -> anyhow::Result<()> {
    let engine = ChatEngine::from_config(&config)
        .await
        .context("failed to build chat engine")?;
    let state = Arc::new(AppState::new(engine));
    let app = router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind TCP listener on {addr}"))?;

    tracing::info!("chat widget host running at http://localhost:{}", config.port);
    axum::serve(listener, app)
        .await
        .context("server runtime failure")?;
    Ok(())
}
