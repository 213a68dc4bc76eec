use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use bazaar_chat::{ChatContext, ChatError, ChatService, ChatSummary, PresenceView, Scope, ScopedKind};
use bazaar_shared::constants::HEARTBEAT_INTERVAL;
use bazaar_shared::types::{ChatId, MessageId, UserId};
use bazaar_store::{Chat, Message, Payload, ReadReceipt};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::events;
use crate::rate_limit::{Action, RateLimiter};

/// Header the upstream identity gateway sets on every request.
pub const USER_HEADER: &str = "x-user-id";

const DEFAULT_PAGE_SIZE: u32 = 50;

#[derive(Clone)]
pub struct AppState {
    pub service: ChatService,
    pub limiter: RateLimiter,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/chats", get(list_chats))
        .route("/chats/resolve", post(resolve_chat))
        .route("/chats/:chat_id", get(get_chat).delete(delete_chat))
        .route("/chats/:chat_id/participants", post(add_participant))
        .route(
            "/chats/:chat_id/participants/:user_id",
            axum::routing::delete(remove_participant),
        )
        .route(
            "/chats/:chat_id/messages",
            get(list_messages).post(send_message),
        )
        .route(
            "/chats/:chat_id/messages/:message_id",
            axum::routing::patch(edit_message).delete(delete_message),
        )
        .route(
            "/chats/:chat_id/messages/:message_id/delivered",
            post(ack_delivery),
        )
        .route(
            "/chats/:chat_id/messages/:message_id/receipts",
            get(message_receipts),
        )
        .route("/chats/:chat_id/read", post(mark_read))
        .route("/chats/:chat_id/unread", get(unread_count))
        .route("/chats/:chat_id/typing", get(typing_users).post(set_typing))
        .route("/chats/:chat_id/mute", put(mute_chat).delete(unmute_chat))
        .route(
            "/chats/:chat_id/blocks/:user_id",
            put(block_user).delete(unblock_user),
        )
        .route("/presence/connect", post(presence_connect))
        .route("/presence/heartbeat", post(presence_heartbeat))
        .route("/presence/disconnect", post(presence_disconnect))
        .route("/presence/:user_id", get(get_presence))
        .route("/events", get(subscribe_events))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Identity and helpers
// ---------------------------------------------------------------------------

/// The authenticated caller, as asserted by the identity gateway.
pub struct Identity(pub UserId);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Identity {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_HEADER)
            .ok_or_else(|| ServerError::Unauthenticated(format!("missing {USER_HEADER} header")))?
            .to_str()
            .map_err(|e| ServerError::Unauthenticated(e.to_string()))?;
        let user = UserId::parse(raw.trim()).map_err(|e| ServerError::Unauthenticated(e.to_string()))?;
        Ok(Identity(user))
    }
}

/// Run a core call on the blocking pool; the store is synchronous.
async fn run<T, F>(state: &AppState, f: F) -> Result<T, ServerError>
where
    F: FnOnce(&ChatService) -> bazaar_chat::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let service = state.service.clone();
    Ok(tokio::task::spawn_blocking(move || f(&service)).await??)
}

fn parse_message_id(raw: &str) -> Result<MessageId, ServerError> {
    Uuid::parse_str(raw)
        .map(MessageId)
        .map_err(|e| ServerError::BadRequest(format!("Invalid message id: {e}")))
}

fn parse_users(raw: &[String]) -> Result<std::collections::BTreeSet<UserId>, ServerError> {
    raw.iter()
        .map(|u| UserId::parse(u).map_err(ServerError::from))
        .collect()
}

// ---------------------------------------------------------------------------
// Request and response bodies
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    subscriptions: usize,
    typing_ttl_secs: u64,
    presence_ttl_secs: u64,
    heartbeat_interval_secs: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum ResolveRequest {
    /// The other user of a two-party chat.
    Direct(String),
    Scoped {
        id: String,
        kind: ScopedKind,
        participants: Vec<String>,
    },
}

#[derive(Deserialize)]
struct ParticipantRequest {
    user_id: String,
}

#[derive(Deserialize)]
struct HistoryQuery {
    before: Option<String>,
    limit: Option<u32>,
}

#[derive(Deserialize)]
struct EditRequest {
    text: String,
}

#[derive(Deserialize)]
struct ReadRequest {
    up_to: String,
}

#[derive(Serialize)]
struct ReadResponse {
    read_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct UnreadResponse {
    chat_id: ChatId,
    unread: u64,
}

#[derive(Deserialize)]
struct TypingRequest {
    typing: bool,
}

#[derive(Serialize)]
struct TypingResponse {
    users: Vec<UserId>,
}

#[derive(Deserialize, Default)]
struct MuteRequest {
    /// Omitted or null mutes indefinitely.
    duration_secs: Option<i64>,
}

#[derive(Deserialize)]
struct EventsQuery {
    chat: Option<String>,
    presence: Option<String>,
}

// ---------------------------------------------------------------------------
// Chats
// ---------------------------------------------------------------------------

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        subscriptions: state.service.notifier().subscriber_count(),
        typing_ttl_secs: state.config.typing_ttl_secs,
        presence_ttl_secs: state.config.presence_ttl_secs,
        heartbeat_interval_secs: HEARTBEAT_INTERVAL.as_secs(),
    })
}

async fn resolve_chat(
    State(state): State<AppState>,
    Identity(user): Identity,
    Json(req): Json<ResolveRequest>,
) -> Result<Json<Chat>, ServerError> {
    let context = match req {
        ResolveRequest::Direct(other) => ChatContext::Direct(user.clone(), UserId::parse(&other)?),
        ResolveRequest::Scoped {
            id,
            kind,
            participants,
        } => ChatContext::Scoped {
            id: ChatId::scoped(&id)?,
            kind,
            participants: parse_users(&participants)?,
        },
    };
    let chat = run(&state, move |s| s.resolve_chat(&user, context)).await?;
    Ok(Json(chat))
}

async fn list_chats(
    State(state): State<AppState>,
    Identity(user): Identity,
) -> Result<Json<Vec<ChatSummary>>, ServerError> {
    Ok(Json(run(&state, move |s| s.list_chats(&user)).await?))
}

async fn get_chat(
    State(state): State<AppState>,
    Identity(user): Identity,
    Path(chat_id): Path<String>,
) -> Result<Json<Chat>, ServerError> {
    let chat_id = ChatId::parse(&chat_id)?;
    Ok(Json(run(&state, move |s| s.chat(&user, &chat_id)).await?))
}

async fn delete_chat(
    State(state): State<AppState>,
    Identity(user): Identity,
    Path(chat_id): Path<String>,
) -> Result<Json<Chat>, ServerError> {
    let chat_id = ChatId::parse(&chat_id)?;
    Ok(Json(
        run(&state, move |s| s.delete_chat_for_self(&chat_id, &user)).await?,
    ))
}

async fn add_participant(
    State(state): State<AppState>,
    Identity(user): Identity,
    Path(chat_id): Path<String>,
    Json(req): Json<ParticipantRequest>,
) -> Result<Json<Chat>, ServerError> {
    let chat_id = ChatId::parse(&chat_id)?;
    let member = UserId::parse(&req.user_id)?;
    Ok(Json(
        run(&state, move |s| s.add_participant(&user, &chat_id, &member)).await?,
    ))
}

async fn remove_participant(
    State(state): State<AppState>,
    Identity(user): Identity,
    Path((chat_id, member)): Path<(String, String)>,
) -> Result<Json<Chat>, ServerError> {
    let chat_id = ChatId::parse(&chat_id)?;
    let member = UserId::parse(&member)?;
    Ok(Json(
        run(&state, move |s| s.remove_participant(&user, &chat_id, &member)).await?,
    ))
}

async fn mute_chat(
    State(state): State<AppState>,
    Identity(user): Identity,
    Path(chat_id): Path<String>,
    body: Option<Json<MuteRequest>>,
) -> Result<Json<Chat>, ServerError> {
    let chat_id = ChatId::parse(&chat_id)?;
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let duration = req
        .duration_secs
        .map(|secs| {
            chrono::Duration::try_seconds(secs).ok_or_else(|| {
                ChatError::ValidationFailed(format!("mute duration out of range: {secs}s"))
            })
        })
        .transpose()?;
    Ok(Json(
        run(&state, move |s| s.mute_chat(&chat_id, &user, duration)).await?,
    ))
}

async fn unmute_chat(
    State(state): State<AppState>,
    Identity(user): Identity,
    Path(chat_id): Path<String>,
) -> Result<Json<Chat>, ServerError> {
    let chat_id = ChatId::parse(&chat_id)?;
    Ok(Json(run(&state, move |s| s.unmute_chat(&chat_id, &user)).await?))
}

async fn block_user(
    State(state): State<AppState>,
    Identity(user): Identity,
    Path((chat_id, target)): Path<(String, String)>,
) -> Result<Json<Chat>, ServerError> {
    let chat_id = ChatId::parse(&chat_id)?;
    let target = UserId::parse(&target)?;
    Ok(Json(
        run(&state, move |s| s.block_user(&chat_id, &user, &target)).await?,
    ))
}

async fn unblock_user(
    State(state): State<AppState>,
    Identity(user): Identity,
    Path((chat_id, target)): Path<(String, String)>,
) -> Result<Json<Chat>, ServerError> {
    let chat_id = ChatId::parse(&chat_id)?;
    let target = UserId::parse(&target)?;
    Ok(Json(
        run(&state, move |s| s.unblock_user(&chat_id, &user, &target)).await?,
    ))
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

async fn list_messages(
    State(state): State<AppState>,
    Identity(user): Identity,
    Path(chat_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<Message>>, ServerError> {
    let chat_id = ChatId::parse(&chat_id)?;
    let before = query.before.as_deref().map(parse_message_id).transpose()?;
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    Ok(Json(
        run(&state, move |s| s.history(&user, &chat_id, before, limit)).await?,
    ))
}

async fn send_message(
    State(state): State<AppState>,
    Identity(user): Identity,
    Path(chat_id): Path<String>,
    Json(payload): Json<Payload>,
) -> Result<impl IntoResponse, ServerError> {
    let chat_id = ChatId::parse(&chat_id)?;
    if let Err(retry_after) = state.limiter.acquire(&user, Action::Send).await {
        warn!(user = %user, chat = %chat_id, ?retry_after, "Send rate limit exceeded");
        return Err(ServerError::RateLimited { retry_after });
    }

    let message = run(&state, move |s| s.send_message(&chat_id, &user, payload)).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn edit_message(
    State(state): State<AppState>,
    Identity(user): Identity,
    Path((chat_id, message_id)): Path<(String, String)>,
    Json(req): Json<EditRequest>,
) -> Result<Json<Message>, ServerError> {
    let chat_id = ChatId::parse(&chat_id)?;
    let message_id = parse_message_id(&message_id)?;
    Ok(Json(
        run(&state, move |s| s.edit_message(&user, &chat_id, message_id, req.text)).await?,
    ))
}

async fn delete_message(
    State(state): State<AppState>,
    Identity(user): Identity,
    Path((chat_id, message_id)): Path<(String, String)>,
) -> Result<Json<Message>, ServerError> {
    let chat_id = ChatId::parse(&chat_id)?;
    let message_id = parse_message_id(&message_id)?;
    Ok(Json(
        run(&state, move |s| s.delete_message(&user, &chat_id, message_id)).await?,
    ))
}

async fn ack_delivery(
    State(state): State<AppState>,
    Identity(user): Identity,
    Path((chat_id, message_id)): Path<(String, String)>,
) -> Result<Json<Message>, ServerError> {
    let chat_id = ChatId::parse(&chat_id)?;
    let message_id = parse_message_id(&message_id)?;
    Ok(Json(
        run(&state, move |s| s.ack_delivery(&user, &chat_id, message_id)).await?,
    ))
}

async fn message_receipts(
    State(state): State<AppState>,
    Identity(user): Identity,
    Path((chat_id, message_id)): Path<(String, String)>,
) -> Result<Json<Vec<ReadReceipt>>, ServerError> {
    let chat_id = ChatId::parse(&chat_id)?;
    let message_id = parse_message_id(&message_id)?;
    Ok(Json(
        run(&state, move |s| s.read_receipts(&user, &chat_id, message_id)).await?,
    ))
}

// ---------------------------------------------------------------------------
// Receipts and typing
// ---------------------------------------------------------------------------

async fn mark_read(
    State(state): State<AppState>,
    Identity(user): Identity,
    Path(chat_id): Path<String>,
    Json(req): Json<ReadRequest>,
) -> Result<Json<ReadResponse>, ServerError> {
    let chat_id = ChatId::parse(&chat_id)?;
    let up_to = parse_message_id(&req.up_to)?;
    let read_at = run(&state, move |s| s.mark_read(&chat_id, &user, up_to)).await?;
    Ok(Json(ReadResponse { read_at }))
}

async fn unread_count(
    State(state): State<AppState>,
    Identity(user): Identity,
    Path(chat_id): Path<String>,
) -> Result<Json<UnreadResponse>, ServerError> {
    let chat_id = ChatId::parse(&chat_id)?;
    let id = chat_id.clone();
    let unread = run(&state, move |s| s.unread_count(&id, &user)).await?;
    Ok(Json(UnreadResponse { chat_id, unread }))
}

async fn typing_users(
    State(state): State<AppState>,
    Identity(user): Identity,
    Path(chat_id): Path<String>,
) -> Result<Json<TypingResponse>, ServerError> {
    let chat_id = ChatId::parse(&chat_id)?;
    let users = run(&state, move |s| s.typing_users(&chat_id, &user)).await?;
    Ok(Json(TypingResponse { users }))
}

async fn set_typing(
    State(state): State<AppState>,
    Identity(user): Identity,
    Path(chat_id): Path<String>,
    Json(req): Json<TypingRequest>,
) -> Result<StatusCode, ServerError> {
    let chat_id = ChatId::parse(&chat_id)?;
    // Over-eager "typing" pings are dropped quietly; the last accepted one
    // is still fresh.
    if req.typing && state.limiter.acquire(&user, Action::Typing).await.is_err() {
        debug!(user = %user, chat = %chat_id, "Typing update throttled");
        return Ok(StatusCode::NO_CONTENT);
    }
    run(&state, move |s| s.set_typing(&chat_id, &user, req.typing)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

async fn presence_connect(
    State(state): State<AppState>,
    Identity(user): Identity,
) -> Result<Json<PresenceView>, ServerError> {
    Ok(Json(run(&state, move |s| s.connect(&user)).await?))
}

async fn presence_heartbeat(
    State(state): State<AppState>,
    Identity(user): Identity,
) -> Result<StatusCode, ServerError> {
    run(&state, move |s| {
        s.heartbeat(&user);
        Ok(())
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn presence_disconnect(
    State(state): State<AppState>,
    Identity(user): Identity,
) -> Result<Json<PresenceView>, ServerError> {
    Ok(Json(run(&state, move |s| s.disconnect(&user)).await?))
}

async fn get_presence(
    State(state): State<AppState>,
    Identity(_viewer): Identity,
    Path(user_id): Path<String>,
) -> Result<Json<PresenceView>, ServerError> {
    let user = UserId::parse(&user_id)?;
    Ok(Json(run(&state, move |s| s.presence(&user)).await?))
}

// ---------------------------------------------------------------------------
// Realtime
// ---------------------------------------------------------------------------

/// `?chat=<id>` opens a conversation view, `?presence=<user>` watches one
/// user's presence, and no parameter watches the caller's chat list.
async fn subscribe_events(
    State(state): State<AppState>,
    Identity(user): Identity,
    Query(query): Query<EventsQuery>,
) -> Result<impl IntoResponse, ServerError> {
    let scope = match (query.chat, query.presence) {
        (Some(_), Some(_)) => {
            return Err(ServerError::BadRequest(
                "Use either chat or presence, not both".into(),
            ))
        }
        (Some(chat), None) => Scope::Chat(ChatId::parse(&chat)?),
        (None, Some(target)) => Scope::Presence(UserId::parse(&target)?),
        (None, None) => Scope::User(user.clone()),
    };

    let viewer = user.clone();
    let subscription = run(&state, move |s| s.subscribe(&viewer, scope)).await?;
    info!(user = %user, subscription = %subscription.id, "Event stream opened");

    Ok(events::stream(
        subscription,
        state.service.notifier().clone(),
    ))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use bazaar_store::Database;

    use super::*;
    use crate::rate_limit::Quota;

    fn app_with_limit(burst: f64) -> Router {
        let db = Database::open_in_memory().unwrap();
        build_router(AppState {
            service: ChatService::with_defaults(db),
            limiter: RateLimiter::new(
                Quota {
                    per_sec: 0.001,
                    burst,
                },
                ServerConfig::default().typing_quota(),
            ),
            config: Arc::new(ServerConfig::default()),
        })
    }

    async fn call(
        app: &Router,
        method: &str,
        uri: &str,
        user: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            req = req.header(USER_HEADER, user);
        }
        let req = match body {
            Some(body) => req
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };

        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_health_needs_no_identity() {
        let app = app_with_limit(10.0);
        let (status, body) = call(&app, "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_missing_identity_is_unauthorized() {
        let app = app_with_limit(10.0);
        let (status, body) = call(&app, "GET", "/chats", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].as_str().unwrap().contains(USER_HEADER));
    }

    #[tokio::test]
    async fn test_direct_conversation_flow() {
        let app = app_with_limit(10.0);

        let (status, chat) = call(
            &app,
            "POST",
            "/chats/resolve",
            Some("bob"),
            Some(json!({ "direct": "alice" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(chat["id"], "direct:alice:bob");

        let (status, message) = call(
            &app,
            "POST",
            "/chats/direct:alice:bob/messages",
            Some("alice"),
            Some(json!({ "type": "text", "text": "hello" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(message["status"], "sent");
        let message_id = message["id"].as_str().unwrap().to_string();

        let (_, unread) = call(&app, "GET", "/chats/direct:alice:bob/unread", Some("bob"), None).await;
        assert_eq!(unread["unread"], 1);

        let (status, _) = call(
            &app,
            "POST",
            "/chats/direct:alice:bob/read",
            Some("bob"),
            Some(json!({ "up_to": message_id })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, list) = call(&app, "GET", "/chats", Some("bob"), None).await;
        assert_eq!(list[0]["unread"], 0);

        let (_, receipts) = call(
            &app,
            "GET",
            &format!("/chats/direct:alice:bob/messages/{message_id}/receipts"),
            Some("alice"),
            None,
        )
        .await;
        let readers: Vec<&str> = receipts
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["user_id"].as_str().unwrap())
            .collect();
        assert_eq!(readers.len(), 2);
        assert!(readers.contains(&"bob"));
    }

    #[tokio::test]
    async fn test_blocked_send_is_forbidden() {
        let app = app_with_limit(10.0);
        call(&app, "POST", "/chats/resolve", Some("alice"), Some(json!({ "direct": "bob" }))).await;

        let (status, _) = call(&app, "PUT", "/chats/direct:alice:bob/blocks/bob", Some("alice"), None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(
            &app,
            "POST",
            "/chats/direct:alice:bob/messages",
            Some("bob"),
            Some(json!({ "type": "text", "text": "hey" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["reason"], "blocked");

        let (status, _) = call(&app, "GET", "/chats/direct:alice:bob/messages", Some("bob"), None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_invalid_payload_and_unknown_chat() {
        let app = app_with_limit(10.0);
        call(&app, "POST", "/chats/resolve", Some("alice"), Some(json!({ "direct": "bob" }))).await;

        let (status, _) = call(
            &app,
            "POST",
            "/chats/direct:alice:bob/messages",
            Some("alice"),
            Some(json!({ "type": "voice", "duration_seconds": 0.0, "attachments": ["media/1"] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&app, "GET", "/chats/job-404", Some("alice"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    async fn send_text(app: &Router, user: &str) -> StatusCode {
        let (status, _) = call(
            app,
            "POST",
            "/chats/direct:alice:bob/messages",
            Some(user),
            Some(json!({ "type": "text", "text": "spam" })),
        )
        .await;
        status
    }

    #[tokio::test]
    async fn test_send_is_rate_limited_per_user() {
        let app = app_with_limit(2.0);
        call(&app, "POST", "/chats/resolve", Some("alice"), Some(json!({ "direct": "bob" }))).await;

        assert_eq!(send_text(&app, "alice").await, StatusCode::CREATED);
        assert_eq!(send_text(&app, "alice").await, StatusCode::CREATED);
        assert_eq!(send_text(&app, "alice").await, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(send_text(&app, "bob").await, StatusCode::CREATED);

        let (status, body) = call(
            &app,
            "POST",
            "/chats/direct:alice:bob/messages",
            Some("alice"),
            Some(json!({ "type": "text", "text": "again" })),
        )
        .await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert!(body["retry_after_ms"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_mute_without_body_is_indefinite() {
        let app = app_with_limit(10.0);
        call(&app, "POST", "/chats/resolve", Some("alice"), Some(json!({ "direct": "bob" }))).await;

        let (status, chat) = call(&app, "PUT", "/chats/direct:alice:bob/mute", Some("alice"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(chat["muted_by"]["alice"], "indefinite");
    }

    #[tokio::test]
    async fn test_out_of_range_mute_is_rejected() {
        let app = app_with_limit(10.0);
        call(&app, "POST", "/chats/resolve", Some("alice"), Some(json!({ "direct": "bob" }))).await;

        for secs in [i64::MAX, 400_000_000_000_000] {
            let (status, _) = call(
                &app,
                "PUT",
                "/chats/direct:alice:bob/mute",
                Some("alice"),
                Some(json!({ "duration_secs": secs })),
            )
            .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
        }
    }

    #[tokio::test]
    async fn test_typing_pings_are_throttled_quietly() {
        let app = app_with_limit(10.0);
        call(&app, "POST", "/chats/resolve", Some("alice"), Some(json!({ "direct": "bob" }))).await;

        let burst = ServerConfig::default().typing_burst as usize;
        for _ in 0..burst + 3 {
            let (status, _) = call(
                &app,
                "POST",
                "/chats/direct:alice:bob/typing",
                Some("alice"),
                Some(json!({ "typing": true })),
            )
            .await;
            assert_eq!(status, StatusCode::NO_CONTENT);
        }
        let (_, typing) = call(&app, "GET", "/chats/direct:alice:bob/typing", Some("bob"), None).await;
        assert_eq!(typing["users"], json!(["alice"]));

        // Clearing is never throttled.
        let (status, _) = call(
            &app,
            "POST",
            "/chats/direct:alice:bob/typing",
            Some("alice"),
            Some(json!({ "typing": false })),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, typing) = call(&app, "GET", "/chats/direct:alice:bob/typing", Some("bob"), None).await;
        assert_eq!(typing["users"], json!([]));
    }
}
