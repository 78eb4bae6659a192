use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::Method,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use coincast_shared::protocol::ChatBroadcast;
use coincast_shared::types::{StreamId, UserId};
use coincast_store::{
    Ledger, NewStream, SettlementEngine, Stream, StreamFilter, Transaction, User,
};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::registry::ConnectionRegistry;
use crate::relay::SignalingRelay;
use crate::router::BroadcastRouter;
use crate::throttle::ChatThrottle;
use crate::ws;

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<Ledger>,
    pub settlement: Arc<SettlementEngine>,
    pub registry: Arc<ConnectionRegistry>,
    pub router: Arc<BroadcastRouter>,
    pub relay: Arc<SignalingRelay>,
    pub throttle: Arc<ChatThrottle>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws::ws_handler))
        .route("/users", post(create_user))
        .route("/users/:id", get(get_user))
        .route("/users/:id/balance", get(get_balance))
        .route("/users/:id/transactions", get(get_transactions))
        .route("/users/:id/coins", post(purchase_coins))
        .route("/streams", get(list_streams).post(create_stream))
        .route("/streams/:id", get(get_stream))
        .route("/streams/:id/live", post(set_stream_live))
        .route("/streams/:id/messages", get(get_stream_messages))
        .route("/streams/:id/join", post(join_stream))
        .route("/streams/:id/leave", post(leave_stream))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateUserRequest {
    username: String,
    #[serde(default)]
    is_creator: bool,
}

#[derive(Serialize)]
struct BalanceResponse {
    coins: i64,
}

#[derive(Deserialize)]
struct PurchaseRequest {
    amount: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateStreamRequest {
    title: String,
    genre: String,
    creator_id: Uuid,
    cost_in_coins: i64,
}

#[derive(Deserialize)]
struct StreamListQuery {
    genre: Option<String>,
    live: Option<bool>,
}

/// A stream as served to clients, with the creator's username resolved.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StreamResponse {
    #[serde(flatten)]
    stream: Stream,
    creator_username: String,
}

#[derive(Deserialize)]
struct LiveRequest {
    live: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinRequest {
    viewer_id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JoinResponse {
    coins_remaining: i64,
}

#[derive(Serialize)]
struct LeaveResponse {
    left: bool,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ─── Users ───

async fn create_user(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> Result<Json<User>, ServerError> {
    if req.username.trim().is_empty() {
        return Err(ServerError::BadRequest("username must not be empty".into()));
    }

    let user = state
        .ledger
        .create_user(req.username.trim(), req.is_creator, state.config.starting_coins)
        .await?;

    info!(user = %user.id.short(), username = %user.username, "User created via API");
    Ok(Json(user))
}

async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<User>, ServerError> {
    Ok(Json(state.ledger.get_user(UserId(id)).await?))
}

async fn get_balance(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<BalanceResponse>, ServerError> {
    let coins = state.ledger.balance_of(UserId(id)).await?;
    Ok(Json(BalanceResponse { coins }))
}

async fn get_transactions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Transaction>>, ServerError> {
    Ok(Json(state.ledger.transactions_for_user(UserId(id)).await?))
}

async fn purchase_coins(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<PurchaseRequest>,
) -> Result<Json<BalanceResponse>, ServerError> {
    let coins = state
        .settlement
        .purchase_coins(UserId(id), req.amount)
        .await?;
    Ok(Json(BalanceResponse { coins }))
}

// ─── Streams ───

async fn create_stream(
    State(state): State<AppState>,
    Json(req): Json<CreateStreamRequest>,
) -> Result<Json<Stream>, ServerError> {
    let stream = state
        .ledger
        .create_stream(NewStream {
            title: req.title,
            genre: req.genre,
            creator_id: UserId(req.creator_id),
            cost_in_coins: req.cost_in_coins,
        })
        .await?;
    Ok(Json(stream))
}

async fn list_streams(
    State(state): State<AppState>,
    Query(query): Query<StreamListQuery>,
) -> Json<Vec<StreamResponse>> {
    let streams = state
        .ledger
        .list_streams(StreamFilter {
            genre: query.genre,
            is_live: query.live,
        })
        .await;

    let mut out = Vec::with_capacity(streams.len());
    for stream in streams {
        out.push(with_creator(&state.ledger, stream).await);
    }
    Json(out)
}

async fn get_stream(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<StreamResponse>, ServerError> {
    let stream = state.ledger.get_stream(StreamId(id)).await?;
    Ok(Json(with_creator(&state.ledger, stream).await))
}

async fn set_stream_live(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<LiveRequest>,
) -> Result<Json<Stream>, ServerError> {
    Ok(Json(state.ledger.set_stream_live(StreamId(id), req.live).await?))
}

async fn get_stream_messages(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<ChatBroadcast>>, ServerError> {
    let stream_id = StreamId(id);
    let messages = state
        .ledger
        .recent_chat_messages(stream_id, state.config.chat_history_limit)
        .await?;

    let mut out = Vec::with_capacity(messages.len());
    for message in messages {
        let username = username_of(&state.ledger, message.user_id).await;
        out.push(ChatBroadcast {
            id: message.id,
            stream_id: message.stream_id,
            user_id: message.user_id,
            username,
            message: message.content,
            created_at: message.created_at,
        });
    }
    Ok(Json(out))
}

// ─── Settlement boundary ───

async fn join_stream(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<JoinRequest>,
) -> Result<Json<JoinResponse>, ServerError> {
    let receipt = state
        .settlement
        .settle_join(UserId(req.viewer_id), StreamId(id))
        .await?;
    Ok(Json(JoinResponse {
        coins_remaining: receipt.coins_remaining,
    }))
}

async fn leave_stream(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<JoinRequest>,
) -> Result<Json<LeaveResponse>, ServerError> {
    state
        .settlement
        .settle_leave(UserId(req.viewer_id), StreamId(id))
        .await?;
    Ok(Json(LeaveResponse { left: true }))
}

// ─── Helpers ───

async fn with_creator(ledger: &Ledger, stream: Stream) -> StreamResponse {
    let creator_username = username_of(ledger, stream.creator_id).await;
    StreamResponse {
        stream,
        creator_username,
    }
}

async fn username_of(ledger: &Ledger, user_id: UserId) -> String {
    ledger
        .get_user(user_id)
        .await
        .map(|u| u.username)
        .unwrap_or_else(|_| "Unknown".into())
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
    use super::*;
    use axum::response::IntoResponse;

    fn test_state() -> AppState {
        let config = ServerConfig::default();
        let ledger = Arc::new(Ledger::new());
        let settlement = Arc::new(SettlementEngine::new(ledger.clone(), config.allow_self_join));
        let registry = Arc::new(ConnectionRegistry::new());
        let router = Arc::new(BroadcastRouter::new(registry.clone()));
        let relay = Arc::new(SignalingRelay::new(router.clone()));

        AppState {
            ledger,
            settlement,
            registry,
            router,
            relay,
            throttle: Arc::new(ChatThrottle::default()),
            config: Arc::new(config),
        }
    }

    #[tokio::test]
    async fn test_create_user_grants_starting_coins() {
        let state = test_state();

        let Json(user) = create_user(
            State(state.clone()),
            Json(CreateUserRequest {
                username: "ada".into(),
                is_creator: false,
            }),
        )
        .await
        .unwrap();

        assert_eq!(user.coins, 100);

        let err = create_user(
            State(state),
            Json(CreateUserRequest {
                username: "ada".into(),
                is_creator: true,
            }),
        )
        .await
        .unwrap_err();
        let response = err.into_response();
        assert_eq!(response.status(), axum::http::StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_join_endpoint_settles_and_maps_errors() {
        let state = test_state();
        let creator = state.ledger.create_user("creator", true, 0).await.unwrap();
        let viewer = state.ledger.create_user("viewer", false, 100).await.unwrap();
        let stream = state
            .ledger
            .create_stream(NewStream {
                title: "show".into(),
                genre: "music".into(),
                creator_id: creator.id,
                cost_in_coins: 80,
            })
            .await
            .unwrap();

        let Json(receipt) = join_stream(
            State(state.clone()),
            Path(stream.id.0),
            Json(JoinRequest {
                viewer_id: viewer.id.0,
            }),
        )
        .await
        .unwrap();
        assert_eq!(receipt.coins_remaining, 20);

        // A second join leaves the viewer short: 402 with both amounts.
        let err = join_stream(
            State(state),
            Path(stream.id.0),
            Json(JoinRequest {
                viewer_id: viewer.id.0,
            }),
        )
        .await
        .unwrap_err();
        let response = err.into_response();
        assert_eq!(response.status(), axum::http::StatusCode::PAYMENT_REQUIRED);
    }

    #[tokio::test]
    async fn test_empty_username_is_a_bad_request() {
        let state = test_state();
        let err = create_user(
            State(state),
            Json(CreateUserRequest {
                username: "   ".into(),
                is_creator: false,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(
            err.into_response().status(),
            axum::http::StatusCode::BAD_REQUEST
        );
    }
}
