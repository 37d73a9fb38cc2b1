use crate::{InternalUpdate, Simulator};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State as AxumState,
    },
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use ringside_types::{
    api::{MarkedRead, UnreadCount},
    ApiError, Bet, Command, CreateBet, Envelope, ErrorCode, Fight, MyBets, Notification,
    RealtimeEvent, WalletSnapshot,
};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::cors::{Any, CorsLayer};

/// Refusal rendered as the JSON error body.
struct Rejection(ApiError);

impl From<ApiError> for Rejection {
    fn from(err: ApiError) -> Self {
        Self(err)
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.0)).into_response()
    }
}

type Reply<T> = Result<Json<Envelope<T>>, Rejection>;

fn ok<T>(data: T) -> Reply<T> {
    Ok(Json(Envelope::ok(data)))
}

/// Resolves the caller from its bearer token (the user id, in the simulator).
fn caller(headers: &HeaderMap) -> Result<String, Rejection> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ApiError::new(ErrorCode::Unauthorized).into())
}

fn not_found() -> Rejection {
    ApiError::new(ErrorCode::NotFound).into()
}

pub struct Api {
    simulator: Arc<Simulator>,
}

impl Api {
    pub fn new(simulator: Arc<Simulator>) -> Self {
        Self { simulator }
    }

    /// Routes served under `/api`.
    pub fn router(&self) -> Router {
        // Configure CORS
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PATCH,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

        let routes = Router::new()
            .route("/bet", post(create_bet))
            .route("/bet/my-bets", get(my_bets))
            .route("/bet/available/:fight_id", get(available_bets))
            .route("/bet/:id", get(get_bet).delete(cancel_bet))
            .route("/bet/:id/accept", post(accept_bet))
            .route("/fight/:id", get(get_fight))
            .route("/wallet/balance", get(wallet_balance))
            .route("/notifications", get(notifications))
            .route("/notifications/unread-count", get(unread_count))
            .route("/notifications/mark-all-read", post(mark_all_read))
            .route("/notifications/:id/read", patch(mark_read))
            .route("/notifications/:id", delete(delete_notification))
            .route("/ws", get(events_ws));
        let router = Router::new().nest("/api", routes).layer(cors);

        // Configure Rate Limiting
        // Local sims are effectively unlimited (~1B req/s with a large burst)
        let governor_conf = GovernorConfigBuilder::default()
            .per_nanosecond(1)
            .burst_size(2_000_000)
            .key_extractor(SmartIpKeyExtractor)
            .finish();
        let router = match governor_conf {
            Some(config) => router.layer(GovernorLayer {
                config: Arc::new(config),
            }),
            None => {
                tracing::warn!("Invalid rate limit configuration, serving without limits");
                router
            }
        };
        router.with_state(self.simulator.clone())
    }
}

async fn create_bet(
    AxumState(simulator): AxumState<Arc<Simulator>>,
    headers: HeaderMap,
    Json(request): Json<CreateBet>,
) -> Reply<Bet> {
    let user_id = caller(&headers)?;
    ok(simulator.create_bet(&user_id, &request)?)
}

async fn accept_bet(
    AxumState(simulator): AxumState<Arc<Simulator>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Reply<Bet> {
    let user_id = caller(&headers)?;
    ok(simulator.accept_bet(&user_id, &id)?)
}

async fn cancel_bet(
    AxumState(simulator): AxumState<Arc<Simulator>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, Rejection> {
    let user_id = caller(&headers)?;
    simulator.cancel_bet(&user_id, &id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_bet(
    AxumState(simulator): AxumState<Arc<Simulator>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Reply<Bet> {
    caller(&headers)?;
    ok(simulator.bet(&id).ok_or_else(not_found)?)
}

async fn my_bets(
    AxumState(simulator): AxumState<Arc<Simulator>>,
    headers: HeaderMap,
) -> Reply<MyBets> {
    let user_id = caller(&headers)?;
    ok(simulator.my_bets(&user_id))
}

async fn available_bets(
    AxumState(simulator): AxumState<Arc<Simulator>>,
    headers: HeaderMap,
    Path(fight_id): Path<String>,
) -> Reply<Vec<Bet>> {
    let user_id = caller(&headers)?;
    ok(simulator.available_bets(&user_id, &fight_id)?)
}

async fn get_fight(
    AxumState(simulator): AxumState<Arc<Simulator>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Reply<Fight> {
    caller(&headers)?;
    ok(simulator.fight(&id).ok_or_else(not_found)?)
}

async fn wallet_balance(
    AxumState(simulator): AxumState<Arc<Simulator>>,
    headers: HeaderMap,
) -> Reply<WalletSnapshot> {
    let user_id = caller(&headers)?;
    ok(simulator.wallet(&user_id))
}

#[derive(Deserialize)]
struct Page {
    limit: Option<usize>,
}

async fn notifications(
    AxumState(simulator): AxumState<Arc<Simulator>>,
    headers: HeaderMap,
    Query(page): Query<Page>,
) -> Reply<Vec<Notification>> {
    let user_id = caller(&headers)?;
    ok(simulator.notifications(&user_id, page.limit.unwrap_or(20)))
}

async fn unread_count(
    AxumState(simulator): AxumState<Arc<Simulator>>,
    headers: HeaderMap,
) -> Reply<UnreadCount> {
    let user_id = caller(&headers)?;
    ok(UnreadCount {
        count: simulator.unread_count(&user_id),
    })
}

async fn mark_read(
    AxumState(simulator): AxumState<Arc<Simulator>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Reply<Notification> {
    let user_id = caller(&headers)?;
    ok(simulator.mark_read(&user_id, &id)?)
}

async fn mark_all_read(
    AxumState(simulator): AxumState<Arc<Simulator>>,
    headers: HeaderMap,
) -> Reply<MarkedRead> {
    let user_id = caller(&headers)?;
    ok(MarkedRead {
        updated: simulator.mark_all_read(&user_id),
    })
}

async fn delete_notification(
    AxumState(simulator): AxumState<Arc<Simulator>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, Rejection> {
    let user_id = caller(&headers)?;
    simulator.delete_notification(&user_id, &id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn events_ws(
    AxumState(simulator): AxumState<Arc<Simulator>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_events_ws(socket, simulator))
}

fn status(message: String) -> Message {
    Message::Text(RealtimeEvent::ConnectionStatus { message }.to_frame().to_text())
}

async fn handle_events_ws(socket: WebSocket, simulator: Arc<Simulator>) {
    simulator.connection_opened();
    tracing::info!(connections = simulator.connections(), "Events WebSocket connected");
    let (mut sender, mut receiver) = socket.split();
    let mut updates = simulator.update_subscriber();
    let mut subscriber: Option<String> = None;

    if sender.send(status("connected".to_string())).await.is_err() {
        simulator.connection_closed();
        return;
    }

    loop {
        tokio::select! {
            // Handle commands and control frames
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = match Command::decode(&text) {
                            Ok(Command::SubscribeBets { user_id }) => {
                                tracing::info!(user_id, "Subscribed to bet events");
                                let reply = format!("subscribed:{user_id}");
                                subscriber = Some(user_id);
                                reply
                            }
                            Ok(Command::UnsubscribeBets { user_id }) => {
                                tracing::info!(user_id, "Unsubscribed from bet events");
                                subscriber = None;
                                "unsubscribed".to_string()
                            }
                            Ok(Command::Ping) => "pong".to_string(),
                            Err(e) => {
                                tracing::warn!("Ignoring invalid command: {}", e);
                                continue;
                            }
                        };
                        if sender.send(status(reply)).await.is_err() {
                            tracing::warn!("Failed to send status, client disconnected");
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!("Client closed WebSocket connection");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            tracing::warn!("Failed to send pong, client disconnected");
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!("WebSocket error: {:?}", e);
                        break;
                    }
                    None => {
                        tracing::info!("WebSocket stream ended");
                        break;
                    }
                    _ => {} // Ignore other message types
                }
            }
            // Handle broadcast updates
            update_result = updates.recv() => {
                match update_result {
                    Ok(InternalUpdate::Event(audience, event)) => {
                        if !audience.includes(subscriber.as_deref()) {
                            continue;
                        }
                        tracing::debug!(kind = ?event.kind(), "Sending event to WebSocket client");
                        if sender
                            .send(Message::Text(event.to_frame().to_text()))
                            .await
                            .is_err()
                        {
                            tracing::warn!("Failed to send event, client disconnected");
                            break;
                        }
                    }
                    Ok(InternalUpdate::Disconnect) => {
                        tracing::info!("Dropping WebSocket connection");
                        break;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            "WebSocket client lagged behind, skipped {} messages",
                            skipped
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("Broadcast channel closed");
                        break;
                    }
                }
            }
        }
    }
    simulator.connection_closed();
    tracing::info!(connections = simulator.connections(), "Events WebSocket handler exiting");
    let _ = sender.close().await;
}
