use crate::{events::Stream, Error, Result, StateConflict, ValidationError};
use reqwest::{Client as HttpClient, Method, StatusCode};
use ringside_types::{
    api::{MarkedRead, UnreadCount},
    ApiError, Bet, CreateBet, Envelope, ErrorCode, Fight, MyBets, Notification, WalletSnapshot,
};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::connect_async;
use tracing::{debug, info};
use url::Url;

/// Timeout for connections and requests
const TIMEOUT: Duration = Duration::from_secs(30);

/// Identity the client acts as.
///
/// The token is opaque to the client and sent as a bearer credential.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    pub user_id: String,
    pub token: String,
}

impl Credentials {
    pub fn new(user_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            token: token.into(),
        }
    }
}

/// Retry policy for transient HTTP failures.
///
/// Only idempotent reads are retried. Bet commands are sent exactly once so a
/// lost response can never turn into a duplicate stake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per read (including the first attempt).
    pub max_attempts: usize,
    /// Initial backoff delay after the first retryable failure.
    pub initial_backoff: Duration,
    /// Maximum backoff delay between attempts.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
        }
    }
}

/// Ringside API client
#[derive(Clone)]
pub struct Client {
    pub base_url: Url,
    pub ws_url: Url,
    pub http_client: HttpClient,

    pub credentials: Credentials,

    retry_policy: RetryPolicy,
}

impl Client {
    /// Create a new client
    ///
    /// `base_url` is the API root (for example `http://localhost:5000/api`).
    #[allow(clippy::result_large_err)]
    pub fn new(base_url: &str, credentials: Credentials) -> Result<Self> {
        let mut base_url = Url::parse(base_url)?;

        // Relative joins must stay below the API prefix
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        // Convert http(s) to ws(s) for WebSocket URL
        let ws_scheme = match base_url.scheme() {
            "http" => "ws",
            "https" => "wss",
            scheme => {
                return Err(Error::InvalidScheme(scheme.to_string()));
            }
        };

        let mut ws_url = base_url.join("ws")?;
        ws_url
            .set_scheme(ws_scheme)
            .map_err(|_| Error::InvalidScheme(ws_scheme.to_string()))?;

        let http_client = HttpClient::builder()
            .timeout(TIMEOUT)
            .pool_idle_timeout(Duration::from_secs(60)) // Keep connections alive
            .tcp_keepalive(Duration::from_secs(30)) // TCP keepalive
            .build()?;

        Ok(Self {
            base_url,
            ws_url,
            http_client,
            credentials,
            retry_policy: RetryPolicy::default(),
        })
    }

    pub fn user_id(&self) -> &str {
        &self.credentials.user_id
    }

    /// Returns a copy of the current retry policy.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
    }

    /// Sets the retry policy for subsequent reads.
    pub fn set_retry_policy(&mut self, retry_policy: RetryPolicy) {
        self.retry_policy = retry_policy;
    }

    /// Returns a new client with the provided retry policy.
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        self.http_client
            .request(method, url)
            .bearer_auth(&self.credentials.token)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path)?;
        debug!(%url, "GET");
        let response = self
            .send_with_retry(Method::GET, || self.request(Method::GET, url.clone()))
            .await?;
        decode(response).await
    }

    async fn command<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&(impl Serialize + Sync)>,
    ) -> Result<T> {
        let url = self.base_url.join(path)?;
        debug!(%url, %method, "sending command");
        let response = self
            .send_with_retry(method.clone(), || {
                let request = self.request(method.clone(), url.clone());
                match body {
                    Some(body) => request.json(body),
                    None => request,
                }
            })
            .await?;
        decode(response).await
    }

    async fn command_without_content(&self, method: Method, path: &str) -> Result<()> {
        let url = self.base_url.join(path)?;
        debug!(%url, %method, "sending command");
        let response = self
            .send_with_retry(method.clone(), || self.request(method.clone(), url.clone()))
            .await?;
        if response.status().is_success() {
            return Ok(());
        }
        Err(rejection(response).await)
    }

    async fn send_with_retry(
        &self,
        method: Method,
        make_request: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response> {
        let max_attempts = if method == Method::GET {
            self.retry_policy.max_attempts.max(1)
        } else {
            1
        };

        let mut attempt = 0usize;
        let mut backoff = self.retry_policy.initial_backoff;
        loop {
            attempt += 1;
            let result = make_request().send().await;
            match result {
                Ok(response) => {
                    let status = response.status();
                    if !is_retryable_status(status) || attempt >= max_attempts {
                        return Ok(response);
                    }
                    debug!(%status, attempt, "retrying read");
                }
                Err(err) => {
                    if attempt >= max_attempts || !is_retryable_error(&err) {
                        return Err(Error::Reqwest(err));
                    }
                    debug!(?err, attempt, "retrying read");
                }
            }

            if backoff > Duration::ZERO {
                sleep(backoff).await;
                backoff = std::cmp::min(backoff.saturating_mul(2), self.retry_policy.max_backoff);
            }
        }
    }

    /// Stake `amount` on one side of a fight.
    pub async fn create_bet(&self, request: &CreateBet) -> Result<Bet> {
        self.command(Method::POST, "bet", Some(request)).await
    }

    /// Take the opposite side of a pending bet.
    pub async fn accept_bet(&self, bet_id: &str) -> Result<Bet> {
        self.command(Method::POST, &format!("bet/{bet_id}/accept"), None::<&()>)
            .await
    }

    /// Cancel a pending bet created by the current user.
    pub async fn cancel_bet(&self, bet_id: &str) -> Result<()> {
        self.command_without_content(Method::DELETE, &format!("bet/{bet_id}"))
            .await
    }

    pub async fn bet(&self, bet_id: &str) -> Result<Bet> {
        self.get(&format!("bet/{bet_id}")).await
    }

    pub async fn my_bets(&self) -> Result<MyBets> {
        self.get("bet/my-bets").await
    }

    /// Pending bets on a fight the current user could accept.
    pub async fn available_bets(&self, fight_id: &str) -> Result<Vec<Bet>> {
        self.get(&format!("bet/available/{fight_id}")).await
    }

    pub async fn fight(&self, fight_id: &str) -> Result<Fight> {
        self.get(&format!("fight/{fight_id}")).await
    }

    pub async fn wallet_balance(&self) -> Result<WalletSnapshot> {
        self.get("wallet/balance").await
    }

    /// Most recent notifications first.
    pub async fn notifications(&self, limit: usize) -> Result<Vec<Notification>> {
        self.get(&format!("notifications?limit={limit}")).await
    }

    pub async fn unread_count(&self) -> Result<u64> {
        let count: UnreadCount = self.get("notifications/unread-count").await?;
        Ok(count.count)
    }

    pub async fn mark_notification_read(&self, notification_id: &str) -> Result<Notification> {
        self.command(
            Method::PATCH,
            &format!("notifications/{notification_id}/read"),
            None::<&()>,
        )
        .await
    }

    /// Returns how many notifications changed state.
    pub async fn mark_all_notifications_read(&self) -> Result<u64> {
        let marked: MarkedRead = self
            .command(Method::POST, "notifications/mark-all-read", None::<&()>)
            .await?;
        Ok(marked.updated)
    }

    pub async fn delete_notification(&self, notification_id: &str) -> Result<()> {
        self.command_without_content(Method::DELETE, &format!("notifications/{notification_id}"))
            .await
    }

    /// Connect to the push endpoint.
    pub async fn connect_events(&self) -> Result<Stream> {
        self.connect_events_with_capacity(0).await
    }

    /// Connect to the push endpoint with a configurable channel capacity.
    ///
    /// A `channel_capacity` of `0` uses the default capacity.
    pub async fn connect_events_with_capacity(&self, channel_capacity: usize) -> Result<Stream> {
        info!(ws_url = %self.ws_url, "Connecting to events WebSocket");

        let (ws_stream, _) = timeout(TIMEOUT, connect_async(self.ws_url.as_str()))
            .await
            .map_err(|_| Error::DialTimeout)??;
        info!("WebSocket connected");

        Ok(Stream::new_with_capacity(ws_stream, channel_capacity))
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    if !response.status().is_success() {
        return Err(rejection(response).await);
    }
    let bytes = response.bytes().await?;
    let envelope: Envelope<T> = serde_json::from_slice(&bytes)?;
    if !envelope.success {
        return Err(Error::UnexpectedResponse);
    }
    Ok(envelope.data)
}

/// Turns a refused response into the matching error.
async fn rejection(response: reqwest::Response) -> Error {
    let status = response.status();
    let body = response.bytes().await.ok();
    let api_error = body
        .as_deref()
        .and_then(|body| serde_json::from_slice::<ApiError>(body).ok());
    let message = api_error
        .as_ref()
        .map(|err| err.message.clone())
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());

    match api_error.and_then(|err| err.code) {
        Some(code) => Error::from_code(code, message),
        None => match status {
            StatusCode::NOT_FOUND => Error::NotFound(message),
            StatusCode::UNAUTHORIZED => Error::Unauthorized(message),
            _ => Error::Failed { status, message },
        },
    }
}

impl Error {
    /// Maps a wire error code onto the client's error taxonomy.
    pub fn from_code(code: ErrorCode, message: String) -> Self {
        match code {
            ErrorCode::InvalidAmount => Error::Invalid(ValidationError::InvalidAmount),
            ErrorCode::FightNotOpen => Error::Invalid(ValidationError::FightNotOpen),
            ErrorCode::OperatorBet => Error::Invalid(ValidationError::OperatorBet),
            ErrorCode::SelfAcceptance => Error::Invalid(ValidationError::SelfAcceptance),
            ErrorCode::InsufficientFunds => Error::Invalid(ValidationError::InsufficientFunds),
            ErrorCode::NotCreator => Error::Invalid(ValidationError::NotCreator),
            ErrorCode::AlreadyAccepted => Error::Conflict(StateConflict::AlreadyAccepted),
            ErrorCode::WindowExpired => Error::Conflict(StateConflict::WindowExpired),
            ErrorCode::AlreadySettled => Error::Conflict(StateConflict::AlreadySettled),
            ErrorCode::AlreadyCancelled => Error::Conflict(StateConflict::AlreadyCancelled),
            ErrorCode::NotFound => Error::NotFound(message),
            ErrorCode::Unauthorized => Error::Unauthorized(message),
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls_stay_below_prefix() {
        let client = Client::new(
            "http://localhost:5000/api",
            Credentials::new("alice", "token"),
        )
        .unwrap();
        assert_eq!(client.base_url.as_str(), "http://localhost:5000/api/");
        assert_eq!(client.ws_url.as_str(), "ws://localhost:5000/api/ws");
        assert_eq!(
            client.base_url.join("bet/b1/accept").unwrap().as_str(),
            "http://localhost:5000/api/bet/b1/accept"
        );

        let secure = Client::new("https://example.com/", Credentials::new("a", "t")).unwrap();
        assert_eq!(secure.ws_url.as_str(), "wss://example.com/ws");
    }

    #[test]
    fn test_error_codes_map_to_taxonomy() {
        use crate::ErrorKind;

        let err = Error::from_code(ErrorCode::WindowExpired, String::new());
        assert!(matches!(err, Error::Conflict(StateConflict::WindowExpired)));
        assert_eq!(err.kind(), ErrorKind::StateConflict);

        let err = Error::from_code(ErrorCode::SelfAcceptance, String::new());
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
