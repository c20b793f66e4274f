use crate::{events::Connection, Error, Result};
use kumasi_types::{
    api::{
        BalanceOperation, BalanceResponse, BalanceUpdateRequest, BalanceUpdateResponse,
        DepositRequest, ErrorResponse, LoginRequest, LoginResponse, RegisterRequest,
        RegisterResponse, WithdrawRequest, BALANCE_UPDATE_PATH, DEPOSIT_PATH, LOGIN_PATH,
        ME_PATH, REGISTER_PATH, SOCKET_PATH, WITHDRAW_PATH,
    },
    User,
};
use reqwest::{header::AUTHORIZATION, Client as HttpClient, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::connect_async;
use tracing::{debug, info};
use url::Url;

/// Timeout for connections and requests
const TIMEOUT: Duration = Duration::from_secs(30);

/// Retry policy for transient HTTP failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per request (including the first attempt).
    pub max_attempts: usize,
    /// Initial backoff delay after the first retryable failure.
    pub initial_backoff: Duration,
    /// Maximum backoff delay between attempts.
    pub max_backoff: Duration,
    /// Whether non-idempotent requests (e.g., POST) may be retried.
    pub retry_non_idempotent: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
            retry_non_idempotent: false,
        }
    }
}

/// Kumasi API client
#[derive(Clone)]
pub struct Client {
    pub base_url: Url,
    pub ws_url: Url,
    pub http_client: HttpClient,

    retry_policy: RetryPolicy,
}

impl Client {
    /// Create a new client
    #[allow(clippy::result_large_err)]
    pub fn new(base_url: &str) -> Result<Self> {
        let mut base_url = Url::parse(base_url)?;

        // Relative joins must extend the path, not replace its last segment
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

        let mut ws_url = base_url.clone();
        ws_url
            .set_scheme(ws_scheme)
            .map_err(|_| Error::InvalidScheme(ws_scheme.to_string()))?;

        let http_client = HttpClient::builder()
            .timeout(TIMEOUT)
            .pool_idle_timeout(Duration::from_secs(60))
            .tcp_keepalive(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            base_url,
            ws_url,
            http_client,
            retry_policy: RetryPolicy::default(),
        })
    }

    /// Returns a new client with the provided retry policy.
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    async fn post_json<B: Serialize>(&self, path: &str, body: &B) -> Result<reqwest::Response> {
        let url = self.base_url.join(path)?;
        debug!("Posting to {}", url);
        self.send_with_retry(reqwest::Method::POST, || {
            self.http_client.post(url.clone()).json(body)
        })
        .await
    }

    async fn send_with_retry(
        &self,
        method: reqwest::Method,
        make_request: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<reqwest::Response> {
        let max_attempts =
            if method == reqwest::Method::GET || self.retry_policy.retry_non_idempotent {
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
                }
                Err(err) => {
                    if attempt >= max_attempts || !is_retryable_error(&err) {
                        return Err(Error::Reqwest(err));
                    }
                }
            }

            if backoff > Duration::ZERO {
                sleep(backoff).await;
                backoff = std::cmp::min(backoff.saturating_mul(2), self.retry_policy.max_backoff);
            }
        }
    }

    /// Exchange credentials for a token and profile.
    pub async fn login(&self, request: &LoginRequest) -> Result<LoginResponse> {
        let response = self.post_json(LOGIN_PATH, request).await?;
        read_json(response).await
    }

    /// Create an account. Registration does not log the player in.
    pub async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse> {
        let response = self.post_json(REGISTER_PATH, request).await?;
        read_json(response).await
    }

    /// Fetch the profile behind `token`.
    ///
    /// Any non-success status maps to [Error::Unauthorized], which callers
    /// treat as a redirect to login.
    pub async fn me(&self, token: &str) -> Result<User> {
        let url = self.base_url.join(ME_PATH)?;
        let response = self
            .send_with_retry(reqwest::Method::GET, || {
                self.http_client
                    .get(url.clone())
                    .header(AUTHORIZATION, token)
            })
            .await?;
        let status = response.status();
        if !status.is_success() {
            debug!(%status, "Profile lookup refused");
            return Err(Error::Unauthorized);
        }
        read_json(response).await
    }

    /// Credit `amount` to the account behind `phone`, returning the new balance.
    pub async fn deposit(&self, phone: &str, amount: u64) -> Result<u64> {
        let request = DepositRequest {
            phone: phone.to_string(),
            amount,
        };
        let response = self.post_json(DEPOSIT_PATH, &request).await?;
        let BalanceResponse { new_balance } = read_json(response).await?;
        Ok(new_balance)
    }

    /// Debit `amount`, returning the new balance.
    pub async fn withdraw(&self, phone: &str, username: &str, amount: u64) -> Result<u64> {
        let request = WithdrawRequest {
            phone: phone.to_string(),
            username: username.to_string(),
            amount,
        };
        let response = self.post_json(WITHDRAW_PATH, &request).await?;
        let BalanceResponse { new_balance } = read_json(response).await?;
        Ok(new_balance)
    }

    /// Deposit or withdraw through the consolidated endpoint.
    pub async fn update_balance(
        &self,
        phone: &str,
        amount: u64,
        operation: BalanceOperation,
    ) -> Result<u64> {
        let request = BalanceUpdateRequest {
            phone: phone.to_string(),
            amount,
            operation,
        };
        let response = self.post_json(BALANCE_UPDATE_PATH, &request).await?;
        let status = response.status();
        let body: BalanceUpdateResponse = read_json(response).await?;
        match (body.success, body.new_balance) {
            (true, Some(new_balance)) => Ok(new_balance),
            (true, None) => Err(Error::Failed(status)),
            (false, _) => Err(Error::Rejected {
                status,
                message: body
                    .message
                    .unwrap_or_else(|| format!("{operation} failed")),
            }),
        }
    }

    /// Open the realtime channel.
    pub async fn connect_socket(&self) -> Result<Connection> {
        let ws_url = self.ws_url.join(SOCKET_PATH)?;
        info!("Connecting to WebSocket at {}", ws_url);

        let (ws_stream, _) = timeout(TIMEOUT, connect_async(ws_url.as_str()))
            .await
            .map_err(|_| Error::DialTimeout)??;
        info!("WebSocket connected");

        Ok(Connection::new(ws_stream))
    }
}

/// Decode a success body as `T`, or turn a failure body into [Error::Rejected].
async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    let bytes = response.bytes().await?;
    if status.is_success() {
        return Ok(serde_json::from_slice(&bytes)?);
    }
    match serde_json::from_slice::<ErrorResponse>(&bytes) {
        Ok(body) => match body.reason() {
            Some(message) => Err(Error::Rejected {
                status,
                message: message.to_string(),
            }),
            None => Err(Error::Failed(status)),
        },
        Err(_) => Err(Error::Failed(status)),
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
