//! In-memory backend for the Kumasi dice game.
//!
//! Serves the same HTTP endpoints and realtime events as the hosted backend
//! so the client can be exercised locally. Accounts, tokens and the ledger
//! live in memory and vanish with the process.

use axum::{
    extract::{ws::WebSocketUpgrade, State as AxumState},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use kumasi_types::{
    api::{
        BalanceOperation, BalanceResponse, BalanceUpdateRequest, BalanceUpdateResponse,
        DepositRequest, ErrorResponse, LoginRequest, LoginResponse, RegisterRequest,
        RegisterResponse, WithdrawRequest,
    },
    realtime::{
        ClientMessage, Connected, ErrorMessage, FindMatch, GameOver, GameStart, Outcome,
        RollDice, RollResult, ServerMessage, Waiting,
    },
    User, WIN_PAYOUT_MULTIPLIER,
};
use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, RwLock, RwLockWriteGuard},
    time::Duration,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

mod dice;
pub use dice::{Dice, ScriptedDice, SeededDice};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("All fields are required")]
    MissingFields,
    #[error("Phone number already registered")]
    PhoneTaken,
    #[error("User not found")]
    UserNotFound,
    #[error("Invalid password")]
    InvalidPassword,
    #[error("Invalid token")]
    InvalidToken,
    #[error("Amount must be greater than zero")]
    InvalidAmount,
    #[error("Insufficient balance")]
    InsufficientBalance,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidToken => StatusCode::UNAUTHORIZED,
            ApiError::UserNotFound => StatusCode::NOT_FOUND,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

#[derive(Clone, Debug)]
struct Account {
    id: String,
    username: String,
    phone: String,
    password: String,
    balance: u64,
}

impl Account {
    fn user(&self) -> User {
        User {
            id: self.id.clone(),
            username: self.username.clone(),
            phone: self.phone.clone(),
            balance: self.balance,
        }
    }
}

#[derive(Clone, Debug)]
struct Seat {
    player_id: String,
    phone: String,
}

struct Table {
    id: String,
    stake: u64,
    seats: [Seat; 2],
    rolls: HashMap<String, u8>,
}

#[derive(Default)]
pub struct State {
    // Keyed by phone
    accounts: HashMap<String, Account>,
    tokens: HashMap<String, String>,

    connections: HashMap<String, mpsc::UnboundedSender<ServerMessage>>,
    // One waiting seat per stake
    queue: BTreeMap<u64, Seat>,
    tables: HashMap<String, Table>,
    seated: HashMap<String, String>,
}

impl State {
    fn send(&self, player_id: &str, message: ServerMessage) {
        let Some(outbox) = self.connections.get(player_id) else {
            tracing::debug!(player_id, "Dropping message for disconnected player");
            return;
        };
        if outbox.send(message).is_err() {
            tracing::debug!(player_id, "Player outbox closed");
        }
    }

    fn reject(&self, player_id: &str, message: impl Into<String>) {
        self.send(
            player_id,
            ServerMessage::Error(ErrorMessage {
                message: message.into(),
            }),
        );
    }

    /// Account named by a matchmaking request. Sockets are not authenticated,
    /// so the `userId` (or phone) in the request is taken at its word.
    fn account_for(&self, request: &FindMatch) -> Option<&Account> {
        self.accounts
            .values()
            .find(|account| account.id == request.user_id)
            .or_else(|| {
                request
                    .phone
                    .as_deref()
                    .and_then(|phone| self.accounts.get(phone))
            })
    }

    fn is_busy(&self, player_id: &str) -> bool {
        self.seated.contains_key(player_id)
            || self.queue.values().any(|seat| seat.player_id == player_id)
    }

    fn credit(&mut self, phone: &str, amount: u64) -> u64 {
        match self.accounts.get_mut(phone) {
            Some(account) => {
                account.balance = account.balance.saturating_add(amount);
                account.balance
            }
            None => 0,
        }
    }

    fn balance(&self, phone: &str) -> u64 {
        self.accounts.get(phone).map_or(0, |account| account.balance)
    }

    fn username(&self, phone: &str) -> String {
        self.accounts
            .get(phone)
            .map(|account| account.username.clone())
            .unwrap_or_default()
    }
}

/// Ledger, matchmaking and tables for a local game server.
///
/// Not a security boundary: realtime requests act for whichever account they
/// name, and each account holds a single login token at a time.
#[derive(Clone)]
pub struct Simulator {
    state: Arc<RwLock<State>>,
    dice: Arc<dyn Dice>,
}

impl Simulator {
    pub fn new(dice: Arc<dyn Dice>) -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            dice,
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self::new(Arc::new(SeededDice::new(seed)))
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        match self.state.write() {
            Ok(state) => state,
            Err(e) => {
                tracing::error!("State lock poisoned, recovering: {}", e);
                e.into_inner()
            }
        }
    }

    fn read<T>(&self, f: impl FnOnce(&State) -> T) -> T {
        match self.state.read() {
            Ok(state) => f(&state),
            Err(e) => {
                tracing::error!("State lock poisoned, recovering: {}", e);
                f(&e.into_inner())
            }
        }
    }
}

impl Simulator {
    pub fn register(&self, request: RegisterRequest) -> Result<User, ApiError> {
        if request.username.trim().is_empty()
            || request.phone.trim().is_empty()
            || request.password.is_empty()
        {
            return Err(ApiError::MissingFields);
        }
        let mut state = self.write();
        if state.accounts.contains_key(&request.phone) {
            return Err(ApiError::PhoneTaken);
        }
        let account = Account {
            id: Uuid::new_v4().to_string(),
            username: request.username,
            phone: request.phone.clone(),
            password: request.password,
            balance: 0,
        };
        let user = account.user();
        state.accounts.insert(request.phone, account);
        tracing::info!(username = %user.username, "Registered account");
        Ok(user)
    }

    pub fn login(&self, request: LoginRequest) -> Result<LoginResponse, ApiError> {
        let mut state = self.write();
        let account = state
            .accounts
            .get(&request.phone)
            .ok_or(ApiError::UserNotFound)?;
        if account.password != request.password {
            return Err(ApiError::InvalidPassword);
        }
        let user = account.user();
        let token = Uuid::new_v4().simple().to_string();
        // A new login replaces the account's previous token
        state.tokens.retain(|_, phone| *phone != user.phone);
        state.tokens.insert(token.clone(), user.phone.clone());
        Ok(LoginResponse { token, user })
    }

    pub fn user_for_token(&self, token: &str) -> Result<User, ApiError> {
        self.read(|state| -> Result<User, ApiError> {
            let phone = state.tokens.get(token).ok_or(ApiError::InvalidToken)?;
            state
                .accounts
                .get(phone)
                .map(Account::user)
                .ok_or(ApiError::InvalidToken)
        })
    }

    /// Current ledger balance for `phone`.
    pub fn balance(&self, phone: &str) -> Option<u64> {
        self.read(|state| state.accounts.get(phone).map(|account| account.balance))
    }

    pub fn deposit(&self, phone: &str, amount: u64) -> Result<u64, ApiError> {
        if amount == 0 {
            return Err(ApiError::InvalidAmount);
        }
        let mut state = self.write();
        let account = state
            .accounts
            .get_mut(phone)
            .ok_or(ApiError::UserNotFound)?;
        account.balance = account.balance.saturating_add(amount);
        Ok(account.balance)
    }

    /// Debit `amount` from the account matching `phone`, or `username` when no
    /// phone is given.
    pub fn withdraw(&self, phone: &str, username: &str, amount: u64) -> Result<u64, ApiError> {
        if amount == 0 {
            return Err(ApiError::InvalidAmount);
        }
        let mut state = self.write();
        let account = if phone.is_empty() {
            state
                .accounts
                .values_mut()
                .find(|account| account.username == username)
        } else {
            state.accounts.get_mut(phone)
        }
        .ok_or(ApiError::UserNotFound)?;
        if account.balance < amount {
            return Err(ApiError::InsufficientBalance);
        }
        account.balance -= amount;
        Ok(account.balance)
    }

    /// Register a realtime connection. The returned receiver yields everything
    /// pushed to the player, starting with its id.
    pub fn connect(&self) -> (String, mpsc::UnboundedReceiver<ServerMessage>) {
        let player_id = Uuid::new_v4().simple().to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.write();
        state.connections.insert(player_id.clone(), tx);
        state.send(
            &player_id,
            ServerMessage::Connected(Connected {
                player_id: player_id.clone(),
            }),
        );
        (player_id, rx)
    }

    /// Drop a connection. A player leaving mid-match forfeits it.
    pub fn disconnect(&self, player_id: &str) {
        let mut state = self.write();
        state.connections.remove(player_id);
        state.queue.retain(|_, seat| seat.player_id != player_id);

        let Some(match_id) = state.seated.remove(player_id) else {
            return;
        };
        let Some(table) = state.tables.remove(&match_id) else {
            return;
        };
        let Some(winner) = table.seats.iter().find(|seat| seat.player_id != player_id) else {
            return;
        };
        state.seated.remove(&winner.player_id);
        let payout = table.stake.saturating_mul(WIN_PAYOUT_MULTIPLIER);
        let new_balance = state.credit(&winner.phone, payout);
        tracing::info!(match_id = %table.id, "Player left, opponent wins by forfeit");
        state.send(
            &winner.player_id,
            ServerMessage::GameOver(GameOver {
                match_id: Some(table.id.clone()),
                message: Some("Opponent left. You Win!".to_string()),
                result: Some(Outcome::Win),
                winner: Some(winner.player_id.clone()),
                rolls: table.rolls.clone().into_iter().collect(),
                payout: Some(payout),
                new_balance: Some(new_balance),
            }),
        );
    }

    pub fn find_match(&self, player_id: &str, request: FindMatch) {
        let mut state = self.write();
        let Some(account) = state.account_for(&request) else {
            state.reject(player_id, "Unknown player");
            return;
        };
        let phone = account.phone.clone();
        let balance = account.balance;
        let stake = request.stake;

        if stake == 0 {
            state.reject(player_id, "Invalid stake");
            return;
        }
        if state.is_busy(player_id) {
            state.reject(player_id, "Already in a match");
            return;
        }
        if balance < stake {
            state.reject(player_id, "Insufficient Funds");
            return;
        }

        let seat = Seat {
            player_id: player_id.to_string(),
            phone,
        };
        let opponent = match state.queue.remove(&stake) {
            Some(waiting) if waiting.phone == seat.phone => {
                // Same account on another connection, keep the original seat
                state.queue.insert(stake, waiting);
                state.reject(player_id, "Already in a match");
                return;
            }
            Some(waiting) if state.balance(&waiting.phone) < stake => {
                state.reject(&waiting.player_id, "Insufficient Funds");
                None
            }
            waiting => waiting,
        };
        let Some(opponent) = opponent else {
            tracing::debug!(player_id, stake, "Queued for match");
            state.queue.insert(stake, seat);
            state.send(
                player_id,
                ServerMessage::Waiting(Waiting {
                    message: Some("Searching for opponent...".to_string()),
                }),
            );
            return;
        };

        // Stakes are taken when the match starts
        for taken in [&opponent, &seat] {
            if let Some(account) = state.accounts.get_mut(&taken.phone) {
                account.balance -= stake;
            }
        }
        let match_id = Uuid::new_v4().simple().to_string();
        for (seat, other) in [(&opponent, &seat), (&seat, &opponent)] {
            let opponent_name = state.username(&other.phone);
            state.send(
                &seat.player_id,
                ServerMessage::GameStart(GameStart {
                    match_id: match_id.clone(),
                    stake: Some(stake),
                    opponent: Some(opponent_name),
                }),
            );
        }
        state
            .seated
            .insert(opponent.player_id.clone(), match_id.clone());
        state.seated.insert(seat.player_id.clone(), match_id.clone());
        tracing::info!(%match_id, stake, "Match started");
        state.tables.insert(
            match_id.clone(),
            Table {
                id: match_id,
                stake,
                seats: [opponent, seat],
                rolls: HashMap::new(),
            },
        );
    }

    pub fn roll(&self, player_id: &str, request: RollDice) {
        let mut state = self.write();
        let Some(match_id) = state.seated.get(player_id).cloned() else {
            state.reject(player_id, "No active match");
            return;
        };
        if request.match_id != match_id {
            state.reject(player_id, "Unknown match");
            return;
        }
        let Some(table) = state.tables.get_mut(&match_id) else {
            state.reject(player_id, "No active match");
            return;
        };
        if table.rolls.contains_key(player_id) {
            state.reject(player_id, "Already rolled");
            return;
        }
        let roll = self.dice.roll();
        table.rolls.insert(player_id.to_string(), roll);
        let complete = table.rolls.len() == table.seats.len();
        let recipients = table.seats.clone();

        for seat in &recipients {
            state.send(
                &seat.player_id,
                ServerMessage::RollResult(RollResult {
                    match_id: Some(match_id.clone()),
                    player_id: player_id.to_string(),
                    roll,
                }),
            );
        }
        if complete {
            settle(&mut state, &match_id);
        }
    }
}

/// Pay out a table where every seat has rolled.
fn settle(state: &mut State, match_id: &str) {
    let Some(table) = state.tables.remove(match_id) else {
        return;
    };
    let [first, second] = &table.seats;
    let first_roll = table.rolls.get(&first.player_id).copied().unwrap_or(0);
    let second_roll = table.rolls.get(&second.player_id).copied().unwrap_or(0);
    let winner = match first_roll.cmp(&second_roll) {
        std::cmp::Ordering::Greater => Some(first),
        std::cmp::Ordering::Less => Some(second),
        std::cmp::Ordering::Equal => None,
    };
    let message = match winner {
        Some(seat) => format!("{} Wins!", state.username(&seat.phone)),
        None => "Draw! Stakes returned.".to_string(),
    };
    let rolls: BTreeMap<String, u8> = table.rolls.clone().into_iter().collect();

    for seat in &table.seats {
        state.seated.remove(&seat.player_id);
        let (result, payout) = match winner {
            None => (Outcome::Draw, table.stake),
            Some(w) if w.player_id == seat.player_id => (
                Outcome::Win,
                table.stake.saturating_mul(WIN_PAYOUT_MULTIPLIER),
            ),
            Some(_) => (Outcome::Lose, 0),
        };
        let new_balance = state.credit(&seat.phone, payout);
        state.send(
            &seat.player_id,
            ServerMessage::GameOver(GameOver {
                match_id: Some(table.id.clone()),
                message: Some(message.clone()),
                result: Some(result),
                winner: winner.map(|w| w.player_id.clone()),
                rolls: rolls.clone(),
                payout: Some(payout),
                new_balance: Some(new_balance),
            }),
        );
    }
    tracing::info!(match_id = %table.id, first_roll, second_roll, "Match settled");
}

pub struct Api {
    simulator: Arc<Simulator>,
    rate_limit_period: Duration,
    rate_limit_burst: u32,
}

impl Api {
    pub fn new(simulator: Arc<Simulator>) -> Self {
        // Generous enough that tests and local play never hit it
        Self {
            simulator,
            rate_limit_period: Duration::from_millis(1),
            rate_limit_burst: 10_000,
        }
    }

    /// Allow one request per `period` per client IP, with bursts of `burst`.
    pub fn with_rate_limit(mut self, period: Duration, burst: u32) -> Self {
        self.rate_limit_period = period;
        self.rate_limit_burst = burst;
        self
    }

    pub fn router(&self) -> Router {
        // Configure CORS
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

        let router = Router::new()
            .route("/register", post(register))
            .route("/login", post(login))
            .route("/me", get(me))
            .route("/deposit", post(deposit))
            .route("/withdraw", post(withdraw))
            .route("/balance-update", post(balance_update))
            .route("/socket", get(socket))
            .layer(cors);

        // Configure Rate Limiting
        let period_ms = u64::try_from(self.rate_limit_period.as_millis())
            .unwrap_or(u64::MAX)
            .max(1);
        let governor_conf = GovernorConfigBuilder::default()
            .per_millisecond(period_ms)
            .burst_size(self.rate_limit_burst.max(1))
            .key_extractor(SmartIpKeyExtractor)
            .finish();
        let router = match governor_conf {
            Some(config) => router.layer(GovernorLayer {
                config: Arc::new(config),
            }),
            None => {
                tracing::warn!("Invalid rate limit, serving without one");
                router
            }
        };
        router.with_state(self.simulator.clone())
    }
}

fn auth_error(error: ApiError) -> Response {
    (error.status(), Json(ErrorResponse::error(error.to_string()))).into_response()
}

fn balance_error(error: ApiError) -> Response {
    (error.status(), Json(ErrorResponse::message(error.to_string()))).into_response()
}

async fn register(
    AxumState(simulator): AxumState<Arc<Simulator>>,
    Json(request): Json<RegisterRequest>,
) -> Response {
    match simulator.register(request) {
        Ok(user) => (
            StatusCode::CREATED,
            Json(RegisterResponse {
                user: Some(user),
                message: Some("User registered".to_string()),
            }),
        )
            .into_response(),
        Err(e) => auth_error(e),
    }
}

async fn login(
    AxumState(simulator): AxumState<Arc<Simulator>>,
    Json(request): Json<LoginRequest>,
) -> Response {
    match simulator.login(request) {
        Ok(response) => Json(response).into_response(),
        Err(e) => auth_error(e),
    }
}

async fn me(AxumState(simulator): AxumState<Arc<Simulator>>, headers: HeaderMap) -> Response {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.strip_prefix("Bearer ").unwrap_or(value))
        .unwrap_or_default();
    match simulator.user_for_token(token) {
        Ok(user) => Json(user).into_response(),
        Err(e) => auth_error(e),
    }
}

async fn deposit(
    AxumState(simulator): AxumState<Arc<Simulator>>,
    Json(request): Json<DepositRequest>,
) -> Response {
    match simulator.deposit(&request.phone, request.amount) {
        Ok(new_balance) => Json(BalanceResponse { new_balance }).into_response(),
        Err(e) => auth_error(e),
    }
}

async fn withdraw(
    AxumState(simulator): AxumState<Arc<Simulator>>,
    Json(request): Json<WithdrawRequest>,
) -> Response {
    match simulator.withdraw(&request.phone, &request.username, request.amount) {
        Ok(new_balance) => Json(BalanceResponse { new_balance }).into_response(),
        Err(e) => balance_error(e),
    }
}

async fn balance_update(
    AxumState(simulator): AxumState<Arc<Simulator>>,
    Json(request): Json<BalanceUpdateRequest>,
) -> Response {
    let result = match request.operation {
        BalanceOperation::Deposit => simulator.deposit(&request.phone, request.amount),
        BalanceOperation::Withdraw => simulator.withdraw(&request.phone, "", request.amount),
    };
    match result {
        Ok(new_balance) => Json(BalanceUpdateResponse {
            success: true,
            new_balance: Some(new_balance),
            message: None,
        })
        .into_response(),
        Err(e) => (
            e.status(),
            Json(BalanceUpdateResponse {
                success: false,
                new_balance: None,
                message: Some(e.to_string()),
            }),
        )
            .into_response(),
    }
}

async fn socket(
    AxumState(simulator): AxumState<Arc<Simulator>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, simulator))
}

async fn handle_socket(socket: axum::extract::ws::WebSocket, simulator: Arc<Simulator>) {
    let (player_id, mut outbox) = simulator.connect();
    tracing::info!(%player_id, "Socket connected");
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            // Handle incoming WebSocket messages
            msg = receiver.next() => {
                match msg {
                    Some(Ok(axum::extract::ws::Message::Text(text))) => {
                        match ClientMessage::decode(&text) {
                            Ok(ClientMessage::FindMatch(request)) => {
                                simulator.find_match(&player_id, request);
                            }
                            Ok(ClientMessage::RollDice(request)) => {
                                simulator.roll(&player_id, request);
                            }
                            Err(e) => {
                                tracing::warn!("Failed to decode client event: {}", e);
                                let error = ServerMessage::Error(ErrorMessage {
                                    message: e.to_string(),
                                });
                                if sender
                                    .send(axum::extract::ws::Message::Text(error.encode()))
                                    .await
                                    .is_err()
                                {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(axum::extract::ws::Message::Close(_))) => {
                        tracing::info!("Client closed WebSocket connection");
                        break;
                    }
                    Some(Ok(axum::extract::ws::Message::Ping(data))) => {
                        if sender.send(axum::extract::ws::Message::Pong(data)).await.is_err() {
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
            // Forward pushed events
            outgoing = outbox.recv() => {
                let Some(message) = outgoing else {
                    break;
                };
                tracing::debug!(event = message.event(), "Pushing event");
                if sender
                    .send(axum::extract::ws::Message::Text(message.encode()))
                    .await
                    .is_err()
                {
                    tracing::warn!("Failed to push event, client disconnected");
                    break;
                }
            }
        }
    }
    simulator.disconnect(&player_id);
    tracing::info!(%player_id, "Socket handler exiting");
    let _ = sender.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use kumasi_types::GAME_TYPE_DICE;

    fn simulator(rolls: impl IntoIterator<Item = u8>) -> Simulator {
        Simulator::new(Arc::new(ScriptedDice::new(rolls)))
    }

    fn register(simulator: &Simulator, username: &str, phone: &str, balance: u64) -> User {
        let user = simulator
            .register(RegisterRequest {
                username: username.to_string(),
                phone: phone.to_string(),
                password: "secret".to_string(),
            })
            .unwrap();
        if balance > 0 {
            simulator.deposit(phone, balance).unwrap();
        }
        user
    }

    fn find(user: &User, stake: u64) -> FindMatch {
        FindMatch {
            game_type: GAME_TYPE_DICE.to_string(),
            stake,
            user_id: user.id.clone(),
            phone: Some(user.phone.clone()),
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    fn started(messages: &[ServerMessage]) -> String {
        messages
            .iter()
            .find_map(|message| match message {
                ServerMessage::GameStart(start) => Some(start.match_id.clone()),
                _ => None,
            })
            .expect("no GAME_START")
    }

    fn game_over(messages: &[ServerMessage]) -> GameOver {
        messages
            .iter()
            .find_map(|message| match message {
                ServerMessage::GameOver(over) => Some(over.clone()),
                _ => None,
            })
            .expect("no GAME_OVER")
    }

    #[test]
    fn test_register_and_login() {
        let simulator = simulator([1]);
        let user = register(&simulator, "ama", "0240000001", 0);
        assert_eq!(user.balance, 0);

        // Duplicate phone
        let duplicate = simulator.register(RegisterRequest {
            username: "other".to_string(),
            phone: "0240000001".to_string(),
            password: "x".to_string(),
        });
        assert_eq!(duplicate, Err(ApiError::PhoneTaken));

        // Missing fields
        let missing = simulator.register(RegisterRequest {
            username: "ama".to_string(),
            phone: "0240000003".to_string(),
            password: String::new(),
        });
        assert_eq!(missing, Err(ApiError::MissingFields));

        // Wrong password
        let wrong = simulator.login(LoginRequest {
            phone: "0240000001".to_string(),
            password: "nope".to_string(),
        });
        assert_eq!(wrong.unwrap_err(), ApiError::InvalidPassword);

        // Unknown phone
        let unknown = simulator.login(LoginRequest {
            phone: "0249999999".to_string(),
            password: "secret".to_string(),
        });
        assert_eq!(unknown.unwrap_err(), ApiError::UserNotFound);

        let response = simulator
            .login(LoginRequest {
                phone: "0240000001".to_string(),
                password: "secret".to_string(),
            })
            .unwrap();
        assert_eq!(response.user, user);
        assert_eq!(simulator.user_for_token(&response.token).unwrap(), user);
        assert_eq!(
            simulator.user_for_token("bogus"),
            Err(ApiError::InvalidToken)
        );
    }

    #[test]
    fn test_login_replaces_previous_token() {
        let simulator = simulator([1]);
        let user = register(&simulator, "ama", "0240000001", 0);
        let credentials = LoginRequest {
            phone: "0240000001".to_string(),
            password: "secret".to_string(),
        };

        let first = simulator.login(credentials.clone()).unwrap();
        let second = simulator.login(credentials).unwrap();
        assert_ne!(first.token, second.token);
        assert_eq!(
            simulator.user_for_token(&first.token),
            Err(ApiError::InvalidToken)
        );
        assert_eq!(simulator.user_for_token(&second.token).unwrap(), user);
        assert_eq!(simulator.read(|state| state.tokens.len()), 1);
    }

    #[test]
    fn test_deposit_and_withdraw() {
        let simulator = simulator([1]);
        register(&simulator, "ama", "0240000001", 0);

        assert_eq!(simulator.deposit("0240000001", 50), Ok(50));
        assert_eq!(simulator.deposit("0240000001", 0), Err(ApiError::InvalidAmount));
        assert_eq!(simulator.deposit("0000", 10), Err(ApiError::UserNotFound));

        assert_eq!(simulator.withdraw("0240000001", "ama", 20), Ok(30));
        assert_eq!(
            simulator.withdraw("0240000001", "ama", 31),
            Err(ApiError::InsufficientBalance)
        );

        // Username lookup when the phone is missing
        assert_eq!(simulator.withdraw("", "ama", 10), Ok(20));
        assert_eq!(simulator.balance("0240000001"), Some(20));
    }

    #[test]
    fn test_connect_sends_player_id() {
        let simulator = simulator([1]);
        let (player_id, mut rx) = simulator.connect();
        let messages = drain(&mut rx);
        assert_eq!(
            messages,
            vec![ServerMessage::Connected(Connected { player_id })]
        );
    }

    #[test]
    fn test_full_match() {
        let simulator = simulator([5, 2]);
        let ama = register(&simulator, "ama", "0240000001", 100);
        let kofi = register(&simulator, "kofi", "0240000002", 100);
        let (ama_id, mut ama_rx) = simulator.connect();
        let (kofi_id, mut kofi_rx) = simulator.connect();
        drain(&mut ama_rx);
        drain(&mut kofi_rx);

        // First player waits
        simulator.find_match(&ama_id, find(&ama, 10));
        assert!(matches!(
            drain(&mut ama_rx).as_slice(),
            [ServerMessage::Waiting(_)]
        ));

        // Second player starts the match and both stakes are taken
        simulator.find_match(&kofi_id, find(&kofi, 10));
        let match_id = started(&drain(&mut ama_rx));
        assert_eq!(started(&drain(&mut kofi_rx)), match_id);
        assert_eq!(simulator.balance(&ama.phone), Some(90));
        assert_eq!(simulator.balance(&kofi.phone), Some(90));

        // Rolls are broadcast to both seats
        simulator.roll(
            &ama_id,
            RollDice {
                match_id: match_id.clone(),
            },
        );
        let expected = ServerMessage::RollResult(RollResult {
            match_id: Some(match_id.clone()),
            player_id: ama_id.clone(),
            roll: 5,
        });
        assert_eq!(drain(&mut ama_rx), vec![expected.clone()]);
        assert_eq!(drain(&mut kofi_rx), vec![expected]);

        // Rolling twice is refused
        simulator.roll(
            &ama_id,
            RollDice {
                match_id: match_id.clone(),
            },
        );
        assert!(matches!(
            drain(&mut ama_rx).as_slice(),
            [ServerMessage::Error(_)]
        ));

        // Second roll settles
        simulator.roll(
            &kofi_id,
            RollDice {
                match_id: match_id.clone(),
            },
        );
        let ama_over = game_over(&drain(&mut ama_rx));
        let kofi_over = game_over(&drain(&mut kofi_rx));
        assert_eq!(ama_over.result, Some(Outcome::Win));
        assert_eq!(ama_over.payout, Some(20));
        assert_eq!(ama_over.new_balance, Some(110));
        assert_eq!(ama_over.message.as_deref(), Some("ama Wins!"));
        assert_eq!(ama_over.rolls.get(&ama_id), Some(&5));
        assert_eq!(ama_over.rolls.get(&kofi_id), Some(&2));
        assert_eq!(kofi_over.result, Some(Outcome::Lose));
        assert_eq!(kofi_over.payout, Some(0));
        assert_eq!(simulator.balance(&ama.phone), Some(110));
        assert_eq!(simulator.balance(&kofi.phone), Some(90));

        // Table is gone
        simulator.roll(&ama_id, RollDice { match_id });
        assert!(matches!(
            drain(&mut ama_rx).as_slice(),
            [ServerMessage::Error(_)]
        ));
    }

    #[test]
    fn test_draw_refunds_stakes() {
        let simulator = simulator([3, 3]);
        let ama = register(&simulator, "ama", "0240000001", 50);
        let kofi = register(&simulator, "kofi", "0240000002", 50);
        let (ama_id, mut ama_rx) = simulator.connect();
        let (kofi_id, mut kofi_rx) = simulator.connect();

        simulator.find_match(&ama_id, find(&ama, 20));
        simulator.find_match(&kofi_id, find(&kofi, 20));
        let match_id = started(&drain(&mut ama_rx));
        drain(&mut kofi_rx);

        for player_id in [&ama_id, &kofi_id] {
            simulator.roll(
                player_id,
                RollDice {
                    match_id: match_id.clone(),
                },
            );
        }
        let over = game_over(&drain(&mut ama_rx));
        assert_eq!(over.result, Some(Outcome::Draw));
        assert_eq!(over.winner, None);
        assert_eq!(over.payout, Some(20));
        assert_eq!(simulator.balance(&ama.phone), Some(50));
        assert_eq!(simulator.balance(&kofi.phone), Some(50));
    }

    #[test]
    fn test_insufficient_funds_rejected() {
        let simulator = simulator([1]);
        let ama = register(&simulator, "ama", "0240000001", 5);
        let (ama_id, mut ama_rx) = simulator.connect();
        drain(&mut ama_rx);

        simulator.find_match(&ama_id, find(&ama, 10));
        assert!(matches!(
            drain(&mut ama_rx).as_slice(),
            [ServerMessage::Error(ErrorMessage { message })] if message == "Insufficient Funds"
        ));
        assert_eq!(simulator.balance(&ama.phone), Some(5));
    }

    #[test]
    fn test_stakes_only_pair_equal() {
        let simulator = simulator([1]);
        let ama = register(&simulator, "ama", "0240000001", 100);
        let kofi = register(&simulator, "kofi", "0240000002", 100);
        let (ama_id, mut ama_rx) = simulator.connect();
        let (kofi_id, mut kofi_rx) = simulator.connect();
        drain(&mut ama_rx);
        drain(&mut kofi_rx);

        simulator.find_match(&ama_id, find(&ama, 10));
        simulator.find_match(&kofi_id, find(&kofi, 20));
        assert!(matches!(
            drain(&mut ama_rx).as_slice(),
            [ServerMessage::Waiting(_)]
        ));
        assert!(matches!(
            drain(&mut kofi_rx).as_slice(),
            [ServerMessage::Waiting(_)]
        ));
    }

    #[test]
    fn test_disconnect_forfeits_match() {
        let simulator = simulator([4]);
        let ama = register(&simulator, "ama", "0240000001", 100);
        let kofi = register(&simulator, "kofi", "0240000002", 100);
        let (ama_id, mut ama_rx) = simulator.connect();
        let (kofi_id, mut kofi_rx) = simulator.connect();

        simulator.find_match(&ama_id, find(&ama, 10));
        simulator.find_match(&kofi_id, find(&kofi, 10));
        drain(&mut ama_rx);
        drain(&mut kofi_rx);

        simulator.disconnect(&kofi_id);
        let over = game_over(&drain(&mut ama_rx));
        assert_eq!(over.result, Some(Outcome::Win));
        assert_eq!(over.new_balance, Some(110));
        assert_eq!(simulator.balance(&kofi.phone), Some(90));
    }

    async fn call(
        router: Router,
        method: Method,
        uri: &str,
        body: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        use tower::ServiceExt;

        let request = axum::http::Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-forwarded-for", "127.0.0.1")
            .body(axum::body::Body::from(body.to_string()))
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_http_endpoints() {
        let api = Api::new(Arc::new(simulator([1])));
        let router = api.router();

        let (status, body) = call(
            router.clone(),
            Method::POST,
            "/register",
            serde_json::json!({"username": "ama", "phone": "0240000001", "password": "secret"}),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["user"]["username"], "ama");

        let (status, body) = call(
            router.clone(),
            Method::POST,
            "/login",
            serde_json::json!({"phone": "0240000001", "password": "nope"}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid password");

        let (status, body) = call(
            router.clone(),
            Method::POST,
            "/login",
            serde_json::json!({"phone": "0240000001", "password": "secret"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let token = body["token"].as_str().unwrap().to_string();

        let (status, body) = call(
            router.clone(),
            Method::POST,
            "/deposit",
            serde_json::json!({"phone": "0240000001", "amount": 50}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["newBalance"], 50);

        let (status, body) = call(
            router.clone(),
            Method::POST,
            "/withdraw",
            serde_json::json!({"phone": "0240000001", "username": "ama", "amount": 80}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Insufficient balance");

        let (status, body) = call(
            router.clone(),
            Method::POST,
            "/balance-update",
            serde_json::json!({"phone": "0240000001", "amount": 20, "type": "withdraw"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["newBalance"], 30);

        // Profile lookup by token
        let request = axum::http::Request::builder()
            .uri("/me")
            .header(header::AUTHORIZATION, token)
            .header("x-forwarded-for", "127.0.0.1")
            .body(axum::body::Body::empty())
            .unwrap();
        let response = tower::ServiceExt::oneshot(router.clone(), request)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let request = axum::http::Request::builder()
            .uri("/me")
            .header(header::AUTHORIZATION, "Bearer bogus")
            .header("x-forwarded-for", "127.0.0.1")
            .body(axum::body::Body::empty())
            .unwrap();
        let response = tower::ServiceExt::oneshot(router, request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_disconnect_leaves_queue() {
        let simulator = simulator([4]);
        let ama = register(&simulator, "ama", "0240000001", 100);
        let kofi = register(&simulator, "kofi", "0240000002", 100);
        let (ama_id, _ama_rx) = simulator.connect();
        let (kofi_id, mut kofi_rx) = simulator.connect();
        drain(&mut kofi_rx);

        simulator.find_match(&ama_id, find(&ama, 10));
        simulator.disconnect(&ama_id);

        // Kofi waits instead of pairing with a departed player
        simulator.find_match(&kofi_id, find(&kofi, 10));
        assert!(matches!(
            drain(&mut kofi_rx).as_slice(),
            [ServerMessage::Waiting(_)]
        ));
        assert_eq!(simulator.balance(&ama.phone), Some(100));
    }
}
