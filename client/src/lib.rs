//! Client for the Kumasi dice game.
//!
//! [Client] wraps the HTTP API, [Connection] is the realtime channel used for
//! matchmaking and rolls, [SessionStore] persists the authenticated session and
//! [Dashboard] ties them together around the [game::Game] state machine.

pub mod auth;
pub mod client;
pub mod config;
pub mod dashboard;
pub mod events;
pub mod game;
pub mod session;

pub use client::Client;
pub use client::RetryPolicy;
pub use dashboard::Dashboard;
pub use events::Connection;
pub use session::SessionStore;
use kumasi_types::{realtime::DecodeError, CONNECTION_ERROR, INSUFFICIENT_FUNDS};
use thiserror::Error;

/// Error type for client operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("failed: {0}")]
    Failed(reqwest::StatusCode),
    #[error("rejected ({status}): {message}")]
    Rejected {
        status: reqwest::StatusCode,
        message: String,
    },
    #[error("unauthorized")]
    Unauthorized,
    #[error("not logged in")]
    NotLoggedIn,
    #[error("invalid data: {0}")]
    InvalidData(#[from] serde_json::Error),
    #[error("invalid event: {0}")]
    InvalidEvent(#[from] DecodeError),
    #[error("game error: {0}")]
    Game(#[from] game::GameError),
    /// Refusal pushed over the realtime channel.
    #[error("refused by server: {0}")]
    Server(String),
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("amount must be greater than zero")]
    InvalidAmount,
    #[error("not connected")]
    NotConnected,
    #[error("connection closed")]
    ConnectionClosed,
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),
    #[error("dial timeout")]
    DialTimeout,
    #[error("invalid URL scheme: {0} (expected http or https)")]
    InvalidScheme(String),
    #[error("storage error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Text to show the player. Server-provided reasons are shown verbatim;
    /// transport failures collapse to `fallback`.
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            Error::Rejected { message, .. } | Error::Server(message) => message.clone(),
            Error::Unauthorized | Error::NotLoggedIn => "Please log in.".to_string(),
            Error::Game(game::GameError::InsufficientFunds { .. }) => {
                INSUFFICIENT_FUNDS.to_string()
            }
            Error::Game(err) => err.to_string(),
            Error::MissingField(_) | Error::InvalidAmount | Error::InvalidScheme(_) => {
                self.to_string()
            }
            Error::Failed(_)
            | Error::Reqwest(_)
            | Error::Tungstenite(_)
            | Error::InvalidData(_)
            | Error::InvalidEvent(_)
            | Error::NotConnected
            | Error::ConnectionClosed
            | Error::Url(_)
            | Error::DialTimeout
            | Error::Io(_) => fallback.to_string(),
        }
    }

    /// [Error::user_message] with the balance-action fallback.
    pub fn alert(&self) -> String {
        self.user_message(CONNECTION_ERROR)
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;
