//! Realtime channel messages.
//!
//! Every frame is a JSON object `{"event": NAME, "data": PAYLOAD}`. Event
//! names are upper snake case. Several spellings seen in the wild are
//! accepted on decode (`GAME_RESULT` for `GAME_OVER`) but only the canonical
//! one is ever encoded.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

pub const FIND_MATCH: &str = "FIND_MATCH";
pub const ROLL_DICE: &str = "ROLL_DICE";

pub const CONNECTED: &str = "CONNECTED";
pub const WAITING: &str = "WAITING";
pub const GAME_START: &str = "GAME_START";
pub const ROLL_RESULT: &str = "ROLL_RESULT";
pub const MY_ROLL: &str = "MY_ROLL";
pub const OPPONENT_ROLLED: &str = "OPPONENT_ROLLED";
pub const GAME_OVER: &str = "GAME_OVER";
pub const GAME_RESULT: &str = "GAME_RESULT";
pub const ERROR: &str = "ERROR";

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Frame(#[source] serde_json::Error),
    #[error("unknown event: {0}")]
    UnknownEvent(String),
    #[error("invalid {event} payload: {source}")]
    Payload {
        event: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Serialize, Deserialize)]
struct Frame {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

fn encode_frame<T: Serialize>(event: &str, data: &T) -> String {
    let data = serde_json::to_value(data).unwrap_or(serde_json::Value::Null);
    let frame = Frame {
        event: event.to_string(),
        data,
    };
    // A frame of a string and a JSON value always serializes.
    serde_json::to_string(&frame).unwrap_or_default()
}

fn decode_frame(text: &str) -> Result<Frame, DecodeError> {
    serde_json::from_str(text).map_err(DecodeError::Frame)
}

fn payload<T: DeserializeOwned + Default>(frame: Frame) -> Result<T, DecodeError> {
    if frame.data.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(frame.data).map_err(|source| DecodeError::Payload {
        event: frame.event,
        source,
    })
}

/// Result of a finished match from one player's point of view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    #[serde(alias = "WIN", alias = "won")]
    Win,
    #[serde(alias = "LOSE", alias = "lost", alias = "loss")]
    Lose,
    #[serde(alias = "DRAW", alias = "tie")]
    Draw,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Win => write!(f, "win"),
            Outcome::Lose => write!(f, "lose"),
            Outcome::Draw => write!(f, "draw"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindMatch {
    #[serde(default)]
    pub game_type: String,
    pub stake: u64,
    #[serde(default)]
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollDice {
    pub match_id: String,
}

/// Messages sent by the client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientMessage {
    FindMatch(FindMatch),
    RollDice(RollDice),
}

impl ClientMessage {
    pub fn event(&self) -> &'static str {
        match self {
            ClientMessage::FindMatch(_) => FIND_MATCH,
            ClientMessage::RollDice(_) => ROLL_DICE,
        }
    }

    pub fn encode(&self) -> String {
        match self {
            ClientMessage::FindMatch(data) => encode_frame(FIND_MATCH, data),
            ClientMessage::RollDice(data) => encode_frame(ROLL_DICE, data),
        }
    }

    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let frame = decode_frame(text)?;
        match frame.event.as_str() {
            FIND_MATCH => Ok(ClientMessage::FindMatch(payload(frame)?)),
            ROLL_DICE => Ok(ClientMessage::RollDice(payload(frame)?)),
            _ => Err(DecodeError::UnknownEvent(frame.event)),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connected {
    pub player_id: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Waiting {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStart {
    pub match_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stake: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opponent: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_id: Option<String>,
    pub player_id: String,
    pub roll: u8,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MyRoll {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_id: Option<String>,
    pub roll: u8,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpponentRolled {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_id: Option<String>,
    pub player_id: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameOver {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Outcome>,
    /// Player id of the winner, absent on a draw.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner: Option<String>,
    /// Rolls keyed by player id.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub rolls: BTreeMap<String, u8>,
    /// Amount credited to the recipient.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_balance: Option<u64>,
}

impl GameOver {
    /// Outcome for `player_id`: the explicit `result` when present, otherwise
    /// derived from `winner` and `rolls`.
    pub fn outcome_for(&self, player_id: Option<&str>) -> Option<Outcome> {
        if let Some(result) = self.result {
            return Some(result);
        }
        let me = player_id?;
        if let Some(winner) = &self.winner {
            return Some(if winner == me {
                Outcome::Win
            } else {
                Outcome::Lose
            });
        }
        let mine = *self.rolls.get(me)?;
        let theirs = self
            .rolls
            .iter()
            .find(|(id, _)| id.as_str() != me)
            .map(|(_, roll)| *roll)?;
        Some(match mine.cmp(&theirs) {
            std::cmp::Ordering::Greater => Outcome::Win,
            std::cmp::Ordering::Less => Outcome::Lose,
            std::cmp::Ordering::Equal => Outcome::Draw,
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMessage {
    pub message: String,
}

/// Messages pushed by the server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerMessage {
    Connected(Connected),
    Waiting(Waiting),
    GameStart(GameStart),
    RollResult(RollResult),
    MyRoll(MyRoll),
    OpponentRolled(OpponentRolled),
    GameOver(GameOver),
    Error(ErrorMessage),
}

impl ServerMessage {
    pub fn event(&self) -> &'static str {
        match self {
            ServerMessage::Connected(_) => CONNECTED,
            ServerMessage::Waiting(_) => WAITING,
            ServerMessage::GameStart(_) => GAME_START,
            ServerMessage::RollResult(_) => ROLL_RESULT,
            ServerMessage::MyRoll(_) => MY_ROLL,
            ServerMessage::OpponentRolled(_) => OPPONENT_ROLLED,
            ServerMessage::GameOver(_) => GAME_OVER,
            ServerMessage::Error(_) => ERROR,
        }
    }

    pub fn encode(&self) -> String {
        let event = self.event();
        match self {
            ServerMessage::Connected(data) => encode_frame(event, data),
            ServerMessage::Waiting(data) => encode_frame(event, data),
            ServerMessage::GameStart(data) => encode_frame(event, data),
            ServerMessage::RollResult(data) => encode_frame(event, data),
            ServerMessage::MyRoll(data) => encode_frame(event, data),
            ServerMessage::OpponentRolled(data) => encode_frame(event, data),
            ServerMessage::GameOver(data) => encode_frame(event, data),
            ServerMessage::Error(data) => encode_frame(event, data),
        }
    }

    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let frame = decode_frame(text)?;
        match frame.event.as_str() {
            CONNECTED => Ok(ServerMessage::Connected(payload(frame)?)),
            WAITING => Ok(ServerMessage::Waiting(payload(frame)?)),
            GAME_START => Ok(ServerMessage::GameStart(payload(frame)?)),
            ROLL_RESULT => Ok(ServerMessage::RollResult(payload(frame)?)),
            MY_ROLL => Ok(ServerMessage::MyRoll(payload(frame)?)),
            OPPONENT_ROLLED => Ok(ServerMessage::OpponentRolled(payload(frame)?)),
            GAME_OVER | GAME_RESULT => Ok(ServerMessage::GameOver(payload(frame)?)),
            ERROR => Ok(ServerMessage::Error(payload(frame)?)),
            _ => Err(DecodeError::UnknownEvent(frame.event)),
        }
    }
}
