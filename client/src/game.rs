//! Client-side match state machine.
//!
//! ```text
//! Idle --find_match--> Searching --GAME_START--> Playing --GAME_OVER--> Finished
//!  ^                                                                      |
//!  +---------------------------- reset (after delay) ---------------------+
//! ```
//!
//! [Game] is pure: it never touches the network or the clock. Callers feed it
//! server events with the current [Instant] and forward the [ClientMessage]s
//! it produces.

use kumasi_types::{
    realtime::{
        ClientMessage, FindMatch, GameOver, GameStart, Outcome, RollDice, ServerMessage,
    },
    User, DEFAULT_STAKE, DICE_FACES, GAME_TYPE_DICE, RESET_DELAY_MS, WIN_PAYOUT_MULTIPLIER,
};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    Idle,
    Searching,
    Playing,
    Finished,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Idle => write!(f, "idle"),
            Phase::Searching => write!(f, "searching"),
            Phase::Playing => write!(f, "playing"),
            Phase::Finished => write!(f, "finished"),
        }
    }
}

/// How the local balance follows a match.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BalancePolicy {
    /// Leave the balance alone until the server reports it.
    #[default]
    Authoritative,
    /// Debit the stake on start and credit the payout on finish, then
    /// reconcile with the server.
    Optimistic,
}

impl std::str::FromStr for BalancePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "authoritative" => Ok(BalancePolicy::Authoritative),
            "optimistic" => Ok(BalancePolicy::Optimistic),
            other => Err(format!("unknown balance policy: {other}")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GameConfig {
    pub stake: u64,
    pub reset_delay: Duration,
    pub policy: BalancePolicy,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            stake: DEFAULT_STAKE,
            reset_delay: Duration::from_millis(RESET_DELAY_MS),
            policy: BalancePolicy::default(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GameError {
    #[error("insufficient funds: balance {balance}, stake {stake}")]
    InsufficientFunds { balance: u64, stake: u64 },
    #[error("cannot search for a match while {0}")]
    NotIdle(Phase),
    #[error("no match in progress")]
    NoActiveMatch,
    #[error("already rolled this match")]
    AlreadyRolled,
    #[error("unexpected {event} while {phase}")]
    UnexpectedEvent { event: &'static str, phase: Phase },
    #[error("event for match {got}, current match is {expected}")]
    MatchMismatch { expected: String, got: String },
    #[error("invalid roll: {0}")]
    InvalidRoll(u8),
}

/// Adjustment to apply to the locally displayed balance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BalanceChange {
    Debit(u64),
    Credit(u64),
    /// Server-reported balance, replaces the local value.
    Set(u64),
}

impl BalanceChange {
    pub fn apply(self, balance: u64) -> u64 {
        match self {
            BalanceChange::Debit(amount) => balance.saturating_sub(amount),
            BalanceChange::Credit(amount) => balance.saturating_add(amount),
            BalanceChange::Set(balance) => balance,
        }
    }
}

/// What an accepted event did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transition {
    Connected { player_id: String },
    Searching,
    Started { match_id: String },
    Rolled { mine: bool, roll: u8 },
    OpponentRolled,
    Finished {
        outcome: Option<Outcome>,
        message: Option<String>,
    },
    /// The server refused a request or reported a problem.
    Rejected { message: String },
    Reset,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Update {
    pub transition: Transition,
    pub balance: Option<BalanceChange>,
}

impl Update {
    fn new(transition: Transition) -> Self {
        Self {
            transition,
            balance: None,
        }
    }

    fn with_balance(mut self, change: Option<BalanceChange>) -> Self {
        self.balance = change;
        self
    }
}

/// Per-match state, discarded on reset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Match {
    pub match_id: String,
    pub stake: u64,
    pub my_roll: Option<u8>,
    pub opponent_roll: Option<u8>,
    pub outcome: Option<Outcome>,
    pub message: Option<String>,
    pub payout: Option<u64>,
    roll_requested: bool,
}

impl Match {
    fn new(start: &GameStart, default_stake: u64) -> Self {
        Self {
            match_id: start.match_id.clone(),
            stake: start.stake.unwrap_or(default_stake),
            my_roll: None,
            opponent_roll: None,
            outcome: None,
            message: None,
            payout: None,
            roll_requested: false,
        }
    }

    pub fn has_rolled(&self) -> bool {
        self.roll_requested || self.my_roll.is_some()
    }

    fn check_id(&self, match_id: Option<&str>) -> Result<(), GameError> {
        match match_id {
            Some(id) if id != self.match_id => Err(GameError::MatchMismatch {
                expected: self.match_id.clone(),
                got: id.to_string(),
            }),
            _ => Ok(()),
        }
    }
}

/// Payout credited for `outcome` when the server does not report one.
pub fn scheduled_payout(outcome: Outcome, stake: u64) -> u64 {
    match outcome {
        Outcome::Win => stake.saturating_mul(WIN_PAYOUT_MULTIPLIER),
        Outcome::Draw => stake,
        Outcome::Lose => 0,
    }
}

#[derive(Clone, Debug)]
pub struct Game {
    config: GameConfig,
    phase: Phase,
    player_id: Option<String>,
    current: Option<Match>,
    finished_at: Option<Instant>,
}

impl Game {
    pub fn new(config: GameConfig) -> Self {
        Self {
            config,
            phase: Phase::Idle,
            player_id: None,
            current: None,
            finished_at: None,
        }
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Connection id assigned by the server, used to tell own rolls apart.
    pub fn player_id(&self) -> Option<&str> {
        self.player_id.as_deref()
    }

    pub fn current(&self) -> Option<&Match> {
        self.current.as_ref()
    }

    /// Request a match on behalf of `user`.
    pub fn find_match(&mut self, user: &User) -> Result<ClientMessage, GameError> {
        if self.phase != Phase::Idle {
            return Err(GameError::NotIdle(self.phase));
        }
        if user.balance < self.config.stake {
            return Err(GameError::InsufficientFunds {
                balance: user.balance,
                stake: self.config.stake,
            });
        }
        self.phase = Phase::Searching;
        info!(stake = self.config.stake, "Searching for a match");
        Ok(ClientMessage::FindMatch(FindMatch {
            game_type: GAME_TYPE_DICE.to_string(),
            stake: self.config.stake,
            user_id: user.id.clone(),
            phone: Some(user.phone.clone()),
        }))
    }

    /// Request this player's single roll for the current match.
    pub fn roll(&mut self) -> Result<ClientMessage, GameError> {
        if self.phase != Phase::Playing {
            return Err(GameError::NoActiveMatch);
        }
        let current = self.current.as_mut().ok_or(GameError::NoActiveMatch)?;
        if current.has_rolled() {
            return Err(GameError::AlreadyRolled);
        }
        current.roll_requested = true;
        Ok(ClientMessage::RollDice(RollDice {
            match_id: current.match_id.clone(),
        }))
    }

    /// Apply a server event. Events that do not fit the current phase or name
    /// another match are rejected and leave the state untouched.
    pub fn handle(&mut self, message: &ServerMessage, now: Instant) -> Result<Update, GameError> {
        let event = message.event();
        let unexpected = GameError::UnexpectedEvent {
            event,
            phase: self.phase,
        };
        match message {
            ServerMessage::Connected(connected) => {
                self.player_id = Some(connected.player_id.clone());
                Ok(Update::new(Transition::Connected {
                    player_id: connected.player_id.clone(),
                }))
            }
            ServerMessage::Waiting(_) => match self.phase {
                Phase::Idle | Phase::Searching => {
                    self.phase = Phase::Searching;
                    Ok(Update::new(Transition::Searching))
                }
                _ => Err(unexpected),
            },
            ServerMessage::GameStart(start) => match self.phase {
                Phase::Idle | Phase::Searching => {
                    let current = Match::new(start, self.config.stake);
                    let change = match self.config.policy {
                        BalancePolicy::Optimistic => Some(BalanceChange::Debit(current.stake)),
                        BalancePolicy::Authoritative => None,
                    };
                    info!(match_id = %current.match_id, stake = current.stake, "Match started");
                    self.current = Some(current);
                    self.phase = Phase::Playing;
                    Ok(Update::new(Transition::Started {
                        match_id: start.match_id.clone(),
                    })
                    .with_balance(change))
                }
                _ => Err(unexpected),
            },
            ServerMessage::RollResult(result) => {
                let current = self.playing(unexpected)?;
                current.check_id(result.match_id.as_deref())?;
                let roll = valid_roll(result.roll)?;
                let mine = self.player_id.as_deref() == Some(result.player_id.as_str());
                let current = self.current.as_mut().ok_or(GameError::NoActiveMatch)?;
                if mine {
                    current.my_roll = Some(roll);
                } else {
                    current.opponent_roll = Some(roll);
                }
                debug!(mine, roll, "Roll recorded");
                Ok(Update::new(Transition::Rolled { mine, roll }))
            }
            ServerMessage::MyRoll(result) => {
                let current = self.playing(unexpected)?;
                current.check_id(result.match_id.as_deref())?;
                let roll = valid_roll(result.roll)?;
                if let Some(current) = self.current.as_mut() {
                    current.my_roll = Some(roll);
                }
                Ok(Update::new(Transition::Rolled { mine: true, roll }))
            }
            ServerMessage::OpponentRolled(rolled) => {
                let current = self.playing(unexpected)?;
                current.check_id(rolled.match_id.as_deref())?;
                Ok(Update::new(Transition::OpponentRolled))
            }
            ServerMessage::GameOver(over) => {
                let current = self.playing(unexpected)?;
                current.check_id(over.match_id.as_deref())?;
                Ok(self.finish(over, now))
            }
            ServerMessage::Error(error) => {
                match self.phase {
                    // The matchmaking request was refused
                    Phase::Searching => self.phase = Phase::Idle,
                    // A refused roll may be requested again
                    Phase::Playing => {
                        if let Some(current) = self.current.as_mut() {
                            if current.my_roll.is_none() {
                                current.roll_requested = false;
                            }
                        }
                    }
                    Phase::Idle | Phase::Finished => {}
                }
                Ok(Update::new(Transition::Rejected {
                    message: error.message.clone(),
                }))
            }
        }
    }

    fn playing(&self, unexpected: GameError) -> Result<&Match, GameError> {
        match (self.phase, self.current.as_ref()) {
            (Phase::Playing, Some(current)) => Ok(current),
            _ => Err(unexpected),
        }
    }

    fn finish(&mut self, over: &GameOver, now: Instant) -> Update {
        let player_id = self.player_id.clone();
        let policy = self.config.policy;
        let Some(current) = self.current.as_mut() else {
            return Update::new(Transition::Finished {
                outcome: None,
                message: over.message.clone(),
            });
        };

        if let Some(me) = player_id.as_deref() {
            for (id, roll) in &over.rolls {
                if id == me {
                    current.my_roll.get_or_insert(*roll);
                } else {
                    current.opponent_roll.get_or_insert(*roll);
                }
            }
        }
        let outcome = over.outcome_for(player_id.as_deref());
        let payout = over
            .payout
            .or_else(|| outcome.map(|outcome| scheduled_payout(outcome, current.stake)));
        current.outcome = outcome;
        current.message = over.message.clone();
        current.payout = payout;

        let change = match (over.new_balance, policy) {
            (Some(balance), _) => Some(BalanceChange::Set(balance)),
            (None, BalancePolicy::Optimistic) => payout
                .filter(|payout| *payout > 0)
                .map(BalanceChange::Credit),
            (None, BalancePolicy::Authoritative) => None,
        };

        info!(match_id = %current.match_id, ?outcome, ?payout, "Match finished");
        self.phase = Phase::Finished;
        self.finished_at = Some(now);
        Update::new(Transition::Finished {
            outcome,
            message: over.message.clone(),
        })
        .with_balance(change)
    }

    /// Time left before the finished match returns to the lobby.
    pub fn time_until_reset(&self, now: Instant) -> Option<Duration> {
        if self.phase != Phase::Finished {
            return None;
        }
        let finished_at = self.finished_at?;
        Some(
            (finished_at + self.config.reset_delay).saturating_duration_since(now),
        )
    }

    pub fn reset_due(&self, now: Instant) -> bool {
        self.time_until_reset(now) == Some(Duration::ZERO)
    }

    /// Return a finished match to the lobby. Returns `None` when not finished.
    pub fn reset(&mut self) -> Option<Update> {
        if self.phase != Phase::Finished {
            return None;
        }
        self.phase = Phase::Idle;
        self.current = None;
        self.finished_at = None;
        info!("Back to lobby");
        Some(Update::new(Transition::Reset))
    }
}

fn valid_roll(roll: u8) -> Result<u8, GameError> {
    if (1..=DICE_FACES).contains(&roll) {
        Ok(roll)
    } else {
        Err(GameError::InvalidRoll(roll))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kumasi_types::realtime::{
        Connected, ErrorMessage, MyRoll, OpponentRolled, RollResult, Waiting,
    };

    const ME: &str = "me";
    const THEM: &str = "them";

    fn user(balance: u64) -> User {
        User {
            id: "u1".to_string(),
            username: "kofi".to_string(),
            phone: "0241234567".to_string(),
            balance,
        }
    }

    fn game(policy: BalancePolicy) -> Game {
        let mut game = Game::new(GameConfig {
            stake: 10,
            reset_delay: Duration::from_secs(3),
            policy,
        });
        game.handle(
            &ServerMessage::Connected(Connected {
                player_id: ME.to_string(),
            }),
            Instant::now(),
        )
        .unwrap();
        game
    }

    fn start(match_id: &str) -> ServerMessage {
        ServerMessage::GameStart(GameStart {
            match_id: match_id.to_string(),
            stake: None,
            opponent: None,
        })
    }

    fn roll_result(match_id: &str, player_id: &str, roll: u8) -> ServerMessage {
        ServerMessage::RollResult(RollResult {
            match_id: Some(match_id.to_string()),
            player_id: player_id.to_string(),
            roll,
        })
    }

    fn game_over(match_id: &str, winner: Option<&str>, payout: Option<u64>) -> ServerMessage {
        ServerMessage::GameOver(GameOver {
            match_id: Some(match_id.to_string()),
            message: Some("Player Wins!".to_string()),
            winner: winner.map(str::to_string),
            payout,
            ..Default::default()
        })
    }

    #[test]
    fn test_full_match_cycle() {
        let mut game = game(BalancePolicy::Authoritative);
        let now = Instant::now();

        let request = game.find_match(&user(100)).unwrap();
        let ClientMessage::FindMatch(find) = request else {
            panic!("expected find match");
        };
        assert_eq!(find.stake, 10);
        assert_eq!(find.game_type, "DICE");
        assert_eq!(find.user_id, "u1");
        assert_eq!(game.phase(), Phase::Searching);

        let update = game
            .handle(&ServerMessage::Waiting(Waiting::default()), now)
            .unwrap();
        assert_eq!(update.transition, Transition::Searching);

        let update = game.handle(&start("m1"), now).unwrap();
        assert_eq!(update.balance, None);
        assert_eq!(game.phase(), Phase::Playing);

        let ClientMessage::RollDice(roll) = game.roll().unwrap() else {
            panic!("expected roll");
        };
        assert_eq!(roll.match_id, "m1");

        game.handle(&roll_result("m1", ME, 5), now).unwrap();
        game.handle(&roll_result("m1", THEM, 2), now).unwrap();
        let current = game.current().unwrap();
        assert_eq!(current.my_roll, Some(5));
        assert_eq!(current.opponent_roll, Some(2));

        let update = game.handle(&game_over("m1", Some(ME), None), now).unwrap();
        assert_eq!(
            update.transition,
            Transition::Finished {
                outcome: Some(Outcome::Win),
                message: Some("Player Wins!".to_string()),
            }
        );
        assert_eq!(update.balance, None);
        assert_eq!(game.phase(), Phase::Finished);

        assert!(!game.reset_due(now));
        assert!(game.reset_due(now + Duration::from_secs(3)));
        assert_eq!(game.reset().unwrap().transition, Transition::Reset);
        assert_eq!(game.phase(), Phase::Idle);
        assert!(game.current().is_none());
    }

    #[test]
    fn test_optimistic_balance_example() {
        // Balance 100, stake 10: 90 on start, 110 after a win paying 20
        let mut game = game(BalancePolicy::Optimistic);
        let now = Instant::now();
        let mut balance = 100;

        game.find_match(&user(balance)).unwrap();
        let update = game.handle(&start("m1"), now).unwrap();
        balance = update.balance.unwrap().apply(balance);
        assert_eq!(balance, 90);

        let update = game.handle(&game_over("m1", Some(ME), Some(20)), now).unwrap();
        balance = update.balance.unwrap().apply(balance);
        assert_eq!(balance, 110);
    }

    #[test]
    fn test_optimistic_uses_schedule_without_payout() {
        let mut game = game(BalancePolicy::Optimistic);
        let now = Instant::now();
        game.find_match(&user(100)).unwrap();
        game.handle(&start("m1"), now).unwrap();

        let mut over = GameOver {
            match_id: Some("m1".to_string()),
            ..Default::default()
        };
        over.rolls.insert(ME.to_string(), 3);
        over.rolls.insert(THEM.to_string(), 3);
        let update = game.handle(&ServerMessage::GameOver(over), now).unwrap();
        assert_eq!(update.balance, Some(BalanceChange::Credit(10)));
        assert_eq!(game.current().unwrap().outcome, Some(Outcome::Draw));
        assert_eq!(game.current().unwrap().my_roll, Some(3));

        // A loss credits nothing
        let mut game = self::game(BalancePolicy::Optimistic);
        game.find_match(&user(100)).unwrap();
        game.handle(&start("m2"), now).unwrap();
        let update = game
            .handle(&game_over("m2", Some(THEM), None), now)
            .unwrap();
        assert_eq!(update.balance, None);
    }

    #[test]
    fn test_server_balance_wins_over_policy() {
        let mut game = game(BalancePolicy::Optimistic);
        let now = Instant::now();
        game.find_match(&user(100)).unwrap();
        game.handle(&start("m1"), now).unwrap();
        let over = GameOver {
            match_id: Some("m1".to_string()),
            result: Some(Outcome::Win),
            payout: Some(20),
            new_balance: Some(111),
            ..Default::default()
        };
        let update = game.handle(&ServerMessage::GameOver(over), now).unwrap();
        assert_eq!(update.balance, Some(BalanceChange::Set(111)));
    }

    #[test]
    fn test_insufficient_funds() {
        let mut game = game(BalancePolicy::Authoritative);
        let err = game.find_match(&user(9)).unwrap_err();
        assert_eq!(
            err,
            GameError::InsufficientFunds {
                balance: 9,
                stake: 10
            }
        );
        assert_eq!(game.phase(), Phase::Idle);
    }

    #[test]
    fn test_no_state_is_skipped() {
        let mut game = game(BalancePolicy::Authoritative);
        let now = Instant::now();

        // Nothing but GAME_START leads to Playing
        assert!(matches!(
            game.handle(&roll_result("m1", ME, 4), now),
            Err(GameError::UnexpectedEvent { phase: Phase::Idle, .. })
        ));
        assert!(game.handle(&game_over("m1", None, None), now).is_err());

        game.find_match(&user(100)).unwrap();
        assert!(matches!(
            game.handle(&game_over("m1", None, None), now),
            Err(GameError::UnexpectedEvent {
                event: "GAME_OVER",
                phase: Phase::Searching
            })
        ));
        assert_eq!(game.phase(), Phase::Searching);

        game.handle(&start("m1"), now).unwrap();
        // A second start while playing is ignored
        assert!(game.handle(&start("m2"), now).is_err());
        assert!(game
            .handle(&ServerMessage::Waiting(Waiting::default()), now)
            .is_err());
        assert_eq!(game.current().unwrap().match_id, "m1");

        game.handle(&game_over("m1", None, None), now).unwrap();
        assert!(game.find_match(&user(100)).is_err());
        assert!(game.handle(&start("m3"), now).is_err());
        assert_eq!(game.phase(), Phase::Finished);
    }

    #[test]
    fn test_roll_once_per_match() {
        let mut game = game(BalancePolicy::Authoritative);
        let now = Instant::now();
        assert_eq!(game.roll().unwrap_err(), GameError::NoActiveMatch);

        game.find_match(&user(100)).unwrap();
        game.handle(&start("m1"), now).unwrap();
        game.roll().unwrap();
        assert_eq!(game.roll().unwrap_err(), GameError::AlreadyRolled);

        // Still rejected once the result is in
        game.handle(
            &ServerMessage::MyRoll(MyRoll {
                match_id: None,
                roll: 6,
            }),
            now,
        )
        .unwrap();
        assert_eq!(game.roll().unwrap_err(), GameError::AlreadyRolled);

        // The next match gets a fresh roll
        game.handle(&game_over("m1", Some(ME), None), now).unwrap();
        game.reset().unwrap();
        game.find_match(&user(100)).unwrap();
        game.handle(&start("m2"), now).unwrap();
        assert!(game.roll().is_ok());
    }

    #[test]
    fn test_late_events_for_old_match_dropped() {
        let mut game = game(BalancePolicy::Authoritative);
        let now = Instant::now();
        game.find_match(&user(100)).unwrap();
        game.handle(&start("m2"), now).unwrap();

        let err = game.handle(&roll_result("m1", THEM, 6), now).unwrap_err();
        assert_eq!(
            err,
            GameError::MatchMismatch {
                expected: "m2".to_string(),
                got: "m1".to_string()
            }
        );
        assert!(game
            .handle(
                &ServerMessage::OpponentRolled(OpponentRolled {
                    match_id: Some("m1".to_string()),
                    player_id: THEM.to_string(),
                }),
                now
            )
            .is_err());
        assert!(game.handle(&game_over("m1", None, None), now).is_err());
        assert_eq!(game.phase(), Phase::Playing);
        assert_eq!(game.current().unwrap().opponent_roll, None);
    }

    #[test]
    fn test_invalid_roll_rejected() {
        let mut game = game(BalancePolicy::Authoritative);
        let now = Instant::now();
        game.find_match(&user(100)).unwrap();
        game.handle(&start("m1"), now).unwrap();
        assert_eq!(
            game.handle(&roll_result("m1", ME, 7), now).unwrap_err(),
            GameError::InvalidRoll(7)
        );
        assert_eq!(
            game.handle(&roll_result("m1", ME, 0), now).unwrap_err(),
            GameError::InvalidRoll(0)
        );
    }

    #[test]
    fn test_error_while_searching_returns_to_idle() {
        let mut game = game(BalancePolicy::Authoritative);
        let now = Instant::now();
        game.find_match(&user(100)).unwrap();
        let update = game
            .handle(
                &ServerMessage::Error(ErrorMessage {
                    message: "Insufficient Funds".to_string(),
                }),
                now,
            )
            .unwrap();
        assert_eq!(
            update.transition,
            Transition::Rejected {
                message: "Insufficient Funds".to_string()
            }
        );
        assert_eq!(game.phase(), Phase::Idle);
    }

    #[test]
    fn test_refused_roll_can_be_retried() {
        let mut game = game(BalancePolicy::Authoritative);
        let now = Instant::now();
        game.find_match(&user(100)).unwrap();
        game.handle(&start("m1"), now).unwrap();
        game.roll().unwrap();
        assert_eq!(game.roll(), Err(GameError::AlreadyRolled));

        let refusal = ServerMessage::Error(ErrorMessage {
            message: "Roll failed, try again".to_string(),
        });
        let update = game.handle(&refusal, now).unwrap();
        assert_eq!(
            update.transition,
            Transition::Rejected {
                message: "Roll failed, try again".to_string(),
            }
        );
        assert_eq!(game.phase(), Phase::Playing);
        assert!(!game.current().unwrap().has_rolled());

        // Retry goes through, and once the roll lands an error no longer resets it
        assert!(matches!(game.roll(), Ok(ClientMessage::RollDice(_))));
        game.handle(&roll_result("m1", ME, 4), now).unwrap();
        game.handle(&refusal, now).unwrap();
        assert_eq!(game.roll(), Err(GameError::AlreadyRolled));
    }

    #[test]
    fn test_reset_only_when_finished() {
        let mut game = game(BalancePolicy::Authoritative);
        assert!(game.reset().is_none());
        assert_eq!(game.time_until_reset(Instant::now()), None);
    }

    #[test]
    fn test_balance_change_saturates() {
        assert_eq!(BalanceChange::Debit(10).apply(5), 0);
        assert_eq!(BalanceChange::Credit(1).apply(u64::MAX), u64::MAX);
        assert_eq!(BalanceChange::Set(42).apply(7), 42);
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!(
            "optimistic".parse::<BalancePolicy>().unwrap(),
            BalancePolicy::Optimistic
        );
        assert!("reload".parse::<BalancePolicy>().is_err());
    }
}
