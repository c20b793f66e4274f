use crate::{
    auth,
    events::Connection,
    game::{Game, GameConfig, Phase, Transition, Update},
    Client, Error, Result, SessionStore,
};
use kumasi_types::{api::BalanceOperation, realtime::Outcome, Session, User};
use std::time::Instant;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Times a refused roll is requested again before giving up on the match.
const ROLL_ATTEMPTS: usize = 3;

/// The logged-in view: balance actions plus the match flow, over one
/// long-lived realtime connection.
pub struct Dashboard {
    client: Client,
    store: SessionStore,
    session: Session,
    game: Game,
    connection: Option<Connection>,
}

impl Dashboard {
    /// Resume the persisted session and refresh it from the server.
    ///
    /// A missing session yields [Error::NotLoggedIn]; a token the server no
    /// longer accepts clears the store and yields [Error::Unauthorized].
    pub async fn open(client: Client, store: SessionStore, config: GameConfig) -> Result<Self> {
        let session = store.load()?.ok_or(Error::NotLoggedIn)?;
        let mut dashboard = Self::from_session(client, store, session, config);
        if let Err(e) = dashboard.refresh().await {
            if matches!(e, Error::Unauthorized) {
                warn!("Stored session rejected, logging out");
                dashboard.store.clear()?;
            }
            return Err(e);
        }
        Ok(dashboard)
    }

    /// Wrap a freshly obtained session without contacting the server.
    pub fn from_session(
        client: Client,
        store: SessionStore,
        session: Session,
        config: GameConfig,
    ) -> Self {
        Self {
            client,
            store,
            session,
            game: Game::new(config),
            connection: None,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn user(&self) -> &User {
        &self.session.user
    }

    pub fn balance(&self) -> u64 {
        self.session.balance()
    }

    pub fn game(&self) -> &Game {
        &self.game
    }

    fn set_balance(&mut self, balance: u64) -> Result<u64> {
        self.session.user.balance = balance;
        self.store.save(&self.session)?;
        Ok(balance)
    }

    /// Replace the local profile with the server's.
    pub async fn refresh(&mut self) -> Result<&User> {
        let user = self.client.me(&self.session.token).await?;
        debug!(balance = user.balance, "Refreshed profile");
        self.session.user = user;
        self.store.save(&self.session)?;
        Ok(&self.session.user)
    }

    pub async fn deposit(&mut self, amount: u64) -> Result<u64> {
        if amount == 0 {
            return Err(Error::InvalidAmount);
        }
        let balance = self
            .client
            .deposit(&self.session.user.phone, amount)
            .await?;
        info!(amount, balance, "Deposited");
        self.set_balance(balance)
    }

    pub async fn withdraw(&mut self, amount: u64) -> Result<u64> {
        if amount == 0 {
            return Err(Error::InvalidAmount);
        }
        let user = &self.session.user;
        let balance = self
            .client
            .withdraw(&user.phone, &user.username, amount)
            .await?;
        info!(amount, balance, "Withdrew");
        self.set_balance(balance)
    }

    /// Deposit or withdraw through the consolidated endpoint.
    pub async fn update_balance(&mut self, operation: BalanceOperation, amount: u64) -> Result<u64> {
        if amount == 0 {
            return Err(Error::InvalidAmount);
        }
        let balance = self
            .client
            .update_balance(&self.session.user.phone, amount, operation)
            .await?;
        info!(%operation, amount, balance, "Balance updated");
        self.set_balance(balance)
    }

    /// Open the realtime connection if it is not open yet.
    pub async fn connect(&mut self) -> Result<()> {
        if self.connection.is_none() {
            self.connection = Some(self.client.connect_socket().await?);
        }
        Ok(())
    }

    fn connection(&self) -> Result<&Connection> {
        self.connection.as_ref().ok_or(Error::NotConnected)
    }

    pub fn find_match(&mut self) -> Result<()> {
        self.connection()?;
        let request = self.game.find_match(&self.session.user)?;
        self.connection()?.emit(request)
    }

    pub fn roll(&mut self) -> Result<()> {
        self.connection()?;
        let request = self.game.roll()?;
        self.connection()?.emit(request)
    }

    /// Wait for the next thing that happens: a server event, or the return to
    /// the lobby once a finished match has been shown long enough.
    ///
    /// Returns `Ok(None)` for events that were dropped (malformed, or not
    /// valid in the current phase).
    pub async fn next_event(&mut self) -> Result<Option<Update>> {
        if let Some(wait) = self.game.time_until_reset(Instant::now()) {
            let connection = self.connection.as_mut().ok_or(Error::NotConnected)?;
            tokio::select! {
                _ = sleep(wait) => {
                    return self.tick().await;
                }
                message = connection.next() => {
                    return self.apply(message);
                }
            }
        }
        let connection = self.connection.as_mut().ok_or(Error::NotConnected)?;
        let message = connection.next().await;
        self.apply(message)
    }

    fn apply(
        &mut self,
        message: Option<Result<kumasi_types::realtime::ServerMessage>>,
    ) -> Result<Option<Update>> {
        let message = match message {
            Some(Ok(message)) => message,
            Some(Err(Error::InvalidEvent(e))) => {
                warn!("Dropping malformed event: {}", e);
                return Ok(None);
            }
            Some(Err(e)) => return Err(e),
            None => return Err(Error::ConnectionClosed),
        };
        match self.game.handle(&message, Instant::now()) {
            Ok(update) => {
                if let Some(change) = update.balance {
                    let balance = change.apply(self.session.user.balance);
                    self.set_balance(balance)?;
                }
                Ok(Some(update))
            }
            Err(e) => {
                warn!(event = message.event(), "Dropping event: {}", e);
                Ok(None)
            }
        }
    }

    /// Return to the lobby if the reset delay has elapsed, then resynchronise
    /// the balance with the server.
    pub async fn tick(&mut self) -> Result<Option<Update>> {
        if !self.game.reset_due(Instant::now()) {
            return Ok(None);
        }
        let update = self.game.reset();
        if let Err(e) = self.refresh().await {
            // The lobby is still usable with the last known balance
            warn!("Failed to refresh balance after match: {}", e);
        }
        Ok(update)
    }

    /// Play one match start to finish: search, roll as soon as it starts, and
    /// wait for the return to the lobby. `observe` sees every applied update.
    ///
    /// Returns this player's outcome. A refused matchmaking request, or a roll
    /// refused [ROLL_ATTEMPTS] times, is returned as [Error::Server].
    pub async fn play(
        &mut self,
        mut observe: impl FnMut(&Self, &Update),
    ) -> Result<Option<Outcome>> {
        self.connect().await?;
        self.find_match()?;
        let mut outcome = None;
        let mut rolls = 0;

        loop {
            let Some(update) = self.next_event().await? else {
                continue;
            };
            observe(self, &update);
            match update.transition {
                Transition::Started { .. } => {
                    rolls = 1;
                    self.roll()?;
                }
                Transition::Finished { outcome: finished, .. } => outcome = finished,
                Transition::Rejected { message } => match self.phase() {
                    Phase::Idle => return Err(Error::Server(message)),
                    Phase::Playing if !self.has_rolled() => {
                        if rolls >= ROLL_ATTEMPTS {
                            return Err(Error::Server(message));
                        }
                        rolls += 1;
                        debug!(rolls, "Roll refused, retrying");
                        self.roll()?;
                    }
                    _ => {}
                },
                Transition::Reset => return Ok(outcome),
                Transition::Connected { .. }
                | Transition::Searching
                | Transition::Rolled { .. }
                | Transition::OpponentRolled => {}
            }
        }
    }

    fn has_rolled(&self) -> bool {
        self.game.current().is_some_and(|current| current.has_rolled())
    }

    pub fn phase(&self) -> Phase {
        self.game.phase()
    }

    /// Clear the stored session and drop the realtime connection.
    pub fn logout(self) -> Result<()> {
        auth::logout(&self.store)
    }
}
