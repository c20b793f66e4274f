/// Stake wagered per match (GHS)
pub const DEFAULT_STAKE: u64 = 10;

/// Amount credited by the one-tap deposit (GHS)
pub const DEFAULT_DEPOSIT: u64 = 50;

/// Number of faces on the die
pub const DICE_FACES: u8 = 6;

/// Game type sent with every matchmaking request
pub const GAME_TYPE_DICE: &str = "DICE";

/// Delay between a finished match and the return to the lobby (milliseconds)
pub const RESET_DELAY_MS: u64 = 3_000;

/// A win pays back this multiple of the stake
pub const WIN_PAYOUT_MULTIPLIER: u64 = 2;

/// Message shown when the transport fails during login or registration
pub const SERVER_ERROR: &str = "Server Error";

/// Message shown when the transport fails during a balance action
pub const CONNECTION_ERROR: &str = "Connection Error";

/// Message shown when a match is requested without enough balance
pub const INSUFFICIENT_FUNDS: &str = "Insufficient Funds! Please Deposit.";
