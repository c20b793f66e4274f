//! Wire types shared by the Kumasi dice client and its local backend.
//!
//! The HTTP API speaks JSON with camelCase field names ([api]). The realtime
//! channel carries `{"event": NAME, "data": {...}}` text frames ([realtime]).

pub mod api;
mod constants;
pub mod realtime;
mod user;

pub use constants::*;
pub use user::*;
