//! Login, registration and logout.

use crate::{Client, Error, Result, SessionStore};
use kumasi_types::{
    api::{LoginRequest, RegisterRequest, RegisterResponse},
    Session,
};
use tracing::info;

fn require(field: &'static str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::MissingField(field));
    }
    Ok(())
}

/// Log in and persist the returned session.
pub async fn login(
    client: &Client,
    store: &SessionStore,
    phone: &str,
    password: &str,
) -> Result<Session> {
    require("phone", phone)?;
    require("password", password)?;

    let response = client
        .login(&LoginRequest {
            phone: phone.trim().to_string(),
            password: password.to_string(),
        })
        .await?;
    let session = Session::new(response.token, response.user);
    store.save(&session)?;
    info!(user = %session.user.username, "Logged in");
    Ok(session)
}

/// Create an account. The player still has to log in afterwards.
pub async fn register(
    client: &Client,
    username: &str,
    phone: &str,
    password: &str,
) -> Result<RegisterResponse> {
    require("username", username)?;
    require("phone", phone)?;
    require("password", password)?;

    let response = client
        .register(&RegisterRequest {
            username: username.trim().to_string(),
            phone: phone.trim().to_string(),
            password: password.to_string(),
        })
        .await?;
    info!(%username, "Registered");
    Ok(response)
}

/// Forget the persisted session.
pub fn logout(store: &SessionStore) -> Result<()> {
    store.clear()?;
    info!("Logged out");
    Ok(())
}
