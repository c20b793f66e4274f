use serde::{Deserialize, Deserializer, Serialize};

/// Profile of an authenticated player as returned by the backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(alias = "_id", deserialize_with = "deserialize_id")]
    pub id: String,
    pub username: String,
    pub phone: String,
    /// Whole GHS.
    #[serde(default)]
    pub balance: u64,
}

impl User {
    /// Returns a copy of this profile carrying a different balance.
    pub fn with_balance(&self, balance: u64) -> Self {
        Self {
            balance,
            ..self.clone()
        }
    }
}

/// An authenticated session: the profile plus the token sent in `Authorization`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub user: User,
}

impl Session {
    pub fn new(token: impl Into<String>, user: User) -> Self {
        Self {
            token: token.into(),
            user,
        }
    }

    pub fn balance(&self) -> u64 {
        self.user.balance
    }
}

// Backends disagree on whether identifiers are numbers or strings.
fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(u64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(id) => id,
        RawId::Number(id) => id.to_string(),
    })
}
