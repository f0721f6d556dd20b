use serde::{Serialize, Serializer};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PosError>;

#[derive(Debug, Error)]
pub enum PosError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("cannot move {entity} from '{from}' to '{to}'")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("permission denied: {0}")]
    Forbidden(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("pin hashing failed: {0}")]
    Hash(#[from] bcrypt::BcryptError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("state lock poisoned")]
    Lock,
}

impl PosError {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        PosError::NotFound(what.to_string())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        PosError::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        PosError::Conflict(msg.into())
    }
}

impl<T> From<std::sync::PoisonError<T>> for PosError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        PosError::Lock
    }
}

// Tauri hands command errors to the webview as JSON; the UI only shows the message.
impl Serialize for PosError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Map `QueryReturnedNoRows` to a typed not-found error, pass everything else through.
pub(crate) trait OptionalRow<T> {
    fn or_not_found(self, what: impl std::fmt::Display) -> Result<T>;
}

impl<T> OptionalRow<T> for std::result::Result<T, rusqlite::Error> {
    fn or_not_found(self, what: impl std::fmt::Display) -> Result<T> {
        match self {
            Ok(v) => Ok(v),
            Err(rusqlite::Error::QueryReturnedNoRows) => Err(PosError::not_found(what)),
            Err(e) => Err(PosError::Database(e)),
        }
    }
}
