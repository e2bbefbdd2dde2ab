//! Error types for the platecheck core library.

/// Top-level error enum for the platecheck core library.
///
/// Problems with individual shots, plates or files are not errors: they are
/// recorded as faults (see [`crate::models::FaultLog`]) and the run carries on.
/// These variants cover configuration, bootstrap and collaborator failures.
#[derive(Debug, thiserror::Error)]
pub enum PlatecheckError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type PlatecheckResult<T> = Result<T, PlatecheckError>;

/// Failure of a publish registration against the asset database.
///
/// Only [`PublishError::ConnectionReset`] is transient; everything else is
/// attempted once.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PublishError {
    #[error("connection reset: {0}")]
    ConnectionReset(String),

    #[error("publish rejected: {0}")]
    Rejected(String),

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

impl PublishError {
    pub fn is_transient(&self) -> bool {
        matches!(self, PublishError::ConnectionReset(_))
    }
}

impl From<PlatecheckError> for PublishError {
    fn from(err: PlatecheckError) -> Self {
        PublishError::Rejected(err.to_string())
    }
}
