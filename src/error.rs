use thiserror::Error;

/// Main error type for the pocket engine
#[derive(Error, Debug)]
pub enum PocketError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Domain errors
    #[error("Pocket not found: {0}")]
    PocketNotFound(String),

    #[error("Client {client_id} holds no entry for pocket {pocket_id}")]
    HoldingNotFound {
        client_id: String,
        pocket_id: String,
    },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Requested lot size {requested} exceeds held lot size {held}")]
    LotSizeExceeded { requested: i64, held: i64 },

    // Broker errors
    #[error("Broker call failed: {0}")]
    Upstream(String),

    #[error("Broker rejected order for {trading_symbol}: {reason}")]
    BrokerRejected {
        trading_symbol: String,
        reason: String,
    },

    // Persistence errors
    #[error("Ledger revision conflict for client {0}")]
    LedgerConflict(String),

    #[error("Orders executed at broker but not persisted: {detail}")]
    ExecutedButNotPersisted { detail: String },

    // Authentication errors
    #[error("Authentication error: {0}")]
    Auth(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl PocketError {
    /// HTTP-equivalent status hint for the out-of-scope API layer.
    ///
    /// NotFound-class errors map to 404, validation to 400, ledger revision
    /// conflicts to 409, broker failures to 502, everything else to 500.
    pub fn status_hint(&self) -> u16 {
        match self {
            PocketError::PocketNotFound(_) | PocketError::HoldingNotFound { .. } => 404,
            PocketError::Validation(_) | PocketError::LotSizeExceeded { .. } => 400,
            PocketError::LedgerConflict(_) => 409,
            PocketError::Upstream(_) | PocketError::BrokerRejected { .. } => 502,
            _ => 500,
        }
    }

}

/// Result type alias for PocketError
pub type Result<T> = std::result::Result<T, PocketError>;
