use thiserror::Error;

use crate::domain::{PositionStatus, StrategyKind};

/// Configuration-related errors with structured variants.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),
}

/// Position store errors.
///
/// `Conflict` is the normal outcome of a lost transition race: another
/// task already owns the position. Callers treat it as "skip", not as a fault.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("position not found: {id}")]
    NotFound { id: String },

    #[error("transition conflict on {id}: expected {expected}, found {actual}")]
    Conflict {
        id: String,
        expected: PositionStatus,
        actual: PositionStatus,
    },

    #[error("position {id} is terminal ({status}), mutation rejected")]
    Terminal { id: String, status: PositionStatus },

    #[error("duplicate active exposure for {strategy} on {instrument}")]
    DuplicateExposure {
        strategy: StrategyKind,
        instrument: String,
    },

    #[error("journal write failed: {0}")]
    Journal(#[source] std::io::Error),

    #[error("journal is corrupt: {0}")]
    CorruptJournal(String),
}

impl StoreError {
    /// True if this error is a lost transition race rather than a fault.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Risk sizing rejections.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RiskError {
    #[error("edge below strategy minimum: {edge} < {minimum}")]
    EdgeBelowMinimum {
        edge: rust_decimal::Decimal,
        minimum: rust_decimal::Decimal,
    },

    #[error("category exposure would exceed cap: {current} + {additional} > {cap}")]
    CategoryExposureExceeded {
        current: rust_decimal::Decimal,
        additional: rust_decimal::Decimal,
        cap: rust_decimal::Decimal,
    },

    #[error("Kelly fraction is not positive for this opportunity")]
    NonPositiveKelly,
}

/// Level-2 estimation errors.
#[derive(Error, Debug)]
pub enum EstimationError {
    #[error("estimation timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("estimation response was malformed: {0}")]
    MalformedResponse(String),

    #[error("no estimator configured")]
    Unavailable,
}

/// Execution gateway errors.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("close submission failed: {0}")]
    SubmitFailed(String),

    #[error("close submission timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("close retries exhausted after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Risk(#[from] RiskError),

    #[error(transparent)]
    Estimation(#[from] EstimationError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection error: {0}")]
    Connection(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::WebSocket(Box::new(err))
    }
}

impl Error {
    /// True if this error wraps a benign lost transition race.
    #[must_use]
    pub fn is_transition_conflict(&self) -> bool {
        matches!(self, Error::Store(e) if e.is_conflict())
    }
}
