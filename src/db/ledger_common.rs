use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;
use uuid::Uuid;

/// Coarse classification used by callers to map errors onto responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input. Surfaced verbatim, never retried.
    Validation,
    /// State conflict: already banned, not frozen, unknown card or code.
    Conflict,
    /// Expected refusal such as an empty wallet or an exhausted daily cap.
    Business,
    /// Transaction or commit failure. Nothing was written; safe to retry.
    Storage,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid activation code")]
    InvalidCode,

    #[error("activation code expired")]
    CodeExpired,

    #[error("service plan is not active")]
    InactivePlan,

    #[error("insufficient balance: {available} available, {requested} requested")]
    InsufficientBalance { available: i64, requested: i64 },

    #[error("daily limit exceeded: {remaining} of {limit} points left today, {requested} requested")]
    DailyLimitExceeded {
        limit: i64,
        used_today: i64,
        remaining: i64,
        requested: i64,
    },

    #[error("card {0} is already banned")]
    AlreadyBanned(String),

    #[error("card {0} is not frozen")]
    NotFrozen(String),

    #[error("card {0} not found")]
    CardNotFound(String),

    #[error("wallet is not active")]
    WalletInactive,

    #[error("already checked in today")]
    AlreadyCheckedIn,

    #[error("wallet invariant violated: {0}")]
    Invariant(String),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("snapshot encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::Validation(_) => ErrorKind::Validation,
            LedgerError::InvalidCode
            | LedgerError::CodeExpired
            | LedgerError::InactivePlan
            | LedgerError::AlreadyBanned(_)
            | LedgerError::NotFrozen(_)
            | LedgerError::CardNotFound(_)
            | LedgerError::WalletInactive
            | LedgerError::AlreadyCheckedIn => ErrorKind::Conflict,
            LedgerError::InsufficientBalance { .. } | LedgerError::DailyLimitExceeded { .. } => {
                ErrorKind::Business
            }
            LedgerError::Invariant(_)
            | LedgerError::Db(_)
            | LedgerError::Json(_)
            | LedgerError::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Only storage failures are worth retrying; the transaction left no trace.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Storage
    }
}

static CODE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{5,63}$").expect("valid code pattern"));

/// Activation code: PL-{4}-{4}-{4} uppercase hex chars
pub fn generate_activation_code() -> String {
    let hex = Uuid::new_v4().simple().to_string().to_uppercase();
    format!("PL-{}-{}-{}", &hex[..4], &hex[4..8], &hex[8..12])
}

/// Trims and checks the shape of a user-supplied code.
pub fn normalize_code(code: &str) -> Result<&str, LedgerError> {
    let code = code.trim();
    if code.is_empty() {
        return Err(LedgerError::Validation("activation code is empty".into()));
    }
    if !CODE_PATTERN.is_match(code) {
        return Err(LedgerError::Validation(format!(
            "activation code {code:?} is malformed"
        )));
    }
    Ok(code)
}

pub fn require_positive(field: &str, value: i64) -> Result<(), LedgerError> {
    if value <= 0 {
        return Err(LedgerError::Validation(format!(
            "{field} must be positive, got {value}"
        )));
    }
    Ok(())
}
