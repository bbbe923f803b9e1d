//! Error types for dialect_fuzz.
//!
//! All failures are represented by [`FuzzError`]. Errors are propagated via
//! `Result<T, FuzzError>` and surface at the driver, which decides whether a
//! session is abandoned, retried, or reported.
//!
//! # Error Classification
//!
//! Errors are classified into five categories:
//! - **Data**: malformed config rows, templates or feature names. Logged and skipped.
//! - **Sql**: a statement failed outside its expected-error set, or the connection broke.
//! - **Setup**: no table could be created. Aborts the session.
//! - **Oracle**: a confirmed logic bug. Always surfaced with its reproducer.
//! - **Internal**: I/O failures and bugs.
//!
//! # Skips
//!
//! A [`Skip`] is not an error: it tells the caller to abandon the current test
//! round (duplicate bug, inconclusive comparison, empty schema). Generation and
//! oracle calls return it through [`Outcome::Skipped`] so that it is handled
//! explicitly instead of unwinding.
//!
//! # Retry Policy
//!
//! [`RetryPolicy`] bounds table creation attempts and reconnect backoff.

use std::fmt;

use crate::oracle::BugReport;

/// Primary error type for the fuzzer.
#[derive(Debug, thiserror::Error)]
pub enum FuzzError {
    // ── Data errors: report, skip the row ───────────────────────────────
    /// An invalid argument was provided to an API function.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A feature name is not part of the static registry.
    #[error("unknown feature: {0}")]
    UnknownFeature(String),

    /// A fragment template could not be parsed or failed validation.
    #[error("malformed template: {0}")]
    MalformedTemplate(String),

    /// A row of a configuration file could not be interpreted.
    #[error("malformed config row: {0}")]
    MalformedConfigRow(String),

    /// The TOML configuration could not be parsed.
    #[error("config error: {0}")]
    Config(String),

    // ── SQL errors: propagate to the driver ─────────────────────────────
    /// A statement failed with an error outside its expected-error set.
    #[error("unexpected SQL error: {message} (statement: {sql})")]
    UnexpectedSql { sql: String, message: String },

    /// The connection to the target engine failed or was closed.
    #[error("connection error: {0}")]
    Connection(String),

    // ── Setup errors: abort the session ─────────────────────────────────
    /// The session could not build a usable schema.
    #[error("setup failed: {0}")]
    SetupFailed(String),

    // ── Oracle violations: the product ──────────────────────────────────
    /// Two queries that must agree returned different results.
    #[error("oracle violation ({}): {}", .0.oracle.as_str(), .0.message)]
    OracleViolation(Box<BugReport>),

    // ── Internal errors: should not happen ──────────────────────────────
    /// Filesystem or process I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An unexpected internal error. Indicates a bug.
    #[error("internal error: {0}")]
    InternalError(String),
}

impl FuzzError {
    /// Whether the driver may retry the session after this error.
    ///
    /// Only connection failures are retried; everything else either ends the
    /// round or is a finding.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FuzzError::Connection(_))
    }

    /// Whether this error ends the whole session rather than one statement.
    pub fn aborts_session(&self) -> bool {
        matches!(
            self,
            FuzzError::SetupFailed(_) | FuzzError::Connection(_) | FuzzError::OracleViolation(_)
        )
    }

    /// Classify the error for logging and statistics.
    pub fn kind(&self) -> FuzzErrorKind {
        match self {
            FuzzError::InvalidArgument(_)
            | FuzzError::UnknownFeature(_)
            | FuzzError::MalformedTemplate(_)
            | FuzzError::MalformedConfigRow(_)
            | FuzzError::Config(_) => FuzzErrorKind::Data,

            FuzzError::UnexpectedSql { .. } | FuzzError::Connection(_) => FuzzErrorKind::Sql,

            FuzzError::SetupFailed(_) => FuzzErrorKind::Setup,

            FuzzError::OracleViolation(_) => FuzzErrorKind::Oracle,

            FuzzError::Io(_) | FuzzError::InternalError(_) => FuzzErrorKind::Internal,
        }
    }
}

/// Classification of error kind for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuzzErrorKind {
    Data,
    Sql,
    Setup,
    Oracle,
    Internal,
}

impl fmt::Display for FuzzErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FuzzErrorKind::Data => write!(f, "DATA"),
            FuzzErrorKind::Sql => write!(f, "SQL"),
            FuzzErrorKind::Setup => write!(f, "SETUP"),
            FuzzErrorKind::Oracle => write!(f, "ORACLE"),
            FuzzErrorKind::Internal => write!(f, "INTERNAL"),
        }
    }
}

// ── Skip signal ────────────────────────────────────────────────────────────

/// Reason for abandoning the current test round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    /// The failure matches one already in the bug history.
    Duplicate,
    /// One side of an oracle comparison failed to execute.
    Inconclusive,
    /// The schema has no table to work with.
    EmptySchema,
    /// A generated statement rendered to nothing.
    EmptyStatement,
}

impl Skip {
    pub fn as_str(&self) -> &'static str {
        match self {
            Skip::Duplicate => "DUPLICATE",
            Skip::Inconclusive => "INCONCLUSIVE",
            Skip::EmptySchema => "EMPTY_SCHEMA",
            Skip::EmptyStatement => "EMPTY_STATEMENT",
        }
    }
}

impl fmt::Display for Skip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one generation or oracle attempt that did not error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Done(T),
    Skipped(Skip),
}

impl<T> Outcome<T> {
    pub fn is_skipped(&self) -> bool {
        matches!(self, Outcome::Skipped(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Done(v) => Outcome::Done(f(v)),
            Outcome::Skipped(s) => Outcome::Skipped(s),
        }
    }

    /// The value, if the attempt was not skipped.
    pub fn done(self) -> Option<T> {
        match self {
            Outcome::Done(v) => Some(v),
            Outcome::Skipped(_) => None,
        }
    }
}

// ── Retry Policy ───────────────────────────────────────────────────────────

/// Retry policy with exponential backoff.
///
/// Table creation uses it with zero delays as a plain attempt budget; the
/// driver uses the delays when reconnecting to a target that went away.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Base delay in milliseconds (doubled each attempt).
    pub base_delay_ms: u64,
    /// Maximum delay in milliseconds (cap for backoff).
    pub max_delay_ms: u64,
    /// Maximum number of attempts before giving up.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000, // 1 second initial
            max_delay_ms: 30_000, // 30 second cap
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Attempt budget without delays.
    pub fn attempts_only(max_attempts: u32) -> Self {
        Self {
            base_delay_ms: 0,
            max_delay_ms: 0,
            max_attempts,
        }
    }

    /// Calculate the backoff delay in milliseconds for the given attempt number (0-based).
    ///
    /// Uses exponential backoff: `base_delay * 2^attempt`, capped at `max_delay`.
    /// Adds simple jitter by varying ±25%.
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        let delay = self.base_delay_ms.saturating_mul(1u64 << attempt.min(16));
        let capped = delay.min(self.max_delay_ms);

        if attempt.is_multiple_of(2) {
            capped.saturating_mul(3) / 4
        } else {
            capped.saturating_mul(5) / 4
        }
    }

    /// Whether the given attempt (0-based) is within the retry limit.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Tracks consecutive failures against a [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    /// Number of consecutive failures.
    pub attempts: u32,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure. Returns `true` if another attempt is allowed.
    pub fn record_failure(&mut self, policy: &RetryPolicy) -> bool {
        self.attempts += 1;
        policy.should_retry(self.attempts)
    }

    /// Reset after a success.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert_eq!(
            FuzzError::MalformedTemplate("x".into()).kind(),
            FuzzErrorKind::Data
        );
        assert_eq!(
            FuzzError::UnexpectedSql {
                sql: "SELECT 1".into(),
                message: "boom".into()
            }
            .kind(),
            FuzzErrorKind::Sql
        );
        assert_eq!(
            FuzzError::SetupFailed("x".into()).kind(),
            FuzzErrorKind::Setup
        );
        assert_eq!(
            FuzzError::InternalError("x".into()).kind(),
            FuzzErrorKind::Internal
        );
    }

    #[test]
    fn test_retryable_errors() {
        assert!(FuzzError::Connection("reset".into()).is_retryable());
        assert!(!FuzzError::SetupFailed("x".into()).is_retryable());
        assert!(!FuzzError::UnknownFeature("x".into()).is_retryable());
    }

    #[test]
    fn test_aborts_session() {
        assert!(FuzzError::SetupFailed("x".into()).aborts_session());
        assert!(FuzzError::Connection("x".into()).aborts_session());
        assert!(
            !FuzzError::UnexpectedSql {
                sql: String::new(),
                message: String::new()
            }
            .aborts_session()
        );
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(FuzzErrorKind::Oracle.to_string(), "ORACLE");
        assert_eq!(FuzzErrorKind::Data.to_string(), "DATA");
    }

    #[test]
    fn test_skip_as_str() {
        assert_eq!(Skip::Duplicate.as_str(), "DUPLICATE");
        assert_eq!(Skip::Inconclusive.to_string(), "INCONCLUSIVE");
    }

    #[test]
    fn test_outcome_map_and_done() {
        let done: Outcome<i32> = Outcome::Done(2);
        assert_eq!(done.clone().map(|v| v * 2), Outcome::Done(4));
        assert_eq!(done.done(), Some(2));

        let skipped: Outcome<i32> = Outcome::Skipped(Skip::EmptySchema);
        assert!(skipped.is_skipped());
        assert_eq!(skipped.done(), None);
    }

    #[test]
    fn test_retry_policy_backoff() {
        let policy = RetryPolicy {
            base_delay_ms: 1000,
            max_delay_ms: 10_000,
            max_attempts: 5,
        };

        // Attempt 0: 1000 * 2^0 = 1000, -25% = 750
        assert_eq!(policy.backoff_ms(0), 750);
        // Attempt 1: 2000, +25% = 2500
        assert_eq!(policy.backoff_ms(1), 2500);
        // Attempt 4: 16000 capped at 10000, -25% = 7500
        assert_eq!(policy.backoff_ms(4), 7500);
    }

    #[test]
    fn test_attempts_only_policy_has_no_delay() {
        let policy = RetryPolicy::attempts_only(3);
        assert_eq!(policy.backoff_ms(0), 0);
        assert_eq!(policy.backoff_ms(7), 0);
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn test_retry_state_exhaustion() {
        let policy = RetryPolicy::attempts_only(2);
        let mut state = RetryState::new();

        assert!(state.record_failure(&policy));
        assert!(!state.record_failure(&policy));
        assert_eq!(state.attempts, 2);

        state.reset();
        assert_eq!(state.attempts, 0);
    }
}
