//! Error types for the execution core.
//!
//! A three-way error classification: fatal invariant violations,
//! recoverable conditions surfaced to the executor stack, and user errors (out of
//! scope for this core, but the variant exists so callers can classify consistently).

use std::fmt;
use std::io;

/// How a [`CoreError`] should be handled by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Invariant violation inside the engine. The process should be terminated via
    /// the top end's crash callback; there is no recovery path.
    Fatal,
    /// Out-of-budget condition, failed top-end I/O, or a tuple that doesn't fit.
    /// Propagated up through the executor stack; the caller retries or aborts.
    Recoverable,
    /// Constraint violation or similar user-facing condition. Not produced by this
    /// core directly, but kept so callers built on top of it can reuse the type.
    User,
}

/// Unified error type for the execution core.
#[derive(Debug)]
pub enum CoreError {
    /// I/O failure talking to the top end or the local filesystem.
    Io(io::Error),
    /// An engine invariant was violated (truncating past committed USO, releasing a
    /// pinned block, a token arriving out of order, ...). Always [`Severity::Fatal`].
    Invariant(String),
    /// A row, quantum, or block exceeded a configured capacity.
    CapacityExceeded(String),
    /// The top end reported a failed operation (store/load/release/push).
    TopEnd(String),
    /// A handle (block id, undo token, pool slice) did not resolve to live state.
    NotFound(String),
    /// Serialization failure (bincode/serde_json).
    Serialization(String),
}

impl CoreError {
    pub fn invariant<S: Into<String>>(msg: S) -> Self {
        CoreError::Invariant(msg.into())
    }

    pub fn capacity<S: Into<String>>(msg: S) -> Self {
        CoreError::CapacityExceeded(msg.into())
    }

    pub fn top_end<S: Into<String>>(msg: S) -> Self {
        CoreError::TopEnd(msg.into())
    }

    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        CoreError::NotFound(msg.into())
    }

    /// Classify this error by severity.
    pub fn severity(&self) -> Severity {
        match self {
            CoreError::Invariant(_) => Severity::Fatal,
            CoreError::Io(_) => Severity::Recoverable,
            CoreError::CapacityExceeded(_) => Severity::Recoverable,
            CoreError::TopEnd(_) => Severity::Recoverable,
            CoreError::NotFound(_) => Severity::Recoverable,
            CoreError::Serialization(_) => Severity::Recoverable,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::Io(e) => write!(f, "{}", e),
            CoreError::Invariant(msg) => write!(f, "invariant violation: {}", msg),
            CoreError::CapacityExceeded(msg) => write!(f, "capacity exceeded: {}", msg),
            CoreError::TopEnd(msg) => write!(f, "top end failure: {}", msg),
            CoreError::NotFound(msg) => write!(f, "not found: {}", msg),
            CoreError::Serialization(msg) => write!(f, "serialization error: {}", msg),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<io::Error> for CoreError {
    fn from(e: io::Error) -> Self {
        CoreError::Io(e)
    }
}

impl From<bincode::Error> for CoreError {
    fn from(e: bincode::Error) -> Self {
        CoreError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Serialization(e.to_string())
    }
}

/// Result type alias for the execution core.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Raises a fatal invariant violation: logs at `error!` and returns the
/// corresponding `Err`, mirroring `throwFatalException` (the
/// top end's crash callback is invoked by the caller that sees this error
/// classified as [`Severity::Fatal`]; this core never calls `process::exit`
/// itself since the crash callback belongs to the host, not the core).
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)*) => {{
        let msg = format!($($arg)*);
        log::error!("fatal invariant violation: {}", msg);
        return Err($crate::error::CoreError::invariant(msg));
    }};
}
