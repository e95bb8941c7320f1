//! Error types for the scheduler and cell engine
//!
//! ## Table of Contents
//! - **SwiftError**: Main error enum covering all failure modes
//! - **Result**: Type alias for `Result<T, SwiftError>`

use thiserror::Error;

/// Result type alias for scheduler/engine operations
pub type Result<T> = std::result::Result<T, SwiftError>;

/// Main error type for the cell engine and task scheduler
#[derive(Error, Debug)]
pub enum SwiftError {
    /// Bad or contradictory parameter file / CLI input
    #[error("configuration error: {0}")]
    Config(String),

    /// Cross-rank transport failure (proxy exchange, repartition broadcast)
    #[error("mpi/network error: {0}")]
    Mpi(String),

    /// Restart or snapshot persistence failure
    #[error("storage error: {0}")]
    Storage(String),

    /// Graph-partition / repartition failure
    #[error("partition error: {0}")]
    Partition(String),

    /// Task graph construction or scheduling failure (cycle, unsatisfiable
    /// dependency, unknown task type)
    #[error("task error: {0}")]
    Task(String),

    /// A checked invariant did not hold (cell linkage, duplicate unlock,
    /// particle outside its cell). Promoted to fatal in release builds;
    /// panics in debug builds via [`swift_assert`].
    #[error("invariant violation: {0}")]
    Invariant(String),

    /// Metrics registration/encoding failure
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Generic IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error (should not occur in normal operation)
    #[error("internal error: {0}")]
    Internal(String),
}

impl SwiftError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an mpi/network error
    pub fn mpi(msg: impl Into<String>) -> Self {
        Self::Mpi(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a partition error
    pub fn partition(msg: impl Into<String>) -> Self {
        Self::Partition(msg.into())
    }

    /// Create a task error
    pub fn task(msg: impl Into<String>) -> Self {
        Self::Task(msg.into())
    }

    /// Create an invariant-violation error
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::Invariant(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a metrics error
    pub fn metrics(msg: impl Into<String>) -> Self {
        Self::Internal(format!("metrics: {}", msg.into()))
    }
}

/// Panics in debug builds, returns `Err(SwiftError::Invariant)` in release.
///
/// Debug builds treat a broken invariant as a programmer error worth a
/// backtrace; release builds turn it into a normal `Result` so a caller
/// gets the chance to flush a restart file before the process exits.
#[macro_export]
macro_rules! swift_assert {
    ($cond:expr, $($arg:tt)*) => {
        if cfg!(debug_assertions) {
            assert!($cond, $($arg)*);
        } else if !($cond) {
            return Err($crate::error::SwiftError::invariant(format!($($arg)*)));
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_wrap_message() {
        let e = SwiftError::config("missing TimeIntegration:dt_min");
        assert!(e.to_string().contains("missing TimeIntegration"));
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "nope");
        let e: SwiftError = io.into();
        assert!(matches!(e, SwiftError::Io(_)));
    }

    #[test]
    fn serialization_error_converts() {
        let bad: std::result::Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let e: SwiftError = bad.unwrap_err().into();
        assert!(matches!(e, SwiftError::Serialization(_)));
    }
}
