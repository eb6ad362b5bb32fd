//! Convenience result type alias for Beacon.

use crate::error::AppError;

/// A specialized `Result` type for Beacon operations.
pub type AppResult<T> = Result<T, AppError>;
