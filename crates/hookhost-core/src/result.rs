//! Convenience result type alias for HookHost.

use crate::error::AppError;

/// A specialized `Result` type for HookHost operations.
pub type AppResult<T> = Result<T, AppError>;
