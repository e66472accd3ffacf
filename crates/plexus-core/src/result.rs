//! Convenience result type alias for Plexus.

use crate::error::AppError;

/// A specialized `Result` type for runtime operations.
///
/// Every crate in the workspace returns `AppResult<T>` at its public
/// boundary instead of spelling out `Result<T, AppError>`.
pub type AppResult<T> = Result<T, AppError>;
