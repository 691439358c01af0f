//! Tile cache error types.

use coatcheck_core::{AppError, DatabaseError, MapError};
use thiserror::Error;

/// Why a network fetch of a tile did not produce bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    /// The server answered with a non-success status.
    Status(u16),
    /// The request never produced a response (DNS, connect, body read).
    Transport(String),
}

impl std::fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchFailure::Status(status) => write!(f, "HTTP {}", status),
            FetchFailure::Transport(msg) => write!(f, "transport error: {}", msg),
        }
    }
}

impl From<reqwest::Error> for FetchFailure {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => FetchFailure::Status(status.as_u16()),
            None => FetchFailure::Transport(e.to_string()),
        }
    }
}

#[derive(Error, Debug)]
pub enum TileError {
    /// A cache tier could not be opened or reached.
    #[error("Tile cache unavailable: {0}")]
    CacheUnavailable(String),

    /// The persistent store's database could not be opened or prepared.
    #[error("Tile store unavailable: {0}")]
    StoreUnavailable(#[from] DatabaseError),

    #[error("Tile cache read failed: {0}")]
    CacheRead(String),

    #[error("Tile cache write failed: {0}")]
    CacheWrite(String),

    /// Budget enforcement could not complete.
    #[error("Tile eviction failed: {0}")]
    Eviction(String),

    /// The only error that reaches callers of the fetcher.
    #[error("Tile fetch failed: {0}")]
    FetchFailed(FetchFailure),
}

/// Result type for tile cache operations.
pub type TileResult<T> = Result<T, TileError>;

impl TileError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::CacheUnavailable(message.into())
    }

    pub fn read(message: impl Into<String>) -> Self {
        Self::CacheRead(message.into())
    }

    pub fn write(message: impl Into<String>) -> Self {
        Self::CacheWrite(message.into())
    }

    /// True for failures that must be absorbed as a miss or a no-op.
    pub fn is_cache_error(&self) -> bool {
        !matches!(self, Self::FetchFailed(_))
    }

    /// HTTP status of a failed fetch, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::FetchFailed(FetchFailure::Status(status)) => Some(*status),
            _ => None,
        }
    }

    /// User-friendly error message for UI display.
    pub fn user_message(&self) -> &'static str {
        MapError::from(self).user_message()
    }
}

impl From<&TileError> for MapError {
    fn from(e: &TileError) -> Self {
        match e {
            TileError::CacheUnavailable(msg) => MapError::CacheUnavailable(msg.clone()),
            TileError::StoreUnavailable(e) => MapError::CacheUnavailable(e.to_string()),
            TileError::CacheRead(msg) | TileError::CacheWrite(msg) | TileError::Eviction(msg) => {
                MapError::CacheFailure(msg.clone())
            }
            TileError::FetchFailed(FetchFailure::Status(status)) => MapError::TileStatus(*status),
            TileError::FetchFailed(FetchFailure::Transport(msg)) => {
                MapError::TileTransport(msg.clone())
            }
        }
    }
}

impl From<TileError> for AppError {
    fn from(e: TileError) -> Self {
        match e {
            TileError::StoreUnavailable(e) => AppError::Database(e),
            other => AppError::Map(MapError::from(&other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_fetch_failures_are_surfaced() {
        assert!(TileError::unavailable("closed").is_cache_error());
        assert!(TileError::read("locked").is_cache_error());
        assert!(TileError::write("quota").is_cache_error());
        assert!(TileError::Eviction("gone".into()).is_cache_error());
        assert!(!TileError::FetchFailed(FetchFailure::Status(404)).is_cache_error());
    }

    #[test]
    fn test_status_accessor() {
        assert_eq!(TileError::FetchFailed(FetchFailure::Status(404)).status(), Some(404));
        assert_eq!(
            TileError::FetchFailed(FetchFailure::Transport("dns".into())).status(),
            None
        );
        assert_eq!(TileError::read("x").status(), None);
    }

    #[test]
    fn test_app_error_mapping() {
        let app: AppError = TileError::FetchFailed(FetchFailure::Status(404)).into();
        assert!(matches!(app, AppError::Map(MapError::TileStatus(404))));

        let app: AppError = TileError::write("disk full").into();
        assert!(matches!(app, AppError::Map(MapError::CacheFailure(_))));

        let store = TileError::StoreUnavailable(DatabaseError::ConnectionFailed("locked".into()));
        assert!(store.is_cache_error());
        assert_eq!(store.user_message(), "Offline map storage is unavailable.");
        let app: AppError = store.into();
        assert!(matches!(app, AppError::Database(DatabaseError::ConnectionFailed(_))));
    }

    #[test]
    fn test_user_message() {
        let err = TileError::FetchFailed(FetchFailure::Transport("offline".into()));
        assert!(err.user_message().contains("offline"));
    }

    #[test]
    fn test_fetch_failure_display() {
        assert_eq!(FetchFailure::Status(404).to_string(), "HTTP 404");
        assert!(FetchFailure::Transport("reset".into()).to_string().contains("reset"));
    }
}
