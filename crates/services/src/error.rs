//! Shared error types for the services crate.

use thiserror::Error;

use roadmap_core::model::{RoadmapError, StepError, WatchError};
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

/// Errors emitted by `ProgressService`.
///
/// "Already following" and "not following on unfollow" are reported as
/// outcomes, not errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProgressError {
    #[error("roadmap not found")]
    NotFound,
    #[error("not following this roadmap")]
    NotFollowing,
    #[error("permission denied")]
    PermissionDenied,
    #[error("cursor update lost the race {attempts} times")]
    Conflict { attempts: u32 },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `RoadmapService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RoadmapServiceError {
    #[error("roadmap or step not found")]
    NotFound,
    #[error("only the owner may change this roadmap")]
    PermissionDenied,
    #[error("a step with order {order} already exists")]
    DuplicateOrder { order: u32 },
    #[error(transparent)]
    Roadmap(#[from] RoadmapError),
    #[error(transparent)]
    Step(#[from] StepError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `WatchService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WatchServiceError {
    #[error("invalid progress: {0}")]
    InvalidProgress(#[from] WatchError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `StatsService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StatsError {
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted while bootstrapping app services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
