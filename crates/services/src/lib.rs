#![forbid(unsafe_code)]

pub mod app_services;
pub mod error;
pub mod progress_service;
pub mod roadmap_service;
pub mod stats_service;
pub mod watch_service;

pub use roadmap_core::Clock;

pub use app_services::AppServices;
pub use error::{
    AppServicesError, ProgressError, RoadmapServiceError, StatsError, WatchServiceError,
};
pub use progress_service::{
    AutoAdvanceOutcome, FollowOutcome, FollowView, ProgressConfig, ProgressService, RoadmapView,
    UnfollowOutcome, Viewer, VisibilityPolicy,
};
pub use roadmap_service::{NewRoadmap, NewStep, RoadmapEdit, RoadmapService, VisibilityChange};
pub use stats_service::{DashboardEntry, LearnerStats, StatsService};
pub use watch_service::{WatchService, WatchUpdate};
