use std::sync::Arc;

use storage::repository::Storage;

use crate::Clock;
use crate::error::AppServicesError;
use crate::progress_service::{ProgressConfig, ProgressService};
use crate::roadmap_service::RoadmapService;
use crate::stats_service::StatsService;
use crate::watch_service::WatchService;

/// Assembles the app-facing services over one storage backend.
#[derive(Clone)]
pub struct AppServices {
    progress: Arc<ProgressService>,
    roadmaps: Arc<RoadmapService>,
    watch: Arc<WatchService>,
    stats: Arc<StatsService>,
}

impl AppServices {
    /// Build services backed by `SQLite` storage.
    ///
    /// # Errors
    ///
    /// Returns `AppServicesError` if storage initialization fails.
    pub async fn new_sqlite(
        db_url: &str,
        clock: Clock,
        config: ProgressConfig,
    ) -> Result<Self, AppServicesError> {
        let storage = Storage::sqlite(db_url).await?;
        Ok(Self::from_storage(&storage, clock, config))
    }

    #[must_use]
    pub fn in_memory(clock: Clock, config: ProgressConfig) -> Self {
        Self::from_storage(&Storage::in_memory(), clock, config)
    }

    #[must_use]
    pub fn from_storage(storage: &Storage, clock: Clock, config: ProgressConfig) -> Self {
        let progress = Arc::new(ProgressService::from_storage(clock, config, storage));
        let roadmaps = Arc::new(RoadmapService::new(
            clock,
            config.visibility_policy,
            Arc::clone(&storage.roadmaps),
            Arc::clone(&storage.steps),
        ));
        let watch = Arc::new(WatchService::new(clock, Arc::clone(&storage.watch)));
        let stats = Arc::new(StatsService::new(storage));

        Self {
            progress,
            roadmaps,
            watch,
            stats,
        }
    }

    #[must_use]
    pub fn progress(&self) -> Arc<ProgressService> {
        Arc::clone(&self.progress)
    }

    #[must_use]
    pub fn roadmaps(&self) -> Arc<RoadmapService> {
        Arc::clone(&self.roadmaps)
    }

    #[must_use]
    pub fn watch(&self) -> Arc<WatchService> {
        Arc::clone(&self.watch)
    }

    #[must_use]
    pub fn stats(&self) -> Arc<StatsService> {
        Arc::clone(&self.stats)
    }
}
