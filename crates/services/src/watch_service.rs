use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use roadmap_core::model::{UserId, VideoId, WatchRecord, WatchSample};
use roadmap_core::time::format_watch_time;
use storage::repository::WatchRecordRepository;

use crate::Clock;
use crate::error::WatchServiceError;

/// Result of a player heartbeat.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WatchUpdate {
    pub record: WatchRecord,
    /// `false` when the sample was too small a step to be worth a write.
    pub persisted: bool,
    pub completed: bool,
    pub watched_time: String,
}

impl WatchUpdate {
    fn new(record: WatchRecord, persisted: bool) -> Self {
        Self {
            completed: record.is_complete(),
            watched_time: format_watch_time(record.watched_seconds),
            record,
            persisted,
        }
    }
}

/// Write path of the progress store: folds player samples into watch records.
#[derive(Clone)]
pub struct WatchService {
    clock: Clock,
    records: Arc<dyn WatchRecordRepository>,
}

impl WatchService {
    #[must_use]
    pub fn new(clock: Clock, records: Arc<dyn WatchRecordRepository>) -> Self {
        Self { clock, records }
    }

    /// Record how far `user` got in `video`.
    ///
    /// Stored values never decrease. Small forward steps on an existing
    /// record are acknowledged without a write.
    ///
    /// # Errors
    ///
    /// Returns `WatchServiceError::InvalidProgress` for negative, non-finite or
    /// out-of-range input, `WatchServiceError::Storage` if persistence fails.
    pub async fn record_watch(
        &self,
        user: UserId,
        video: VideoId,
        watched_seconds: f64,
        watched_percentage: f64,
    ) -> Result<WatchUpdate, WatchServiceError> {
        let sample = WatchSample::new(watched_seconds, watched_percentage)?;
        let now = self.clock.now();

        let record = match self.records.get_watch_record(user, video).await? {
            None => WatchRecord::first(user, video, sample, now),
            Some(existing) if existing.is_significant(&sample) => existing.merged(&sample, now),
            Some(existing) => {
                debug!(user_id = %user, video_id = %video, "watch sample below threshold");
                return Ok(WatchUpdate::new(existing, false));
            }
        };

        self.records.upsert_watch_record(&record).await?;
        debug!(
            user_id = %user,
            video_id = %video,
            percentage = record.watched_percentage,
            "recorded watch progress"
        );
        Ok(WatchUpdate::new(record, true))
    }

    /// Total watched seconds of `user` over every video.
    ///
    /// # Errors
    ///
    /// Returns `WatchServiceError::Storage` if repository access fails.
    pub async fn total_watched_seconds(&self, user: UserId) -> Result<f64, WatchServiceError> {
        Ok(self.records.total_watched_seconds(user).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Duration;
    use roadmap_core::time::fixed_now;
    use storage::repository::InMemoryRepository;

    fn service(repo: &InMemoryRepository, clock: Clock) -> WatchService {
        WatchService::new(clock, Arc::new(repo.clone()))
    }

    #[tokio::test]
    async fn first_sample_is_always_persisted() {
        let repo = InMemoryRepository::new();
        let svc = service(&repo, Clock::fixed(fixed_now()));
        let update = svc
            .record_watch(UserId::new(1), VideoId::new(1), 3.0, 1.0)
            .await
            .unwrap();
        assert!(update.persisted);
        assert!(!update.completed);
        assert_eq!(update.watched_time, "0:03");
    }

    #[tokio::test]
    async fn small_steps_are_throttled_and_values_never_drop() {
        let repo = InMemoryRepository::new();
        let mut clock = Clock::fixed(fixed_now());
        let user = UserId::new(1);
        let video = VideoId::new(7);

        service(&repo, clock)
            .record_watch(user, video, 100.0, 40.0)
            .await
            .unwrap();

        clock.advance(Duration::seconds(5));
        let svc = service(&repo, clock);
        let update = svc.record_watch(user, video, 104.0, 42.0).await.unwrap();
        assert!(!update.persisted);
        assert_eq!(update.record.watched_seconds, 100.0);
        assert_eq!(update.record.last_watched_at, fixed_now());

        // Rewinding below the stored position keeps the stored maximum.
        let update = svc.record_watch(user, video, 20.0, 96.0).await.unwrap();
        assert!(update.persisted);
        assert!(update.completed);
        assert_eq!(update.record.watched_seconds, 100.0);
        assert_eq!(update.record.watched_percentage, 96.0);
    }

    #[tokio::test]
    async fn invalid_input_is_rejected_without_a_write() {
        let repo = InMemoryRepository::new();
        let svc = service(&repo, Clock::fixed(fixed_now()));
        let err = svc
            .record_watch(UserId::new(1), VideoId::new(1), 10.0, 120.0)
            .await
            .unwrap_err();
        assert!(matches!(err, WatchServiceError::InvalidProgress(_)));
        assert_eq!(svc.total_watched_seconds(UserId::new(1)).await.unwrap(), 0.0);
    }
}
