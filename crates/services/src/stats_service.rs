use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use roadmap_core::model::{Roadmap, UserId};
use roadmap_core::progress::{compute_progress, video_ids};
use roadmap_core::time::{format_watch_time, watched_hours};
use storage::repository::{
    FollowRepository, RoadmapRepository, StepRepository, Storage, WatchRecordRepository,
};

use crate::error::StatsError;
use crate::progress_service::FollowView;

/// One followed roadmap on the learner dashboard.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardEntry {
    pub roadmap: Roadmap,
    pub follow: FollowView,
    pub overall_percent: u32,
    pub watched_time: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LearnerStats {
    pub created: u64,
    pub following: u64,
    pub completed: u64,
    pub total_watched_hours: f64,
    /// `completed / following` as a floored percent.
    pub completion_rate: u32,
}

/// Read-only learner views: dashboard and headline numbers.
#[derive(Clone)]
pub struct StatsService {
    roadmaps: Arc<dyn RoadmapRepository>,
    steps: Arc<dyn StepRepository>,
    follows: Arc<dyn FollowRepository>,
    watch: Arc<dyn WatchRecordRepository>,
}

impl StatsService {
    #[must_use]
    pub fn new(storage: &Storage) -> Self {
        Self {
            roadmaps: Arc::clone(&storage.roadmaps),
            steps: Arc::clone(&storage.steps),
            follows: Arc::clone(&storage.follows),
            watch: Arc::clone(&storage.watch),
        }
    }

    /// Every roadmap `user` follows, oldest enrollment first.
    ///
    /// # Errors
    ///
    /// Returns `StatsError::Storage` if repository access fails.
    pub async fn dashboard(&self, user: UserId) -> Result<Vec<DashboardEntry>, StatsError> {
        let follows = self.follows.follows_for_user(user).await?;
        let mut entries = Vec::with_capacity(follows.len());

        for follow in follows {
            let Some(roadmap) = self.roadmaps.get_roadmap(follow.roadmap_id()).await? else {
                continue;
            };
            let steps = self.steps.steps_for_roadmap(roadmap.id()).await?;
            let records = self.watch.watch_records(user, &video_ids(&steps)).await?;
            let progress = compute_progress(&steps, &records);

            entries.push(DashboardEntry {
                follow: FollowView::new(&follow, progress.total_steps()),
                overall_percent: progress.overall_percent,
                watched_time: format_watch_time(progress.watched_seconds),
                roadmap,
            });
        }

        debug!(user_id = %user, entries = entries.len(), "built dashboard");
        Ok(entries)
    }

    /// # Errors
    ///
    /// Returns `StatsError::Storage` if repository access fails.
    pub async fn stats(&self, user: UserId) -> Result<LearnerStats, StatsError> {
        let created = self.roadmaps.count_roadmaps_owned_by(user).await?;
        let follows = self.follows.follows_for_user(user).await?;
        let following = follows.len() as u64;
        let completed = follows.iter().filter(|f| f.is_completed()).count() as u64;
        let seconds = self.watch.total_watched_seconds(user).await?;

        let completion_rate = if following == 0 {
            0
        } else {
            u32::try_from(completed * 100 / following).unwrap_or(100)
        };

        Ok(LearnerStats {
            created,
            following,
            completed,
            total_watched_hours: watched_hours(seconds),
            completion_rate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use roadmap_core::model::{
        Difficulty, Follow, RoadmapId, Step, StepId, StepKind, VideoId, Visibility, WatchRecord,
        WatchSample,
    };
    use roadmap_core::time::fixed_now;
    use storage::repository::InMemoryRepository;

    async fn roadmap(repo: &InMemoryRepository, owner: u64, videos: &[u64]) -> RoadmapId {
        let id = repo
            .insert_new_roadmap(
                &Roadmap::new(
                    RoadmapId::new(0),
                    UserId::new(owner),
                    "Path",
                    "",
                    Difficulty::Intermediate,
                    Visibility::Public,
                    3,
                    fixed_now(),
                )
                .unwrap(),
            )
            .await
            .unwrap();
        let step = Step::new(
            StepId::new(0),
            id,
            StepKind::Channel,
            "Only step",
            1,
            videos.iter().copied().map(VideoId::new).collect(),
        )
        .unwrap();
        repo.insert_step(&step, fixed_now()).await.unwrap();
        id
    }

    #[tokio::test]
    async fn stats_count_created_following_and_completed() {
        let repo = InMemoryRepository::new();
        let user = UserId::new(5);
        roadmap(&repo, 5, &[1]).await;
        let a = roadmap(&repo, 1, &[2]).await;
        let b = roadmap(&repo, 1, &[3]).await;
        let c = roadmap(&repo, 1, &[4]).await;

        for id in [a, b, c] {
            repo.insert_follow_if_absent(&Follow::start(user, id, 1, fixed_now()))
                .await
                .unwrap();
        }
        let mut done = repo.get_follow(user, a).await.unwrap().unwrap();
        done.set_cursor(1, 1, fixed_now());
        repo.update_follow_cursor(&done, 0).await.unwrap().unwrap();

        repo.upsert_watch_record(&WatchRecord::first(
            user,
            VideoId::new(2),
            WatchSample::new(3_960.0, 100.0).unwrap(),
            fixed_now(),
        ))
        .await
        .unwrap();

        let stats = StatsService::new(&Storage::from_repository(repo.clone()))
            .stats(user)
            .await
            .unwrap();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.following, 3);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.completion_rate, 33);
        assert_eq!(stats.total_watched_hours, 1.1);
    }

    #[tokio::test]
    async fn stats_for_newcomer_are_zero() {
        let repo = InMemoryRepository::new();
        let stats = StatsService::new(&Storage::from_repository(repo))
            .stats(UserId::new(9))
            .await
            .unwrap();
        assert_eq!(stats.completion_rate, 0);
        assert_eq!(stats.total_watched_hours, 0.0);
    }

    #[tokio::test]
    async fn dashboard_lists_followed_roadmaps_with_progress() {
        let repo = InMemoryRepository::new();
        let user = UserId::new(5);
        let id = roadmap(&repo, 1, &[1, 2]).await;
        roadmap(&repo, 1, &[3]).await;
        repo.insert_follow_if_absent(&Follow::start(user, id, 1, fixed_now()))
            .await
            .unwrap();
        repo.upsert_watch_record(&WatchRecord::first(
            user,
            VideoId::new(1),
            WatchSample::new(75.0, 99.0).unwrap(),
            fixed_now(),
        ))
        .await
        .unwrap();

        let entries = StatsService::new(&Storage::from_repository(repo.clone()))
            .dashboard(user)
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].roadmap.id(), id);
        assert_eq!(entries[0].overall_percent, 50);
        assert_eq!(entries[0].watched_time, "1:15");
        assert_eq!(entries[0].follow.cursor, 0);
    }
}
