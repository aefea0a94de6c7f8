use async_trait::async_trait;
use chrono::{DateTime, Utc};
use roadmap_core::model::{
    Difficulty, Follow, Roadmap, RoadmapId, Step, StepId, UserId, VideoId, Visibility,
    WatchRecord,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Catalog query over public roadmaps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoadmapFilter {
    pub difficulty: Option<Difficulty>,
    pub max_hours: Option<u32>,
    /// Case-insensitive substring of title or description.
    pub search: Option<String>,
    pub limit: u32,
}

impl Default for RoadmapFilter {
    fn default() -> Self {
        Self {
            difficulty: None,
            max_hours: None,
            search: None,
            limit: 20,
        }
    }
}

impl RoadmapFilter {
    /// Trimmed search needle, `None` when blank.
    #[must_use]
    pub fn needle(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase)
    }

    #[must_use]
    pub fn matches(&self, roadmap: &Roadmap) -> bool {
        if !roadmap.visibility().is_public() {
            return false;
        }
        if self.difficulty.is_some_and(|d| d != roadmap.difficulty()) {
            return false;
        }
        if self.max_hours.is_some_and(|h| roadmap.estimated_hours() > h) {
            return false;
        }
        match self.needle() {
            Some(needle) => {
                roadmap.title().to_lowercase().contains(&needle)
                    || roadmap.description().to_lowercase().contains(&needle)
            }
            None => true,
        }
    }
}

/// Repository contract for roadmap headers and their lifecycle.
#[async_trait]
pub trait RoadmapRepository: Send + Sync {
    /// Persist a new roadmap, ignoring its id, and return the assigned id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the roadmap cannot be stored.
    async fn insert_new_roadmap(&self, roadmap: &Roadmap) -> Result<RoadmapId, StorageError>;

    /// Overwrite the editable fields of an existing roadmap.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the roadmap does not exist.
    async fn update_roadmap(&self, roadmap: &Roadmap) -> Result<(), StorageError>;

    /// Fetch a roadmap by ID.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the lookup fails.
    async fn get_roadmap(&self, id: RoadmapId) -> Result<Option<Roadmap>, StorageError>;

    /// Public roadmaps matching the filter, newest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the query fails.
    async fn list_public_roadmaps(
        &self,
        filter: &RoadmapFilter,
    ) -> Result<Vec<Roadmap>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if the query fails.
    async fn count_roadmaps_owned_by(&self, owner: UserId) -> Result<u64, StorageError>;

    /// Change visibility. With `revoke_followers`, every follow of a user
    /// other than the owner is deleted in the same transaction.
    ///
    /// Returns the number of revoked follows.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the roadmap does not exist.
    async fn set_visibility(
        &self,
        id: RoadmapId,
        visibility: Visibility,
        updated_at: DateTime<Utc>,
        revoke_followers: bool,
    ) -> Result<u64, StorageError>;

    /// Delete a roadmap together with its steps and follows, all or nothing.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the roadmap does not exist.
    async fn delete_roadmap(&self, id: RoadmapId) -> Result<(), StorageError>;
}

/// Repository contract for the steps of a roadmap.
#[async_trait]
pub trait StepRepository: Send + Sync {
    /// Persist a new step and its videos, returning the assigned id.
    ///
    /// Every follow of the roadmap is reconciled against the new step count
    /// in the same write (see [`Follow::reconcile`]); `now` stamps follows
    /// that become complete.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if the roadmap already has a step with
    /// the same order, `StorageError::NotFound` if the roadmap is missing.
    async fn insert_step(&self, step: &Step, now: DateTime<Utc>) -> Result<StepId, StorageError>;

    /// Remove a step, reconciling the roadmap's follows like `insert_step`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the step is not part of the roadmap.
    async fn delete_step(
        &self,
        roadmap_id: RoadmapId,
        step_id: StepId,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError>;

    /// Steps of a roadmap in traversal order (`order`, then id).
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the query fails.
    async fn steps_for_roadmap(&self, roadmap_id: RoadmapId) -> Result<Vec<Step>, StorageError>;
}

/// Repository contract for enrollment records.
#[async_trait]
pub trait FollowRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` if the lookup fails.
    async fn get_follow(
        &self,
        user: UserId,
        roadmap: RoadmapId,
    ) -> Result<Option<Follow>, StorageError>;

    /// Insert unless a follow for the same (user, roadmap) exists.
    ///
    /// Returns the stored record and whether it was created by this call.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the roadmap does not exist.
    async fn insert_follow_if_absent(&self, follow: &Follow)
    -> Result<(Follow, bool), StorageError>;

    /// Returns `true` if a record was deleted.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the delete fails.
    async fn delete_follow(&self, user: UserId, roadmap: RoadmapId) -> Result<bool, StorageError>;

    /// Compare-and-swap write of `cursor` and `completed_at`.
    ///
    /// The write only lands if the stored version still equals
    /// `expected_version`; the stored version is then bumped by one. Returns
    /// the record as stored, or `None` when the version moved on (or the
    /// record vanished) in the meantime.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the write fails.
    async fn update_follow_cursor(
        &self,
        follow: &Follow,
        expected_version: u64,
    ) -> Result<Option<Follow>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if the query fails.
    async fn follows_for_user(&self, user: UserId) -> Result<Vec<Follow>, StorageError>;
}

/// Per-user, per-video watch progress (the progress store).
#[async_trait]
pub trait WatchRecordRepository: Send + Sync {
    /// Batch lookup; videos without a record are absent from the map.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the query fails.
    async fn watch_records(
        &self,
        user: UserId,
        videos: &[VideoId],
    ) -> Result<HashMap<VideoId, WatchRecord>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if the lookup fails.
    async fn get_watch_record(
        &self,
        user: UserId,
        video: VideoId,
    ) -> Result<Option<WatchRecord>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if the write fails.
    async fn upsert_watch_record(&self, record: &WatchRecord) -> Result<(), StorageError>;

    /// Sum of watched seconds over every record of the user.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the query fails.
    async fn total_watched_seconds(&self, user: UserId) -> Result<f64, StorageError>;
}

//
// ─── IN-MEMORY ADAPTER ─────────────────────────────────────────────────────────
//

#[derive(Default)]
struct MemoryState {
    last_roadmap_id: u64,
    last_step_id: u64,
    roadmaps: HashMap<RoadmapId, Roadmap>,
    steps: HashMap<StepId, Step>,
    follows: HashMap<(UserId, RoadmapId), Follow>,
    watch: HashMap<(UserId, VideoId), WatchRecord>,
}

/// Simple in-memory repository implementation for testing and prototyping.
///
/// All tables sit behind one lock so cascades are atomic.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryState {
    fn reconcile_follows(&mut self, roadmap_id: RoadmapId, now: DateTime<Utc>) {
        let total = self
            .steps
            .values()
            .filter(|s| s.roadmap_id() == roadmap_id)
            .count();
        let total = u32::try_from(total).unwrap_or(u32::MAX);
        for follow in self.follows.values_mut() {
            if follow.roadmap_id() != roadmap_id {
                continue;
            }
            let mut next = follow.clone();
            if next.reconcile(total, now) {
                *follow = next.with_version(follow.version() + 1);
            }
        }
    }
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StorageError> {
        self.state
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }
}

#[async_trait]
impl RoadmapRepository for InMemoryRepository {
    async fn insert_new_roadmap(&self, roadmap: &Roadmap) -> Result<RoadmapId, StorageError> {
        let mut guard = self.lock()?;
        guard.last_roadmap_id += 1;
        let id = RoadmapId::new(guard.last_roadmap_id);
        guard.roadmaps.insert(id, roadmap.clone().with_id(id));
        Ok(id)
    }

    async fn update_roadmap(&self, roadmap: &Roadmap) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        match guard.roadmaps.get_mut(&roadmap.id()) {
            Some(stored) => {
                *stored = roadmap.clone();
                Ok(())
            }
            None => Err(StorageError::NotFound),
        }
    }

    async fn get_roadmap(&self, id: RoadmapId) -> Result<Option<Roadmap>, StorageError> {
        let guard = self.lock()?;
        Ok(guard.roadmaps.get(&id).cloned())
    }

    async fn list_public_roadmaps(
        &self,
        filter: &RoadmapFilter,
    ) -> Result<Vec<Roadmap>, StorageError> {
        let guard = self.lock()?;
        let mut found: Vec<Roadmap> = guard
            .roadmaps
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| b.id().cmp(&a.id()))
        });
        found.truncate(usize::try_from(filter.limit).unwrap_or(usize::MAX));
        Ok(found)
    }

    async fn count_roadmaps_owned_by(&self, owner: UserId) -> Result<u64, StorageError> {
        let guard = self.lock()?;
        let n = guard.roadmaps.values().filter(|r| r.is_owned_by(owner)).count();
        Ok(n as u64)
    }

    async fn set_visibility(
        &self,
        id: RoadmapId,
        visibility: Visibility,
        updated_at: DateTime<Utc>,
        revoke_followers: bool,
    ) -> Result<u64, StorageError> {
        let mut guard = self.lock()?;
        let owner = match guard.roadmaps.get_mut(&id) {
            Some(roadmap) => {
                roadmap.set_visibility(visibility, updated_at);
                roadmap.owner_id()
            }
            None => return Err(StorageError::NotFound),
        };

        if !revoke_followers {
            return Ok(0);
        }
        let before = guard.follows.len();
        guard
            .follows
            .retain(|(user, roadmap), _| *roadmap != id || *user == owner);
        Ok((before - guard.follows.len()) as u64)
    }

    async fn delete_roadmap(&self, id: RoadmapId) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        if guard.roadmaps.remove(&id).is_none() {
            return Err(StorageError::NotFound);
        }
        guard.steps.retain(|_, s| s.roadmap_id() != id);
        guard.follows.retain(|(_, roadmap), _| *roadmap != id);
        Ok(())
    }
}

#[async_trait]
impl StepRepository for InMemoryRepository {
    async fn insert_step(&self, step: &Step, now: DateTime<Utc>) -> Result<StepId, StorageError> {
        let mut guard = self.lock()?;
        if !guard.roadmaps.contains_key(&step.roadmap_id()) {
            return Err(StorageError::NotFound);
        }
        let clash = guard
            .steps
            .values()
            .any(|s| s.roadmap_id() == step.roadmap_id() && s.order() == step.order());
        if clash {
            return Err(StorageError::Conflict);
        }
        guard.last_step_id += 1;
        let id = StepId::new(guard.last_step_id);
        guard.steps.insert(id, step.clone().with_id(id));
        guard.reconcile_follows(step.roadmap_id(), now);
        Ok(id)
    }

    async fn delete_step(
        &self,
        roadmap_id: RoadmapId,
        step_id: StepId,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        let belongs = guard
            .steps
            .get(&step_id)
            .is_some_and(|s| s.roadmap_id() == roadmap_id);
        if !belongs {
            return Err(StorageError::NotFound);
        }
        guard.steps.remove(&step_id);
        guard.reconcile_follows(roadmap_id, now);
        Ok(())
    }

    async fn steps_for_roadmap(&self, roadmap_id: RoadmapId) -> Result<Vec<Step>, StorageError> {
        let guard = self.lock()?;
        let mut steps: Vec<Step> = guard
            .steps
            .values()
            .filter(|s| s.roadmap_id() == roadmap_id)
            .cloned()
            .collect();
        roadmap_core::model::sort_steps(&mut steps);
        Ok(steps)
    }
}

#[async_trait]
impl FollowRepository for InMemoryRepository {
    async fn get_follow(
        &self,
        user: UserId,
        roadmap: RoadmapId,
    ) -> Result<Option<Follow>, StorageError> {
        let guard = self.lock()?;
        Ok(guard.follows.get(&(user, roadmap)).cloned())
    }

    async fn insert_follow_if_absent(
        &self,
        follow: &Follow,
    ) -> Result<(Follow, bool), StorageError> {
        let mut guard = self.lock()?;
        if !guard.roadmaps.contains_key(&follow.roadmap_id()) {
            return Err(StorageError::NotFound);
        }
        let key = (follow.user_id(), follow.roadmap_id());
        if let Some(existing) = guard.follows.get(&key) {
            return Ok((existing.clone(), false));
        }
        let stored = follow.clone().with_version(0);
        guard.follows.insert(key, stored.clone());
        Ok((stored, true))
    }

    async fn delete_follow(&self, user: UserId, roadmap: RoadmapId) -> Result<bool, StorageError> {
        let mut guard = self.lock()?;
        Ok(guard.follows.remove(&(user, roadmap)).is_some())
    }

    async fn update_follow_cursor(
        &self,
        follow: &Follow,
        expected_version: u64,
    ) -> Result<Option<Follow>, StorageError> {
        let mut guard = self.lock()?;
        let key = (follow.user_id(), follow.roadmap_id());
        match guard.follows.get_mut(&key) {
            Some(stored) if stored.version() == expected_version => {
                let updated = Follow::from_persisted(
                    stored.user_id(),
                    stored.roadmap_id(),
                    follow.cursor(),
                    stored.started_at(),
                    follow.completed_at(),
                    expected_version + 1,
                );
                *stored = updated.clone();
                Ok(Some(updated))
            }
            _ => Ok(None),
        }
    }

    async fn follows_for_user(&self, user: UserId) -> Result<Vec<Follow>, StorageError> {
        let guard = self.lock()?;
        let mut follows: Vec<Follow> = guard
            .follows
            .values()
            .filter(|f| f.user_id() == user)
            .cloned()
            .collect();
        follows.sort_by_key(|f| (f.started_at(), f.roadmap_id()));
        Ok(follows)
    }
}

#[async_trait]
impl WatchRecordRepository for InMemoryRepository {
    async fn watch_records(
        &self,
        user: UserId,
        videos: &[VideoId],
    ) -> Result<HashMap<VideoId, WatchRecord>, StorageError> {
        let guard = self.lock()?;
        Ok(videos
            .iter()
            .filter_map(|v| guard.watch.get(&(user, *v)).map(|r| (*v, r.clone())))
            .collect())
    }

    async fn get_watch_record(
        &self,
        user: UserId,
        video: VideoId,
    ) -> Result<Option<WatchRecord>, StorageError> {
        let guard = self.lock()?;
        Ok(guard.watch.get(&(user, video)).cloned())
    }

    async fn upsert_watch_record(&self, record: &WatchRecord) -> Result<(), StorageError> {
        let mut guard = self.lock()?;
        guard
            .watch
            .insert((record.user_id, record.video_id), record.clone());
        Ok(())
    }

    async fn total_watched_seconds(&self, user: UserId) -> Result<f64, StorageError> {
        let guard = self.lock()?;
        Ok(guard
            .watch
            .values()
            .filter(|r| r.user_id == user)
            .map(|r| r.watched_seconds)
            .sum())
    }
}

/// Aggregates the repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub roadmaps: Arc<dyn RoadmapRepository>,
    pub steps: Arc<dyn StepRepository>,
    pub follows: Arc<dyn FollowRepository>,
    pub watch: Arc<dyn WatchRecordRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        Self::from_repository(InMemoryRepository::new())
    }

    /// Wires every trait object to the same adapter.
    #[must_use]
    pub fn from_repository<R>(repo: R) -> Self
    where
        R: RoadmapRepository
            + StepRepository
            + FollowRepository
            + WatchRecordRepository
            + Clone
            + 'static,
    {
        Self {
            roadmaps: Arc::new(repo.clone()),
            steps: Arc::new(repo.clone()),
            follows: Arc::new(repo.clone()),
            watch: Arc::new(repo),
        }
    }
}
