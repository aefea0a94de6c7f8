//! Progress Controller: follow lifecycle, cursor moves and the aggregate view.
//!
//! Every cursor write is an optimistic compare-and-swap on `Follow::version`.
//! A lost race reloads the follow, recomputes the target from fresh state and
//! tries again, up to `ProgressConfig::max_cursor_retries` attempts.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use roadmap_core::model::{
    CursorMove, Follow, FollowState, Roadmap, RoadmapId, Step, UserId, Visibility,
};
use roadmap_core::progress::{RoadmapProgress, compute_progress, video_ids};
use roadmap_core::time::format_watch_time;
use storage::repository::{
    FollowRepository, RoadmapRepository, StepRepository, Storage, WatchRecordRepository,
};

use crate::Clock;
use crate::error::ProgressError;

//
// ─── CONFIGURATION ─────────────────────────────────────────────────────────────
//

/// What happens to existing followers when a roadmap turns private.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisibilityPolicy {
    /// Followers keep their enrollment and may keep using it.
    #[default]
    KeepFollowers,
    /// Non-owner follows are deleted and further access is denied.
    RevokeFollowers,
}

impl VisibilityPolicy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            VisibilityPolicy::KeepFollowers => "keep",
            VisibilityPolicy::RevokeFollowers => "revoke",
        }
    }

    /// Accepts `keep` / `revoke` and the long snake-case names.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keep" | "keep_followers" => Some(Self::KeepFollowers),
            "revoke" | "revoke_followers" => Some(Self::RevokeFollowers),
            _ => None,
        }
    }

    #[must_use]
    pub fn revokes(self) -> bool {
        matches!(self, VisibilityPolicy::RevokeFollowers)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressConfig {
    pub visibility_policy: VisibilityPolicy,
    /// Compare-and-swap attempts per cursor mutation. Zero behaves as one.
    pub max_cursor_retries: u32,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            visibility_policy: VisibilityPolicy::KeepFollowers,
            max_cursor_retries: 5,
        }
    }
}

//
// ─── VIEWS & OUTCOMES ──────────────────────────────────────────────────────────
//

/// Who is looking at a roadmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Viewer {
    Anonymous,
    User(UserId),
}

impl Viewer {
    #[must_use]
    pub fn user(self) -> Option<UserId> {
        match self {
            Viewer::Anonymous => None,
            Viewer::User(id) => Some(id),
        }
    }
}

impl From<Option<UserId>> for Viewer {
    fn from(user: Option<UserId>) -> Self {
        user.map_or(Viewer::Anonymous, Viewer::User)
    }
}

/// Follow record as returned to callers, with the derived state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FollowView {
    pub user_id: UserId,
    pub roadmap_id: RoadmapId,
    pub cursor: u32,
    pub total_steps: u32,
    pub state: FollowState,
    pub progress_percent: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl FollowView {
    #[must_use]
    pub fn new(follow: &Follow, total_steps: u32) -> Self {
        Self {
            user_id: follow.user_id(),
            roadmap_id: follow.roadmap_id(),
            cursor: follow.cursor(),
            total_steps,
            state: follow.state(total_steps),
            progress_percent: follow.progress_percentage(total_steps),
            started_at: follow.started_at(),
            completed_at: follow.completed_at(),
        }
    }
}

/// The aggregate read: per-step and overall percentages for one viewer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoadmapView {
    pub roadmap: Roadmap,
    pub state: FollowState,
    pub follow: Option<FollowView>,
    pub progress: RoadmapProgress,
    pub watched_time: String,
    pub watched_hours: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "follow", rename_all = "snake_case")]
pub enum FollowOutcome {
    Created(FollowView),
    AlreadyFollowing(FollowView),
}

impl FollowOutcome {
    #[must_use]
    pub fn view(&self) -> &FollowView {
        match self {
            FollowOutcome::Created(v) | FollowOutcome::AlreadyFollowing(v) => v,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UnfollowOutcome {
    Removed,
    NotFollowing,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "follow", rename_all = "snake_case")]
pub enum AutoAdvanceOutcome {
    Advanced(FollowView),
    NothingNew(FollowView),
}

impl AutoAdvanceOutcome {
    #[must_use]
    pub fn view(&self) -> &FollowView {
        match self {
            AutoAdvanceOutcome::Advanced(v) | AutoAdvanceOutcome::NothingNew(v) => v,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum CursorOp {
    Move(CursorMove),
    AutoAdvance,
    Reset,
}

impl CursorOp {
    fn name(self) -> &'static str {
        match self {
            CursorOp::Move(CursorMove::Next) => "next",
            CursorOp::Move(CursorMove::Prev) => "prev",
            CursorOp::Move(CursorMove::SetTo(_)) => "set_to",
            CursorOp::AutoAdvance => "auto_advance",
            CursorOp::Reset => "reset",
        }
    }
}

//
// ─── SERVICE ───────────────────────────────────────────────────────────────────
//

/// Aggregates roadmap progress and drives the follow state machine.
#[derive(Clone)]
pub struct ProgressService {
    clock: Clock,
    config: ProgressConfig,
    roadmaps: Arc<dyn RoadmapRepository>,
    steps: Arc<dyn StepRepository>,
    follows: Arc<dyn FollowRepository>,
    watch: Arc<dyn WatchRecordRepository>,
}

impl ProgressService {
    #[must_use]
    pub fn new(
        clock: Clock,
        config: ProgressConfig,
        roadmaps: Arc<dyn RoadmapRepository>,
        steps: Arc<dyn StepRepository>,
        follows: Arc<dyn FollowRepository>,
        watch: Arc<dyn WatchRecordRepository>,
    ) -> Self {
        Self {
            clock,
            config,
            roadmaps,
            steps,
            follows,
            watch,
        }
    }

    #[must_use]
    pub fn from_storage(clock: Clock, config: ProgressConfig, storage: &Storage) -> Self {
        Self::new(
            clock,
            config,
            Arc::clone(&storage.roadmaps),
            Arc::clone(&storage.steps),
            Arc::clone(&storage.follows),
            Arc::clone(&storage.watch),
        )
    }

    #[must_use]
    pub fn config(&self) -> ProgressConfig {
        self.config
    }

    /// Per-step and overall completion of a roadmap as seen by `viewer`.
    ///
    /// Anonymous viewers get all-zero percentages. Watch records are fetched
    /// in one batch for every video of the roadmap.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::NotFound` if the roadmap does not exist,
    /// `ProgressError::PermissionDenied` if it is private and the viewer may
    /// not see it.
    pub async fn aggregate(
        &self,
        roadmap_id: RoadmapId,
        viewer: Viewer,
    ) -> Result<RoadmapView, ProgressError> {
        let roadmap = self.load_roadmap(roadmap_id).await?;
        let follow = match viewer.user() {
            Some(user) => self.follows.get_follow(user, roadmap_id).await?,
            None => None,
        };
        self.check_read_access(&roadmap, viewer, follow.as_ref())?;

        let steps = self.steps.steps_for_roadmap(roadmap_id).await?;
        let progress = self.progress_for(viewer.user(), &steps).await?;
        let total = progress.total_steps();
        debug!(
            roadmap_id = %roadmap_id,
            steps = total,
            overall_percent = progress.overall_percent,
            "aggregated roadmap progress"
        );

        Ok(RoadmapView {
            state: FollowState::of(follow.as_ref(), total),
            follow: follow.as_ref().map(|f| FollowView::new(f, total)),
            watched_time: format_watch_time(progress.watched_seconds),
            watched_hours: progress.watched_hours(),
            roadmap,
            progress,
        })
    }

    /// Enroll `user`. Following twice is a no-op reporting `AlreadyFollowing`.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::NotFound` if the roadmap does not exist,
    /// `ProgressError::PermissionDenied` for a private roadmap of someone else.
    pub async fn follow(
        &self,
        user: UserId,
        roadmap_id: RoadmapId,
    ) -> Result<FollowOutcome, ProgressError> {
        let roadmap = self.load_roadmap(roadmap_id).await?;
        if !roadmap.is_visible_to(user) {
            return Err(ProgressError::PermissionDenied);
        }
        let total = self.total_steps(roadmap_id).await?;

        if let Some(existing) = self.follows.get_follow(user, roadmap_id).await? {
            return Ok(FollowOutcome::AlreadyFollowing(FollowView::new(
                &existing, total,
            )));
        }

        let fresh = Follow::start(user, roadmap_id, total, self.clock.now());
        let (stored, created) = self.follows.insert_follow_if_absent(&fresh).await?;
        let view = FollowView::new(&stored, total);
        if created {
            info!(user_id = %user, roadmap_id = %roadmap_id, "followed roadmap");
            Ok(FollowOutcome::Created(view))
        } else {
            Ok(FollowOutcome::AlreadyFollowing(view))
        }
    }

    /// Drop the enrollment. A missing follow is reported, not an error.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::NotFound` if the roadmap does not exist.
    pub async fn unfollow(
        &self,
        user: UserId,
        roadmap_id: RoadmapId,
    ) -> Result<UnfollowOutcome, ProgressError> {
        self.load_roadmap(roadmap_id).await?;
        if self.follows.delete_follow(user, roadmap_id).await? {
            info!(user_id = %user, roadmap_id = %roadmap_id, "unfollowed roadmap");
            Ok(UnfollowOutcome::Removed)
        } else {
            Ok(UnfollowOutcome::NotFollowing)
        }
    }

    /// Manual cursor move: next, previous or an explicit position.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::NotFollowing` without a follow record,
    /// `ProgressError::Conflict` when every compare-and-swap attempt lost.
    pub async fn advance(
        &self,
        user: UserId,
        roadmap_id: RoadmapId,
        mv: CursorMove,
    ) -> Result<FollowView, ProgressError> {
        let (view, _) = self
            .update_cursor(user, roadmap_id, CursorOp::Move(mv))
            .await?;
        Ok(view)
    }

    /// Move the cursor up to the last step that is complete contiguously from
    /// the first one. Never moves it backwards.
    ///
    /// # Errors
    ///
    /// See [`ProgressService::advance`].
    pub async fn auto_advance(
        &self,
        user: UserId,
        roadmap_id: RoadmapId,
    ) -> Result<AutoAdvanceOutcome, ProgressError> {
        let (view, changed) = self
            .update_cursor(user, roadmap_id, CursorOp::AutoAdvance)
            .await?;
        Ok(if changed {
            AutoAdvanceOutcome::Advanced(view)
        } else {
            AutoAdvanceOutcome::NothingNew(view)
        })
    }

    /// Back to the start, whatever the watch history says.
    ///
    /// # Errors
    ///
    /// See [`ProgressService::advance`].
    pub async fn reset(
        &self,
        user: UserId,
        roadmap_id: RoadmapId,
    ) -> Result<FollowView, ProgressError> {
        let (view, _) = self
            .update_cursor(user, roadmap_id, CursorOp::Reset)
            .await?;
        Ok(view)
    }

    /// Current follow of `user`, if any.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::NotFound` if the roadmap does not exist.
    pub async fn follow_state(
        &self,
        user: UserId,
        roadmap_id: RoadmapId,
    ) -> Result<Option<FollowView>, ProgressError> {
        self.load_roadmap(roadmap_id).await?;
        let total = self.total_steps(roadmap_id).await?;
        let follow = self.follows.get_follow(user, roadmap_id).await?;
        Ok(follow.as_ref().map(|f| FollowView::new(f, total)))
    }

    // Read-modify-write with optimistic retry. Returns the view and whether a
    // write landed.
    async fn update_cursor(
        &self,
        user: UserId,
        roadmap_id: RoadmapId,
        op: CursorOp,
    ) -> Result<(FollowView, bool), ProgressError> {
        let attempts = self.config.max_cursor_retries.max(1);

        for attempt in 1..=attempts {
            let roadmap = self.load_roadmap(roadmap_id).await?;
            let follow = self
                .follows
                .get_follow(user, roadmap_id)
                .await?
                .ok_or(ProgressError::NotFollowing)?;
            self.check_mutation_access(&roadmap, user)?;

            let steps = self.steps.steps_for_roadmap(roadmap_id).await?;
            let total = u32::try_from(steps.len()).unwrap_or(u32::MAX);

            let target = match op {
                CursorOp::Move(mv) => mv.resolve(follow.cursor(), total),
                CursorOp::Reset => 0,
                CursorOp::AutoAdvance => {
                    let reached = self
                        .progress_for(Some(user), &steps)
                        .await?
                        .contiguous_complete_steps();
                    if reached <= follow.cursor() {
                        debug!(
                            user_id = %user,
                            roadmap_id = %roadmap_id,
                            cursor = follow.cursor(),
                            reached,
                            "auto-advance found nothing new"
                        );
                        return Ok((FollowView::new(&follow, total), false));
                    }
                    reached
                }
            };

            let mut next = follow.clone();
            if !next.set_cursor(target, total, self.clock.now()) {
                return Ok((FollowView::new(&follow, total), false));
            }

            match self
                .follows
                .update_follow_cursor(&next, follow.version())
                .await?
            {
                Some(stored) => {
                    log_transition(op, &follow, &stored, total);
                    return Ok((FollowView::new(&stored, total), true));
                }
                None => {
                    debug!(
                        user_id = %user,
                        roadmap_id = %roadmap_id,
                        attempt,
                        op = op.name(),
                        "cursor version moved, retrying"
                    );
                }
            }
        }

        warn!(
            user_id = %user,
            roadmap_id = %roadmap_id,
            attempts,
            op = op.name(),
            "giving up on cursor update"
        );
        Err(ProgressError::Conflict { attempts })
    }

    async fn load_roadmap(&self, roadmap_id: RoadmapId) -> Result<Roadmap, ProgressError> {
        self.roadmaps
            .get_roadmap(roadmap_id)
            .await?
            .ok_or(ProgressError::NotFound)
    }

    async fn total_steps(&self, roadmap_id: RoadmapId) -> Result<u32, ProgressError> {
        let steps = self.steps.steps_for_roadmap(roadmap_id).await?;
        Ok(u32::try_from(steps.len()).unwrap_or(u32::MAX))
    }

    async fn progress_for(
        &self,
        user: Option<UserId>,
        steps: &[Step],
    ) -> Result<RoadmapProgress, ProgressError> {
        let records = match user {
            Some(user) => self.watch.watch_records(user, &video_ids(steps)).await?,
            None => HashMap::new(),
        };
        Ok(compute_progress(steps, &records))
    }

    fn check_read_access(
        &self,
        roadmap: &Roadmap,
        viewer: Viewer,
        follow: Option<&Follow>,
    ) -> Result<(), ProgressError> {
        if roadmap.visibility() == Visibility::Public {
            return Ok(());
        }
        match viewer.user() {
            Some(user) if roadmap.is_owned_by(user) => Ok(()),
            Some(_) if follow.is_some() && !self.config.visibility_policy.revokes() => Ok(()),
            _ => Err(ProgressError::PermissionDenied),
        }
    }

    fn check_mutation_access(&self, roadmap: &Roadmap, user: UserId) -> Result<(), ProgressError> {
        if self.config.visibility_policy.revokes() && !roadmap.is_visible_to(user) {
            return Err(ProgressError::PermissionDenied);
        }
        Ok(())
    }
}

fn log_transition(op: CursorOp, before: &Follow, after: &Follow, total_steps: u32) {
    match (before.is_completed(), after.is_completed()) {
        (false, true) => info!(
            user_id = %after.user_id(),
            roadmap_id = %after.roadmap_id(),
            total_steps,
            op = op.name(),
            "roadmap completed"
        ),
        (true, false) => info!(
            user_id = %after.user_id(),
            roadmap_id = %after.roadmap_id(),
            cursor = after.cursor(),
            op = op.name(),
            "roadmap reopened"
        ),
        _ => debug!(
            user_id = %after.user_id(),
            roadmap_id = %after.roadmap_id(),
            from = before.cursor(),
            to = after.cursor(),
            op = op.name(),
            "cursor moved"
        ),
    }
}
