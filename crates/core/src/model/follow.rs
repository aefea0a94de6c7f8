use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::ids::{RoadmapId, UserId};

//
// ─── CURSOR MOVES ──────────────────────────────────────────────────────────────
//

/// Manual cursor movement requested by a learner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorMove {
    Next,
    Prev,
    SetTo(i64),
}

impl CursorMove {
    /// Computes the target cursor, clamped into `[0, total_steps]`.
    #[must_use]
    pub fn resolve(self, current: u32, total_steps: u32) -> u32 {
        match self {
            CursorMove::Next => current.saturating_add(1).min(total_steps),
            CursorMove::Prev => current.saturating_sub(1).min(total_steps),
            CursorMove::SetTo(n) => {
                let clamped = n.clamp(0, i64::from(total_steps));
                u32::try_from(clamped).unwrap_or(total_steps)
            }
        }
    }
}

//
// ─── STATE ─────────────────────────────────────────────────────────────────────
//

/// Lifecycle of a learner on one roadmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowState {
    NotFollowing,
    InProgress,
    Completed,
}

impl FollowState {
    #[must_use]
    pub fn of(follow: Option<&Follow>, total_steps: u32) -> Self {
        match follow {
            None => FollowState::NotFollowing,
            Some(f) => f.state(total_steps),
        }
    }
}

//
// ─── FOLLOW ────────────────────────────────────────────────────────────────────
//

/// Enrollment of one user in one roadmap.
///
/// `cursor` counts the steps passed in traversal order. Every cursor change
/// goes through [`Follow::set_cursor`], which keeps `completed_at` set exactly
/// when `cursor >= total_steps`.
///
/// `version` is an optimistic concurrency token owned by storage: it is bumped
/// on every persisted cursor change and compared on write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Follow {
    user_id: UserId,
    roadmap_id: RoadmapId,
    cursor: u32,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    version: u64,
}

impl Follow {
    /// A fresh enrollment with the cursor at the start.
    ///
    /// A roadmap without steps is complete the moment it is followed.
    #[must_use]
    pub fn start(
        user_id: UserId,
        roadmap_id: RoadmapId,
        total_steps: u32,
        now: DateTime<Utc>,
    ) -> Self {
        let mut follow = Self {
            user_id,
            roadmap_id,
            cursor: 0,
            started_at: now,
            completed_at: None,
            version: 0,
        };
        follow.set_cursor(0, total_steps, now);
        follow
    }

    #[must_use]
    pub fn from_persisted(
        user_id: UserId,
        roadmap_id: RoadmapId,
        cursor: u32,
        started_at: DateTime<Utc>,
        completed_at: Option<DateTime<Utc>>,
        version: u64,
    ) -> Self {
        Self {
            user_id,
            roadmap_id,
            cursor,
            started_at,
            completed_at,
            version,
        }
    }

    /// Moves the cursor to `target` (clamped to `total_steps`) and
    /// re-evaluates completion. A follow that was already complete keeps its
    /// original `completed_at`.
    ///
    /// Returns `true` if either persisted field changed.
    pub fn set_cursor(&mut self, target: u32, total_steps: u32, now: DateTime<Utc>) -> bool {
        let target = target.min(total_steps);
        let completed_at = if target >= total_steps {
            self.completed_at.or(Some(now))
        } else {
            None
        };
        let changed = target != self.cursor || completed_at.is_some() != self.completed_at.is_some();
        self.cursor = target;
        self.completed_at = completed_at;
        changed
    }

    /// Applies a manual move. See [`CursorMove::resolve`].
    pub fn apply_move(&mut self, mv: CursorMove, total_steps: u32, now: DateTime<Utc>) -> bool {
        let target = mv.resolve(self.cursor, total_steps);
        self.set_cursor(target, total_steps, now)
    }

    /// Re-applies the current cursor against a changed step count: clamps it
    /// to `total_steps` and sets or clears `completed_at` to match.
    pub fn reconcile(&mut self, total_steps: u32, now: DateTime<Utc>) -> bool {
        self.set_cursor(self.cursor, total_steps, now)
    }

    /// Back to the first step regardless of watch history.
    pub fn reset(&mut self, total_steps: u32, now: DateTime<Utc>) -> bool {
        self.set_cursor(0, total_steps, now)
    }

    #[must_use]
    pub fn state(&self, total_steps: u32) -> FollowState {
        if self.cursor >= total_steps {
            FollowState::Completed
        } else {
            FollowState::InProgress
        }
    }

    /// Share of steps passed as a whole percent.
    #[must_use]
    pub fn progress_percentage(&self, total_steps: u32) -> u32 {
        crate::progress::whole_percent(u64::from(self.cursor), u64::from(total_steps))
    }

    /// True when the stored completion flag agrees with the cursor.
    #[must_use]
    pub fn is_consistent(&self, total_steps: u32) -> bool {
        self.completed_at.is_some() == (self.cursor >= total_steps)
    }

    /// Copy that storage hands back after a successful write.
    #[must_use]
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    // Accessors
    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    #[must_use]
    pub fn roadmap_id(&self) -> RoadmapId {
        self.roadmap_id
    }

    #[must_use]
    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
