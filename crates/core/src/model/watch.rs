use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::model::ids::{UserId, VideoId};

/// Watched share at which a video counts as finished.
pub const COMPLETION_THRESHOLD: f64 = 95.0;

/// Minimum forward movement (seconds or percentage points) worth persisting.
pub const SIGNIFICANT_DELTA: f64 = 10.0;

#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum WatchError {
    #[error("watched seconds must be a finite value >= 0, got {0}")]
    InvalidSeconds(f64),

    #[error("watched percentage must be within 0..=100, got {0}")]
    InvalidPercentage(f64),
}

/// A player heartbeat: how far the learner got in one video.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WatchSample {
    watched_seconds: f64,
    watched_percentage: f64,
}

impl WatchSample {
    /// # Errors
    ///
    /// Returns `WatchError` for negative, non-finite or out-of-range input.
    pub fn new(watched_seconds: f64, watched_percentage: f64) -> Result<Self, WatchError> {
        if !watched_seconds.is_finite() || watched_seconds < 0.0 {
            return Err(WatchError::InvalidSeconds(watched_seconds));
        }
        if !watched_percentage.is_finite() || !(0.0..=100.0).contains(&watched_percentage) {
            return Err(WatchError::InvalidPercentage(watched_percentage));
        }
        Ok(Self {
            watched_seconds,
            watched_percentage,
        })
    }

    #[must_use]
    pub fn watched_seconds(&self) -> f64 {
        self.watched_seconds
    }

    #[must_use]
    pub fn watched_percentage(&self) -> f64 {
        self.watched_percentage
    }
}

/// Per-user, per-video viewing progress. Source of truth for completion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WatchRecord {
    pub user_id: UserId,
    pub video_id: VideoId,
    pub watched_seconds: f64,
    pub watched_percentage: f64,
    pub last_watched_at: DateTime<Utc>,
}

impl WatchRecord {
    #[must_use]
    pub fn first(
        user_id: UserId,
        video_id: VideoId,
        sample: WatchSample,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id,
            video_id,
            watched_seconds: sample.watched_seconds,
            watched_percentage: sample.watched_percentage,
            last_watched_at: now,
        }
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.watched_percentage >= COMPLETION_THRESHOLD
    }

    /// Whether a new sample moved far enough to be worth a write.
    #[must_use]
    pub fn is_significant(&self, sample: &WatchSample) -> bool {
        sample.watched_seconds - self.watched_seconds >= SIGNIFICANT_DELTA
            || sample.watched_percentage - self.watched_percentage >= SIGNIFICANT_DELTA
            || sample.watched_percentage >= COMPLETION_THRESHOLD
    }

    /// Folds a sample in. Both fields only ever grow.
    #[must_use]
    pub fn merged(&self, sample: &WatchSample, now: DateTime<Utc>) -> Self {
        Self {
            user_id: self.user_id,
            video_id: self.video_id,
            watched_seconds: self.watched_seconds.max(sample.watched_seconds),
            watched_percentage: self.watched_percentage.max(sample.watched_percentage),
            last_watched_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    fn record(seconds: f64, pct: f64) -> WatchRecord {
        WatchRecord::first(
            UserId::new(1),
            VideoId::new(1),
            WatchSample::new(seconds, pct).unwrap(),
            fixed_now(),
        )
    }

    #[test]
    fn sample_rejects_bad_input() {
        assert!(matches!(
            WatchSample::new(-1.0, 10.0),
            Err(WatchError::InvalidSeconds(_))
        ));
        assert!(matches!(
            WatchSample::new(1.0, 100.5),
            Err(WatchError::InvalidPercentage(_))
        ));
        assert!(WatchSample::new(f64::INFINITY, 1.0).is_err());
    }

    #[test]
    fn completion_threshold_is_inclusive() {
        assert!(record(10.0, 95.0).is_complete());
        assert!(!record(10.0, 94.9).is_complete());
    }

    #[test]
    fn small_steps_are_not_significant() {
        let r = record(100.0, 40.0);
        assert!(!r.is_significant(&WatchSample::new(105.0, 45.0).unwrap()));
        assert!(r.is_significant(&WatchSample::new(110.0, 41.0).unwrap()));
        assert!(r.is_significant(&WatchSample::new(101.0, 50.0).unwrap()));
        assert!(r.is_significant(&WatchSample::new(0.0, 96.0).unwrap()));
    }

    #[test]
    fn merge_never_goes_backwards() {
        let r = record(300.0, 80.0);
        let later = fixed_now() + chrono::Duration::seconds(30);
        let merged = r.merged(&WatchSample::new(20.0, 96.0).unwrap(), later);
        assert_eq!(merged.watched_seconds, 300.0);
        assert_eq!(merged.watched_percentage, 96.0);
        assert_eq!(merged.last_watched_at, later);
    }
}
