//! Nested completion percentages for a roadmap.
//!
//! Pure functions over a roadmap's steps and a batch of watch records keyed by
//! video. Nothing here touches storage; the caller fetches the records once
//! for every video in the roadmap and passes them in.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::model::{Step, StepId, StepKind, VideoId, WatchRecord};
use crate::time::watched_hours;

/// Completion of a single step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepProgress {
    pub step_id: StepId,
    pub kind: StepKind,
    pub title: String,
    pub order: u32,
    pub completed_videos: u32,
    pub total_videos: u32,
    pub percent: u32,
    pub watched_seconds: f64,
}

impl StepProgress {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.total_videos > 0 && self.completed_videos == self.total_videos
    }
}

/// Aggregate for a whole roadmap, steps in traversal order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoadmapProgress {
    pub steps: Vec<StepProgress>,
    pub completed_videos: u32,
    pub total_videos: u32,
    pub overall_percent: u32,
    pub watched_seconds: f64,
}

impl RoadmapProgress {
    #[must_use]
    pub fn total_steps(&self) -> u32 {
        u32::try_from(self.steps.len()).unwrap_or(u32::MAX)
    }

    /// Number of fully complete steps counted from the first one, stopping at
    /// the first step that is not complete.
    #[must_use]
    pub fn contiguous_complete_steps(&self) -> u32 {
        let n = self.steps.iter().take_while(|s| s.is_complete()).count();
        u32::try_from(n).unwrap_or(u32::MAX)
    }

    #[must_use]
    pub fn watched_hours(&self) -> f64 {
        watched_hours(self.watched_seconds)
    }
}

/// `numerator / denominator * 100` floored to a whole percent, so only a
/// full ratio reads 100. Zero when the denominator is zero.
#[must_use]
pub fn whole_percent(numerator: u64, denominator: u64) -> u32 {
    if denominator == 0 {
        return 0;
    }
    let pct = numerator.saturating_mul(100) / denominator;
    u32::try_from(pct).unwrap_or(u32::MAX)
}

/// Every distinct video referenced by the steps, in first-seen order.
#[must_use]
pub fn video_ids(steps: &[Step]) -> Vec<VideoId> {
    let mut seen = HashSet::new();
    steps
        .iter()
        .flat_map(|s| s.videos().iter().copied())
        .filter(|v| seen.insert(*v))
        .collect()
}

/// Computes per-step and overall completion.
///
/// A video with no record counts as 0% watched. An empty `records` map (the
/// anonymous viewer) yields all-zero percentages.
#[must_use]
pub fn compute_progress(
    steps: &[Step],
    records: &HashMap<VideoId, WatchRecord>,
) -> RoadmapProgress {
    let mut ordered: Vec<&Step> = steps.iter().collect();
    ordered.sort_by_key(|s| (s.order(), s.id()));

    let mut out = Vec::with_capacity(ordered.len());
    let mut completed_total: u64 = 0;
    let mut videos_total: u64 = 0;
    let mut seconds_total = 0.0;

    for step in ordered {
        let mut completed: u32 = 0;
        let mut seconds = 0.0;
        for video in step.videos() {
            if let Some(record) = records.get(video) {
                if record.is_complete() {
                    completed += 1;
                }
                seconds += record.watched_seconds;
            }
        }
        let total = u32::try_from(step.videos().len()).unwrap_or(u32::MAX);

        completed_total += u64::from(completed);
        videos_total += u64::from(total);
        seconds_total += seconds;

        out.push(StepProgress {
            step_id: step.id(),
            kind: step.kind(),
            title: step.title().to_owned(),
            order: step.order(),
            completed_videos: completed,
            total_videos: total,
            percent: whole_percent(u64::from(completed), u64::from(total)),
            watched_seconds: seconds,
        });
    }

    RoadmapProgress {
        steps: out,
        completed_videos: u32::try_from(completed_total).unwrap_or(u32::MAX),
        total_videos: u32::try_from(videos_total).unwrap_or(u32::MAX),
        overall_percent: whole_percent(completed_total, videos_total),
        watched_seconds: seconds_total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RoadmapId, UserId, WatchSample};
    use crate::time::fixed_now;

    fn step(id: u64, order: u32, videos: &[u64]) -> Step {
        Step::new(
            StepId::new(id),
            RoadmapId::new(1),
            StepKind::Channel,
            format!("Step {id}"),
            order,
            videos.iter().copied().map(VideoId::new).collect(),
        )
        .unwrap()
    }

    fn watched(entries: &[(u64, f64, f64)]) -> HashMap<VideoId, WatchRecord> {
        entries
            .iter()
            .map(|&(video, seconds, pct)| {
                let record = WatchRecord::first(
                    UserId::new(1),
                    VideoId::new(video),
                    WatchSample::new(seconds, pct).unwrap(),
                    fixed_now(),
                );
                (VideoId::new(video), record)
            })
            .collect()
    }

    #[test]
    fn empty_steps_and_roadmaps_are_zero_percent() {
        let progress = compute_progress(&[], &HashMap::new());
        assert_eq!(progress.overall_percent, 0);
        assert_eq!(progress.total_steps(), 0);

        let progress = compute_progress(&[step(1, 1, &[]), step(2, 2, &[])], &HashMap::new());
        assert!(progress.steps.iter().all(|s| s.percent == 0));
        assert_eq!(progress.overall_percent, 0);
        assert_eq!(progress.contiguous_complete_steps(), 0);
    }

    #[test]
    fn anonymous_viewer_sees_zero() {
        let steps = [step(1, 1, &[1, 2]), step(2, 2, &[3])];
        let progress = compute_progress(&steps, &HashMap::new());
        assert_eq!(progress.total_videos, 3);
        assert_eq!(progress.completed_videos, 0);
        assert_eq!(progress.watched_seconds, 0.0);
    }

    #[test]
    fn two_of_three_steps_complete() {
        let steps = [
            step(1, 1, &[1, 2]),
            step(2, 2, &[3, 4]),
            step(3, 3, &[5, 6]),
        ];
        let records = watched(&[
            (1, 60.0, 100.0),
            (2, 60.0, 95.0),
            (3, 60.0, 99.0),
            (4, 60.0, 96.0),
            (5, 30.0, 50.0),
        ]);
        let progress = compute_progress(&steps, &records);

        let pct: Vec<u32> = progress.steps.iter().map(|s| s.percent).collect();
        assert_eq!(pct, vec![100, 100, 0]);
        assert_eq!(progress.overall_percent, 66);
        assert_eq!(progress.contiguous_complete_steps(), 2);
        assert_eq!(progress.watched_seconds, 270.0);
        assert_eq!(progress.steps[2].watched_seconds, 30.0);
    }

    #[test]
    fn later_complete_step_does_not_count_past_a_gap() {
        let steps = [step(1, 1, &[1]), step(2, 2, &[2]), step(3, 3, &[3])];
        let records = watched(&[(1, 1.0, 100.0), (3, 1.0, 100.0)]);
        let progress = compute_progress(&steps, &records);
        assert_eq!(progress.contiguous_complete_steps(), 1);
    }

    #[test]
    fn steps_are_reported_in_order() {
        let steps = [step(7, 3, &[1]), step(8, 1, &[2])];
        let progress = compute_progress(&steps, &HashMap::new());
        let orders: Vec<u32> = progress.steps.iter().map(|s| s.order).collect();
        assert_eq!(orders, vec![1, 3]);
    }

    #[test]
    fn video_ids_are_distinct() {
        let steps = [step(1, 1, &[1, 2]), step(2, 2, &[2, 3])];
        assert_eq!(
            video_ids(&steps),
            vec![VideoId::new(1), VideoId::new(2), VideoId::new(3)]
        );
    }

    #[test]
    fn whole_percent_handles_zero_and_floors() {
        assert_eq!(whole_percent(0, 0), 0);
        assert_eq!(whole_percent(1, 3), 33);
        assert_eq!(whole_percent(4, 6), 66);
        assert_eq!(whole_percent(1, 8), 12);
        assert_eq!(whole_percent(3, 3), 100);
    }

    #[test]
    fn nearly_complete_step_is_not_complete() {
        let videos: Vec<u64> = (1..=200).collect();
        let steps = [step(1, 1, &videos)];
        let entries: Vec<(u64, f64, f64)> = (1..=199).map(|v| (v, 1.0, 100.0)).collect();
        let progress = compute_progress(&steps, &watched(&entries));
        assert_eq!(progress.steps[0].percent, 99);
        assert_eq!(progress.overall_percent, 99);
        assert!(!progress.steps[0].is_complete());
        assert_eq!(progress.contiguous_complete_steps(), 0);
    }
}
