use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{RoadmapId, StepId, VideoId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StepError {
    #[error("step title cannot be empty")]
    EmptyTitle,

    #[error("unknown step kind: {0}")]
    UnknownKind(String),
}

/// What a step groups: a whole channel of videos, or a hand-picked milestone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Channel,
    Milestone,
}

impl StepKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            StepKind::Channel => "channel",
            StepKind::Milestone => "milestone",
        }
    }

    /// # Errors
    ///
    /// Returns `StepError::UnknownKind` for unrecognised input.
    pub fn parse(s: &str) -> Result<Self, StepError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "channel" => Ok(Self::Channel),
            "milestone" => Ok(Self::Milestone),
            other => Err(StepError::UnknownKind(other.to_owned())),
        }
    }
}

/// One stage of a roadmap and the videos it covers.
///
/// `order` is a sort key. Steps are traversed by ascending `order`, ties by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Step {
    id: StepId,
    roadmap_id: RoadmapId,
    kind: StepKind,
    title: String,
    order: u32,
    videos: Vec<VideoId>,
}

impl Step {
    /// # Errors
    ///
    /// Returns `StepError::EmptyTitle` if the title is blank.
    pub fn new(
        id: StepId,
        roadmap_id: RoadmapId,
        kind: StepKind,
        title: impl Into<String>,
        order: u32,
        videos: Vec<VideoId>,
    ) -> Result<Self, StepError> {
        let title = title.into();
        if title.trim().is_empty() {
            return Err(StepError::EmptyTitle);
        }

        Ok(Self {
            id,
            roadmap_id,
            kind,
            title: title.trim().to_owned(),
            order,
            videos: dedup_videos(videos),
        })
    }

    #[must_use]
    pub fn with_id(mut self, id: StepId) -> Self {
        self.id = id;
        self
    }

    #[must_use]
    pub fn id(&self) -> StepId {
        self.id
    }

    #[must_use]
    pub fn roadmap_id(&self) -> RoadmapId {
        self.roadmap_id
    }

    #[must_use]
    pub fn kind(&self) -> StepKind {
        self.kind
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn order(&self) -> u32 {
        self.order
    }

    #[must_use]
    pub fn videos(&self) -> &[VideoId] {
        &self.videos
    }
}

// A video appears at most once per step; first occurrence wins.
fn dedup_videos(videos: Vec<VideoId>) -> Vec<VideoId> {
    let mut out: Vec<VideoId> = Vec::with_capacity(videos.len());
    for video in videos {
        if !out.contains(&video) {
            out.push(video);
        }
    }
    out
}

/// Sorts steps into traversal order.
pub fn sort_steps(steps: &mut [Step]) {
    steps.sort_by_key(|s| (s.order, s.id));
}

/// Next order value to suggest when appending a step.
#[must_use]
pub fn next_order(steps: &[Step]) -> u32 {
    steps
        .iter()
        .map(Step::order)
        .max()
        .map_or(1, |max| max.saturating_add(1))
}
