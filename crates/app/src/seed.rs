//! Demo catalog for trying the CLI against a fresh database.

use serde::Serialize;
use tracing::info;

use roadmap_core::model::{Difficulty, RoadmapId, StepKind, UserId, VideoId, Visibility};
use services::{AppServices, NewRoadmap, NewStep};

pub const DEMO_OWNER: UserId = UserId::new(1);
pub const DEMO_LEARNER: UserId = UserId::new(2);

#[derive(Debug, Serialize)]
pub struct SeedSummary {
    pub owner: UserId,
    pub learner: UserId,
    pub roadmaps: Vec<RoadmapId>,
    pub steps: usize,
    pub watch_records: usize,
}

struct DemoRoadmap {
    title: &'static str,
    description: &'static str,
    difficulty: Difficulty,
    visibility: Visibility,
    hours: u32,
    steps: &'static [(StepKind, &'static str, &'static [u64])],
}

const DEMO: &[DemoRoadmap] = &[
    DemoRoadmap {
        title: "Rust from scratch",
        description: "Ownership, traits and async, one channel at a time",
        difficulty: Difficulty::Beginner,
        visibility: Visibility::Public,
        hours: 24,
        steps: &[
            (StepKind::Channel, "The Book, read along", &[101, 102]),
            (StepKind::Channel, "Traits and generics", &[103, 104]),
            (StepKind::Milestone, "Build a CLI", &[105, 106]),
        ],
    },
    DemoRoadmap {
        title: "SQL for analysts",
        description: "Joins, windows and query plans",
        difficulty: Difficulty::Intermediate,
        visibility: Visibility::Public,
        hours: 12,
        steps: &[
            (StepKind::Channel, "Selecting and joining", &[201, 202, 203]),
            (StepKind::Milestone, "Window functions", &[204]),
        ],
    },
    DemoRoadmap {
        title: "Draft: distributed systems",
        description: "Work in progress",
        difficulty: Difficulty::Advanced,
        visibility: Visibility::Private,
        hours: 40,
        steps: &[(StepKind::Channel, "Consensus", &[301, 302])],
    },
];

// Learner watch history: (video, seconds, percentage).
const DEMO_WATCHES: &[(u64, f64, f64)] = &[
    (101, 612.0, 100.0),
    (102, 540.0, 97.5),
    (103, 300.0, 45.0),
    (201, 900.0, 96.0),
];

/// Creates the demo roadmaps, follows the public ones as the demo learner and
/// records some watch history.
///
/// # Errors
///
/// Propagates any service failure.
pub async fn seed(app: &AppServices) -> anyhow::Result<SeedSummary> {
    let roadmaps = app.roadmaps();
    let progress = app.progress();
    let mut ids = Vec::with_capacity(DEMO.len());
    let mut step_count = 0;

    for demo in DEMO {
        let roadmap = roadmaps
            .create_roadmap(
                DEMO_OWNER,
                NewRoadmap {
                    title: demo.title.to_owned(),
                    description: demo.description.to_owned(),
                    difficulty: demo.difficulty,
                    visibility: demo.visibility,
                    estimated_hours: demo.hours,
                },
            )
            .await?;

        for (kind, title, videos) in demo.steps {
            roadmaps
                .add_step(
                    DEMO_OWNER,
                    roadmap.id(),
                    NewStep {
                        kind: *kind,
                        title: (*title).to_owned(),
                        order: None,
                        videos: videos.iter().copied().map(VideoId::new).collect(),
                    },
                )
                .await?;
            step_count += 1;
        }

        if demo.visibility.is_public() {
            progress.follow(DEMO_LEARNER, roadmap.id()).await?;
        }
        ids.push(roadmap.id());
    }

    for (video, seconds, percentage) in DEMO_WATCHES {
        app.watch()
            .record_watch(DEMO_LEARNER, VideoId::new(*video), *seconds, *percentage)
            .await?;
    }

    info!(roadmaps = ids.len(), steps = step_count, "seeded demo catalog");
    Ok(SeedSummary {
        owner: DEMO_OWNER,
        learner: DEMO_LEARNER,
        roadmaps: ids,
        steps: step_count,
        watch_records: DEMO_WATCHES.len(),
    })
}
