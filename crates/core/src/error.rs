use thiserror::Error;

use crate::model::{RoadmapError, StepError, WatchError};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Roadmap(#[from] RoadmapError),
    #[error(transparent)]
    Step(#[from] StepError),
    #[error(transparent)]
    Watch(#[from] WatchError),
}
