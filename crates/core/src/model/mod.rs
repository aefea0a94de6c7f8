mod follow;
mod ids;
mod roadmap;
mod step;
mod watch;

pub use ids::{ParseIdError, RoadmapId, StepId, UserId, VideoId};

pub use follow::{CursorMove, Follow, FollowState};
pub use roadmap::{Difficulty, Roadmap, RoadmapError, Visibility};
pub use step::{Step, StepError, StepKind, next_order, sort_steps};
pub use watch::{COMPLETION_THRESHOLD, WatchError, WatchRecord, WatchSample};
