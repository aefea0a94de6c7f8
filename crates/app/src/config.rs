//! Command line and environment configuration.

use anyhow::bail;
use clap::{ArgGroup, Parser, Subcommand};

use roadmap_core::model::{
    CursorMove, Difficulty, RoadmapId, StepId, StepKind, UserId, VideoId, Visibility,
};
use services::{ProgressConfig, VisibilityPolicy};

/// Track learners through curated, ordered video roadmaps.
#[derive(Parser, Debug)]
#[command(name = "roadmap")]
#[command(about = "Roadmap progress tracking", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub args: Args,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Args, Debug, Clone)]
pub struct Args {
    /// SQLite database URL or file path
    #[arg(
        long = "db",
        env = "ROADMAP_DB_URL",
        default_value = "sqlite://roadmap.sqlite3",
        global = true
    )]
    pub db_url: String,

    /// Log level (trace, debug, info, warn, error); RUST_LOG wins when set
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    /// Whether making a roadmap private keeps or revokes other users' follows
    #[arg(
        long,
        env = "ROADMAP_VISIBILITY_POLICY",
        default_value = "keep",
        value_parser = parse_policy,
        global = true
    )]
    pub visibility_policy: VisibilityPolicy,

    /// Compare-and-swap attempts per cursor update
    #[arg(
        long,
        env = "ROADMAP_MAX_CURSOR_RETRIES",
        default_value_t = 5,
        global = true
    )]
    pub max_cursor_retries: u32,
}

impl Args {
    #[must_use]
    pub fn progress_config(&self) -> ProgressConfig {
        ProgressConfig {
            visibility_policy: self.visibility_policy,
            max_cursor_retries: self.max_cursor_retries,
        }
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a small demo catalog with one learner
    Seed,
    /// Create a roadmap owned by --user
    Create {
        #[arg(long)]
        user: UserId,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value = "beginner", value_parser = parse_difficulty)]
        difficulty: Difficulty,
        #[arg(long, default_value = "public", value_parser = parse_visibility)]
        visibility: Visibility,
        #[arg(long, default_value_t = 0)]
        hours: u32,
    },
    /// Edit the header of a roadmap
    Edit {
        #[arg(long)]
        user: UserId,
        #[arg(long)]
        roadmap: RoadmapId,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value = "beginner", value_parser = parse_difficulty)]
        difficulty: Difficulty,
        #[arg(long, default_value_t = 0)]
        hours: u32,
    },
    /// Add a step; without --order the next free order is used
    AddStep {
        #[arg(long)]
        user: UserId,
        #[arg(long)]
        roadmap: RoadmapId,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "channel", value_parser = parse_kind)]
        kind: StepKind,
        #[arg(long)]
        order: Option<u32>,
        /// Comma separated video ids
        #[arg(long, value_delimiter = ',')]
        videos: Vec<VideoId>,
    },
    /// Remove a step
    RemoveStep {
        #[arg(long)]
        user: UserId,
        #[arg(long)]
        roadmap: RoadmapId,
        #[arg(long)]
        step: StepId,
    },
    /// Suggested order for the next step
    NextOrder {
        #[arg(long)]
        roadmap: RoadmapId,
    },
    /// Make a roadmap public or private
    Visibility {
        #[arg(long)]
        user: UserId,
        #[arg(long)]
        roadmap: RoadmapId,
        #[arg(long = "set", value_parser = parse_visibility)]
        visibility: Visibility,
    },
    /// Delete a roadmap with its steps and follows
    Delete {
        #[arg(long)]
        user: UserId,
        #[arg(long)]
        roadmap: RoadmapId,
    },
    /// List public roadmaps, newest first
    Catalog {
        #[arg(long, value_parser = parse_difficulty)]
        difficulty: Option<Difficulty>,
        #[arg(long)]
        max_hours: Option<u32>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Aggregate progress view; anonymous without --user
    Show {
        #[arg(long)]
        roadmap: RoadmapId,
        #[arg(long)]
        user: Option<UserId>,
    },
    Follow {
        #[arg(long)]
        user: UserId,
        #[arg(long)]
        roadmap: RoadmapId,
    },
    Unfollow {
        #[arg(long)]
        user: UserId,
        #[arg(long)]
        roadmap: RoadmapId,
    },
    /// Move the cursor by hand
    #[command(group(
        ArgGroup::new("direction")
            .args(["next", "prev", "set"])
            .required(true)
            .multiple(false)
    ))]
    Advance {
        #[arg(long)]
        user: UserId,
        #[arg(long)]
        roadmap: RoadmapId,
        #[arg(long)]
        next: bool,
        #[arg(long)]
        prev: bool,
        #[arg(long, allow_negative_numbers = true)]
        set: Option<i64>,
    },
    /// Advance to the last contiguously completed step
    AutoAdvance {
        #[arg(long)]
        user: UserId,
        #[arg(long)]
        roadmap: RoadmapId,
    },
    /// Put the cursor back to the start
    Reset {
        #[arg(long)]
        user: UserId,
        #[arg(long)]
        roadmap: RoadmapId,
    },
    /// Record a player heartbeat for one video
    Watch {
        #[arg(long)]
        user: UserId,
        #[arg(long)]
        video: VideoId,
        #[arg(long, allow_negative_numbers = true)]
        seconds: f64,
        #[arg(long, allow_negative_numbers = true)]
        percentage: f64,
    },
    /// Followed roadmaps with progress
    Dashboard {
        #[arg(long)]
        user: UserId,
    },
    /// Headline learner numbers
    Stats {
        #[arg(long)]
        user: UserId,
    },
}

/// Turns the `--next/--prev/--set` flags into a move.
///
/// # Errors
///
/// Fails when no direction was given.
pub fn cursor_move(next: bool, prev: bool, set: Option<i64>) -> anyhow::Result<CursorMove> {
    match (next, prev, set) {
        (true, _, _) => Ok(CursorMove::Next),
        (_, true, _) => Ok(CursorMove::Prev),
        (_, _, Some(n)) => Ok(CursorMove::SetTo(n)),
        _ => bail!("one of --next, --prev or --set is required"),
    }
}

fn parse_difficulty(s: &str) -> Result<Difficulty, roadmap_core::Error> {
    Ok(Difficulty::parse(s)?)
}

fn parse_visibility(s: &str) -> Result<Visibility, roadmap_core::Error> {
    Ok(Visibility::parse(s)?)
}

fn parse_kind(s: &str) -> Result<StepKind, roadmap_core::Error> {
    Ok(StepKind::parse(s)?)
}

fn parse_policy(s: &str) -> Result<VisibilityPolicy, String> {
    VisibilityPolicy::parse(s).ok_or_else(|| format!("expected keep or revoke, got {s}"))
}

/// Accepts bare paths and `sqlite:` URLs, returning an absolute `sqlite://` URL.
pub fn normalize_sqlite_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed == "sqlite::memory:" || trimmed.starts_with("sqlite://") {
        return trimmed.to_owned();
    }

    let path_str = trimmed.strip_prefix("sqlite:").unwrap_or(trimmed);
    let path = std::path::Path::new(path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

/// Creates the database file and its parent directory so the pool can open it.
///
/// # Errors
///
/// Fails for a URL without a path or when the file cannot be created.
pub fn prepare_sqlite_file(db_url: &str) -> anyhow::Result<()> {
    if db_url == "sqlite::memory:" {
        return Ok(());
    }

    let Some(path) = db_url.strip_prefix("sqlite://") else {
        bail!("invalid --db value: {db_url}");
    };
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        bail!("invalid --db value: {db_url}");
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}
