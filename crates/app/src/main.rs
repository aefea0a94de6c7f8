use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use roadmap_core::model::RoadmapId;
use services::{
    AppServices, Clock, NewRoadmap, NewStep, ProgressError, RoadmapEdit, RoadmapServiceError,
    Viewer, WatchServiceError,
};
use storage::repository::RoadmapFilter;

mod config;
mod seed;

use config::{Cli, Command, cursor_move, normalize_sqlite_url, prepare_sqlite_file};

fn init_tracing(log_level: &str) {
    // Logs go to stderr; stdout carries the JSON result.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("roadmap={log_level},services={log_level},storage={log_level},warn").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn to_json<T: Serialize>(value: &T) -> anyhow::Result<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Stable code for failures a caller is expected to handle.
fn failure_code(err: &anyhow::Error) -> Option<&'static str> {
    if let Some(e) = err.downcast_ref::<ProgressError>() {
        return match e {
            ProgressError::NotFound => Some("not_found"),
            ProgressError::NotFollowing => Some("not_following"),
            ProgressError::PermissionDenied => Some("permission_denied"),
            ProgressError::Conflict { .. } => Some("conflict"),
            _ => None,
        };
    }
    if let Some(e) = err.downcast_ref::<RoadmapServiceError>() {
        return match e {
            RoadmapServiceError::NotFound => Some("not_found"),
            RoadmapServiceError::PermissionDenied => Some("permission_denied"),
            RoadmapServiceError::DuplicateOrder { .. } => Some("duplicate_order"),
            RoadmapServiceError::Roadmap(_) | RoadmapServiceError::Step(_) => Some("invalid_input"),
            _ => None,
        };
    }
    if let Some(WatchServiceError::InvalidProgress(_)) = err.downcast_ref::<WatchServiceError>() {
        return Some("invalid_progress");
    }
    None
}

async fn dispatch(app: &AppServices, db_url: &str, command: Command) -> anyhow::Result<Value> {
    match command {
        Command::InitDb => Ok(json!({ "database": db_url, "migrated": true })),
        Command::Seed => to_json(&seed::seed(app).await?),
        Command::Create {
            user,
            title,
            description,
            difficulty,
            visibility,
            hours,
        } => {
            let roadmap = app
                .roadmaps()
                .create_roadmap(
                    user,
                    NewRoadmap {
                        title,
                        description,
                        difficulty,
                        visibility,
                        estimated_hours: hours,
                    },
                )
                .await?;
            to_json(&roadmap)
        }
        Command::Edit {
            user,
            roadmap,
            title,
            description,
            difficulty,
            hours,
        } => {
            let edit = RoadmapEdit {
                title,
                description,
                difficulty,
                estimated_hours: hours,
            };
            to_json(&app.roadmaps().update_roadmap(user, roadmap, edit).await?)
        }
        Command::AddStep {
            user,
            roadmap,
            title,
            kind,
            order,
            videos,
        } => {
            let step = app
                .roadmaps()
                .add_step(
                    user,
                    roadmap,
                    NewStep {
                        kind,
                        title,
                        order,
                        videos,
                    },
                )
                .await?;
            to_json(&step)
        }
        Command::RemoveStep {
            user,
            roadmap,
            step,
        } => {
            app.roadmaps().remove_step(user, roadmap, step).await?;
            Ok(json!({ "roadmap_id": roadmap, "removed_step": step }))
        }
        Command::NextOrder { roadmap } => {
            let order = app.roadmaps().suggested_next_order(roadmap).await?;
            Ok(json!({ "roadmap_id": roadmap, "next_order": order }))
        }
        Command::Visibility {
            user,
            roadmap,
            visibility,
        } => to_json(
            &app.roadmaps()
                .set_visibility(user, roadmap, visibility)
                .await?,
        ),
        Command::Delete { user, roadmap } => {
            app.roadmaps().delete_roadmap(user, roadmap).await?;
            Ok(json!({ "deleted": roadmap }))
        }
        Command::Catalog {
            difficulty,
            max_hours,
            search,
            limit,
        } => {
            let filter = RoadmapFilter {
                difficulty,
                max_hours,
                search,
                limit,
            };
            to_json(&app.roadmaps().catalog(&filter).await?)
        }
        Command::Show { roadmap, user } => show(app, roadmap, Viewer::from(user)).await,
        Command::Follow { user, roadmap } => to_json(&app.progress().follow(user, roadmap).await?),
        Command::Unfollow { user, roadmap } => {
            to_json(&app.progress().unfollow(user, roadmap).await?)
        }
        Command::Advance {
            user,
            roadmap,
            next,
            prev,
            set,
        } => {
            let mv = cursor_move(next, prev, set)?;
            to_json(&app.progress().advance(user, roadmap, mv).await?)
        }
        Command::AutoAdvance { user, roadmap } => {
            to_json(&app.progress().auto_advance(user, roadmap).await?)
        }
        Command::Reset { user, roadmap } => to_json(&app.progress().reset(user, roadmap).await?),
        Command::Watch {
            user,
            video,
            seconds,
            percentage,
        } => to_json(
            &app.watch()
                .record_watch(user, video, seconds, percentage)
                .await?,
        ),
        Command::Dashboard { user } => to_json(&app.stats().dashboard(user).await?),
        Command::Stats { user } => to_json(&app.stats().stats(user).await?),
    }
}

async fn show(app: &AppServices, roadmap: RoadmapId, viewer: Viewer) -> anyhow::Result<Value> {
    let view = app.progress().aggregate(roadmap, viewer).await?;
    let mut value = to_json(&view)?;
    if let Some(obj) = value.as_object_mut() {
        let next_order = app.roadmaps().suggested_next_order(roadmap).await?;
        obj.insert("next_order".into(), json!(next_order));
    }
    Ok(value)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let db_url = normalize_sqlite_url(&cli.args.db_url);
    prepare_sqlite_file(&db_url).with_context(|| format!("preparing database at {db_url}"))?;

    let app = AppServices::new_sqlite(&db_url, Clock::default_clock(), cli.args.progress_config())
        .await
        .with_context(|| format!("opening database at {db_url}"))?;
    info!(database = %db_url, "storage ready");

    let output = dispatch(&app, &db_url, cli.command).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(&cli.args.log_level);

    match run(cli).await {
        Ok(()) => Ok(()),
        Err(err) => match failure_code(&err) {
            Some(code) => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({
                        "error": code,
                        "message": err.to_string(),
                    }))?
                );
                std::process::exit(1);
            }
            None => Err(err),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use roadmap_core::model::{CursorMove, UserId};
    use roadmap_core::time::fixed_now;
    use services::ProgressConfig;

    fn app() -> AppServices {
        AppServices::in_memory(Clock::fixed(fixed_now()), ProgressConfig::default())
    }

    #[tokio::test]
    async fn service_failures_map_to_stable_codes() {
        let app = app();
        let err: anyhow::Error = app
            .progress()
            .advance(UserId::new(1), RoadmapId::new(9), CursorMove::Next)
            .await
            .unwrap_err()
            .into();
        assert_eq!(failure_code(&err), Some("not_found"));

        let err = anyhow::anyhow!("disk on fire");
        assert_eq!(failure_code(&err), None);
    }

    #[tokio::test]
    async fn show_adds_next_order_to_the_aggregate() {
        let app = app();
        let summary = seed::seed(&app).await.unwrap();
        let value = show(&app, summary.roadmaps[0], Viewer::Anonymous)
            .await
            .unwrap();
        assert_eq!(value["next_order"], json!(4));
        assert_eq!(value["state"], json!("not_following"));
        assert_eq!(value["progress"]["overall_percent"], json!(0));
    }

    #[tokio::test]
    async fn follow_twice_reports_already_following() {
        let app = app();
        let summary = seed::seed(&app).await.unwrap();
        let command = Command::Follow {
            user: seed::DEMO_LEARNER,
            roadmap: summary.roadmaps[0],
        };
        let value = dispatch(&app, "sqlite::memory:", command).await.unwrap();
        assert_eq!(value["outcome"], json!("already_following"));
    }
}
