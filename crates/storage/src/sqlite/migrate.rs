use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

const SCHEMA_V1: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS roadmaps (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        owner_id INTEGER NOT NULL,
        title TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        difficulty TEXT NOT NULL,
        visibility TEXT NOT NULL,
        estimated_hours INTEGER NOT NULL CHECK (estimated_hours >= 0),
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    ",
    r"
    CREATE TABLE IF NOT EXISTS roadmap_steps (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        roadmap_id INTEGER NOT NULL,
        kind TEXT NOT NULL,
        title TEXT NOT NULL,
        order_index INTEGER NOT NULL CHECK (order_index >= 0),
        UNIQUE (roadmap_id, order_index),
        FOREIGN KEY (roadmap_id) REFERENCES roadmaps(id) ON DELETE CASCADE
    );
    ",
    r"
    CREATE TABLE IF NOT EXISTS step_videos (
        step_id INTEGER NOT NULL,
        video_id INTEGER NOT NULL,
        position INTEGER NOT NULL,
        PRIMARY KEY (step_id, video_id),
        FOREIGN KEY (step_id) REFERENCES roadmap_steps(id) ON DELETE CASCADE
    );
    ",
    r"
    CREATE TABLE IF NOT EXISTS roadmap_follows (
        user_id INTEGER NOT NULL,
        roadmap_id INTEGER NOT NULL,
        cursor INTEGER NOT NULL CHECK (cursor >= 0),
        started_at TEXT NOT NULL,
        completed_at TEXT,
        version INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (user_id, roadmap_id),
        FOREIGN KEY (roadmap_id) REFERENCES roadmaps(id) ON DELETE CASCADE
    );
    ",
    r"
    CREATE TABLE IF NOT EXISTS watch_records (
        user_id INTEGER NOT NULL,
        video_id INTEGER NOT NULL,
        watched_seconds REAL NOT NULL CHECK (watched_seconds >= 0),
        watched_percentage REAL NOT NULL
            CHECK (watched_percentage BETWEEN 0 AND 100),
        last_watched_at TEXT NOT NULL,
        PRIMARY KEY (user_id, video_id)
    );
    ",
    r"
    CREATE INDEX IF NOT EXISTS idx_roadmaps_visibility_created
        ON roadmaps (visibility, created_at);
    ",
    r"
    CREATE INDEX IF NOT EXISTS idx_roadmaps_owner ON roadmaps (owner_id);
    ",
    r"
    CREATE INDEX IF NOT EXISTS idx_roadmap_follows_roadmap
        ON roadmap_follows (roadmap_id);
    ",
];

/// Runs the versioned migrations that have not been applied yet.
///
/// Version 1 creates roadmaps, steps with their videos, follows and watch
/// records.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
    )
    .execute(pool)
    .await?;

    if !is_applied(pool, 1).await? {
        let mut tx = pool.begin().await?;

        for statement in SCHEMA_V1 {
            sqlx::query(*statement).execute(&mut *tx).await?;
        }

        sqlx::query(
            r"
                INSERT INTO schema_migrations (version, applied_at)
                VALUES (?1, ?2)
                ON CONFLICT(version) DO NOTHING
            ",
        )
        .bind(1_i64)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
    }

    Ok(())
}
