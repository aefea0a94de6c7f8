use std::collections::HashMap;

use chrono::{DateTime, Utc};
use roadmap_core::model::{RoadmapId, Step, StepId, StepKind};
use sqlx::{Row, SqliteConnection};

use super::SqliteRepository;
use super::mapping::{conn, ser, step_id_from_i64, u64_to_i64, video_id_from_i64};
use crate::repository::{StepRepository, StorageError};

fn insert_error(e: sqlx::Error) -> StorageError {
    match e.as_database_error() {
        Some(db) if db.is_unique_violation() => StorageError::Conflict,
        Some(db) if db.is_foreign_key_violation() => StorageError::NotFound,
        _ => conn(e),
    }
}

/// Brings every follow of `roadmap_id` in line with its current step count:
/// the cursor is clamped and `completed_at` is set exactly when
/// `cursor >= total`. Touched rows get a new version so in-flight cursor
/// writes retry against the new total.
async fn reconcile_follows(
    tx: &mut SqliteConnection,
    roadmap_id: i64,
    now: DateTime<Utc>,
) -> Result<u64, StorageError> {
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM roadmap_steps WHERE roadmap_id = ?1")
        .bind(roadmap_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(conn)?;

    let res = sqlx::query(
        r"
        UPDATE roadmap_follows
        SET cursor = MIN(cursor, ?2),
            completed_at = CASE WHEN cursor >= ?2 THEN COALESCE(completed_at, ?3) ELSE NULL END,
            version = version + 1
        WHERE roadmap_id = ?1
          AND (cursor > ?2 OR (completed_at IS NULL) = (cursor >= ?2))
        ",
    )
    .bind(roadmap_id)
    .bind(total)
    .bind(now)
    .execute(&mut *tx)
    .await
    .map_err(conn)?;
    Ok(res.rows_affected())
}

#[async_trait::async_trait]
impl StepRepository for SqliteRepository {
    async fn insert_step(&self, step: &Step, now: DateTime<Utc>) -> Result<StepId, StorageError> {
        let roadmap_id = u64_to_i64("roadmap_id", step.roadmap_id().value())?;
        let mut tx = self.pool.begin().await.map_err(conn)?;

        let exists = sqlx::query("SELECT 1 FROM roadmaps WHERE id = ?1")
            .bind(roadmap_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(conn)?;
        if exists.is_none() {
            return Err(StorageError::NotFound);
        }

        let res = sqlx::query(
            r"
            INSERT INTO roadmap_steps (roadmap_id, kind, title, order_index)
            VALUES (?1, ?2, ?3, ?4)
            ",
        )
        .bind(roadmap_id)
        .bind(step.kind().as_str())
        .bind(step.title())
        .bind(i64::from(step.order()))
        .execute(&mut *tx)
        .await
        .map_err(insert_error)?;
        let step_id = res.last_insert_rowid();

        for (position, video) in step.videos().iter().enumerate() {
            sqlx::query(
                r"
                INSERT INTO step_videos (step_id, video_id, position)
                VALUES (?1, ?2, ?3)
                ",
            )
            .bind(step_id)
            .bind(u64_to_i64("video_id", video.value())?)
            .bind(i64::try_from(position).map_err(ser)?)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;
        }

        reconcile_follows(&mut tx, roadmap_id, now).await?;
        tx.commit().await.map_err(conn)?;
        step_id_from_i64(step_id)
    }

    async fn delete_step(
        &self,
        roadmap_id: RoadmapId,
        step_id: StepId,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let roadmap_id = u64_to_i64("roadmap_id", roadmap_id.value())?;
        let step_id = u64_to_i64("step_id", step_id.value())?;
        let mut tx = self.pool.begin().await.map_err(conn)?;

        sqlx::query(
            r"
            DELETE FROM step_videos
            WHERE step_id IN (SELECT id FROM roadmap_steps WHERE id = ?1 AND roadmap_id = ?2)
            ",
        )
        .bind(step_id)
        .bind(roadmap_id)
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        let res = sqlx::query("DELETE FROM roadmap_steps WHERE id = ?1 AND roadmap_id = ?2")
            .bind(step_id)
            .bind(roadmap_id)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;
        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }

        reconcile_follows(&mut tx, roadmap_id, now).await?;
        tx.commit().await.map_err(conn)?;
        Ok(())
    }

    async fn steps_for_roadmap(&self, roadmap_id: RoadmapId) -> Result<Vec<Step>, StorageError> {
        let rid = u64_to_i64("roadmap_id", roadmap_id.value())?;

        let step_rows = sqlx::query(
            r"
            SELECT id, kind, title, order_index
            FROM roadmap_steps
            WHERE roadmap_id = ?1
            ORDER BY order_index ASC, id ASC
            ",
        )
        .bind(rid)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let video_rows = sqlx::query(
            r"
            SELECT sv.step_id, sv.video_id
            FROM step_videos sv
            JOIN roadmap_steps s ON s.id = sv.step_id
            WHERE s.roadmap_id = ?1
            ORDER BY sv.step_id ASC, sv.position ASC
            ",
        )
        .bind(rid)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut videos_by_step = HashMap::new();
        for row in &video_rows {
            let step_id: i64 = row.try_get("step_id").map_err(ser)?;
            let video = video_id_from_i64(row.try_get("video_id").map_err(ser)?)?;
            videos_by_step
                .entry(step_id)
                .or_insert_with(Vec::new)
                .push(video);
        }

        let mut steps = Vec::with_capacity(step_rows.len());
        for row in &step_rows {
            let id: i64 = row.try_get("id").map_err(ser)?;
            let kind: String = row.try_get("kind").map_err(ser)?;
            let order: i64 = row.try_get("order_index").map_err(ser)?;
            let step = Step::new(
                step_id_from_i64(id)?,
                roadmap_id,
                StepKind::parse(&kind).map_err(ser)?,
                row.try_get::<String, _>("title").map_err(ser)?,
                u32::try_from(order)
                    .map_err(|_| StorageError::Serialization(format!("invalid order: {order}")))?,
                videos_by_step.remove(&id).unwrap_or_default(),
            )
            .map_err(ser)?;
            steps.push(step);
        }
        Ok(steps)
    }
}
