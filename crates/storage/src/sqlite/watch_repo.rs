use std::collections::HashMap;

use roadmap_core::model::{UserId, VideoId, WatchRecord};

use super::SqliteRepository;
use super::mapping::{conn, map_watch_row, placeholders, u64_to_i64};
use crate::repository::{StorageError, WatchRecordRepository};

#[async_trait::async_trait]
impl WatchRecordRepository for SqliteRepository {
    async fn watch_records(
        &self,
        user: UserId,
        videos: &[VideoId],
    ) -> Result<HashMap<VideoId, WatchRecord>, StorageError> {
        if videos.is_empty() {
            return Ok(HashMap::new());
        }

        let sql = format!(
            r"
            SELECT user_id, video_id, watched_seconds, watched_percentage, last_watched_at
            FROM watch_records
            WHERE user_id = ?1 AND video_id IN ({})
            ",
            placeholders(2, videos.len())
        );

        let mut query = sqlx::query(&sql).bind(u64_to_i64("user_id", user.value())?);
        for video in videos {
            query = query.bind(u64_to_i64("video_id", video.value())?);
        }

        let rows = query.fetch_all(&self.pool).await.map_err(conn)?;
        let mut records = HashMap::with_capacity(rows.len());
        for row in &rows {
            let record = map_watch_row(row)?;
            records.insert(record.video_id, record);
        }
        Ok(records)
    }

    async fn get_watch_record(
        &self,
        user: UserId,
        video: VideoId,
    ) -> Result<Option<WatchRecord>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT user_id, video_id, watched_seconds, watched_percentage, last_watched_at
            FROM watch_records
            WHERE user_id = ?1 AND video_id = ?2
            ",
        )
        .bind(u64_to_i64("user_id", user.value())?)
        .bind(u64_to_i64("video_id", video.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        row.as_ref().map(map_watch_row).transpose()
    }

    async fn upsert_watch_record(&self, record: &WatchRecord) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO watch_records (user_id, video_id, watched_seconds, watched_percentage, last_watched_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(user_id, video_id) DO UPDATE SET
                watched_seconds = excluded.watched_seconds,
                watched_percentage = excluded.watched_percentage,
                last_watched_at = excluded.last_watched_at
            ",
        )
        .bind(u64_to_i64("user_id", record.user_id.value())?)
        .bind(u64_to_i64("video_id", record.video_id.value())?)
        .bind(record.watched_seconds)
        .bind(record.watched_percentage)
        .bind(record.last_watched_at)
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        Ok(())
    }

    async fn total_watched_seconds(&self, user: UserId) -> Result<f64, StorageError> {
        let total: f64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(watched_seconds), 0.0) FROM watch_records WHERE user_id = ?1",
        )
        .bind(u64_to_i64("user_id", user.value())?)
        .fetch_one(&self.pool)
        .await
        .map_err(conn)?;
        Ok(total)
    }
}
