use roadmap_core::model::{Follow, RoadmapId, UserId};

use super::SqliteRepository;
use super::mapping::{conn, map_follow_row, u64_to_i64};
use crate::repository::{FollowRepository, StorageError};

const FOLLOW_COLUMNS: &str = "user_id, roadmap_id, cursor, started_at, completed_at, version";

#[async_trait::async_trait]
impl FollowRepository for SqliteRepository {
    async fn get_follow(
        &self,
        user: UserId,
        roadmap: RoadmapId,
    ) -> Result<Option<Follow>, StorageError> {
        let sql = format!(
            "SELECT {FOLLOW_COLUMNS} FROM roadmap_follows WHERE user_id = ?1 AND roadmap_id = ?2"
        );
        let row = sqlx::query(&sql)
            .bind(u64_to_i64("user_id", user.value())?)
            .bind(u64_to_i64("roadmap_id", roadmap.value())?)
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?;

        row.as_ref().map(map_follow_row).transpose()
    }

    async fn insert_follow_if_absent(
        &self,
        follow: &Follow,
    ) -> Result<(Follow, bool), StorageError> {
        let user = u64_to_i64("user_id", follow.user_id().value())?;
        let roadmap = u64_to_i64("roadmap_id", follow.roadmap_id().value())?;
        let mut tx = self.pool.begin().await.map_err(conn)?;

        let exists = sqlx::query("SELECT 1 FROM roadmaps WHERE id = ?1")
            .bind(roadmap)
            .fetch_optional(&mut *tx)
            .await
            .map_err(conn)?;
        if exists.is_none() {
            return Err(StorageError::NotFound);
        }

        let res = sqlx::query(
            r"
            INSERT INTO roadmap_follows (user_id, roadmap_id, cursor, started_at, completed_at, version)
            VALUES (?1, ?2, ?3, ?4, ?5, 0)
            ON CONFLICT(user_id, roadmap_id) DO NOTHING
            ",
        )
        .bind(user)
        .bind(roadmap)
        .bind(i64::from(follow.cursor()))
        .bind(follow.started_at())
        .bind(follow.completed_at())
        .execute(&mut *tx)
        .await
        .map_err(conn)?;
        let created = res.rows_affected() > 0;

        let sql = format!(
            "SELECT {FOLLOW_COLUMNS} FROM roadmap_follows WHERE user_id = ?1 AND roadmap_id = ?2"
        );
        let row = sqlx::query(&sql)
            .bind(user)
            .bind(roadmap)
            .fetch_one(&mut *tx)
            .await
            .map_err(conn)?;
        let stored = map_follow_row(&row)?;

        tx.commit().await.map_err(conn)?;
        Ok((stored, created))
    }

    async fn delete_follow(&self, user: UserId, roadmap: RoadmapId) -> Result<bool, StorageError> {
        let res = sqlx::query("DELETE FROM roadmap_follows WHERE user_id = ?1 AND roadmap_id = ?2")
            .bind(u64_to_i64("user_id", user.value())?)
            .bind(u64_to_i64("roadmap_id", roadmap.value())?)
            .execute(&self.pool)
            .await
            .map_err(conn)?;
        Ok(res.rows_affected() > 0)
    }

    async fn update_follow_cursor(
        &self,
        follow: &Follow,
        expected_version: u64,
    ) -> Result<Option<Follow>, StorageError> {
        // Single statement: the version check and the write are atomic.
        let sql = format!(
            r"
            UPDATE roadmap_follows
            SET cursor = ?3, completed_at = ?4, version = version + 1
            WHERE user_id = ?1 AND roadmap_id = ?2 AND version = ?5
            RETURNING {FOLLOW_COLUMNS}
            "
        );
        let row = sqlx::query(&sql)
            .bind(u64_to_i64("user_id", follow.user_id().value())?)
            .bind(u64_to_i64("roadmap_id", follow.roadmap_id().value())?)
            .bind(i64::from(follow.cursor()))
            .bind(follow.completed_at())
            .bind(u64_to_i64("version", expected_version)?)
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?;

        row.as_ref().map(map_follow_row).transpose()
    }

    async fn follows_for_user(&self, user: UserId) -> Result<Vec<Follow>, StorageError> {
        let sql = format!(
            "SELECT {FOLLOW_COLUMNS} FROM roadmap_follows WHERE user_id = ?1 ORDER BY started_at ASC, roadmap_id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(u64_to_i64("user_id", user.value())?)
            .fetch_all(&self.pool)
            .await
            .map_err(conn)?;

        rows.iter().map(map_follow_row).collect()
    }
}
