use chrono::{DateTime, Utc};
use roadmap_core::model::{Roadmap, RoadmapId, UserId, Visibility};

use super::SqliteRepository;
use super::mapping::{conn, map_roadmap_row, roadmap_id_from_i64, u64_to_i64};
use crate::repository::{RoadmapFilter, RoadmapRepository, StorageError};

const ROADMAP_COLUMNS: &str = "id, owner_id, title, description, difficulty, visibility, \
     estimated_hours, created_at, updated_at";

// LIKE treats `%` and `_` as wildcards; search input is matched literally.
fn like_pattern(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len() + 2);
    escaped.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

#[async_trait::async_trait]
impl RoadmapRepository for SqliteRepository {
    async fn insert_new_roadmap(&self, roadmap: &Roadmap) -> Result<RoadmapId, StorageError> {
        let res = sqlx::query(
            r"
            INSERT INTO roadmaps (owner_id, title, description, difficulty, visibility, estimated_hours, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ",
        )
        .bind(u64_to_i64("owner_id", roadmap.owner_id().value())?)
        .bind(roadmap.title())
        .bind(roadmap.description())
        .bind(roadmap.difficulty().as_str())
        .bind(roadmap.visibility().as_str())
        .bind(i64::from(roadmap.estimated_hours()))
        .bind(roadmap.created_at())
        .bind(roadmap.updated_at())
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        roadmap_id_from_i64(res.last_insert_rowid())
    }

    async fn update_roadmap(&self, roadmap: &Roadmap) -> Result<(), StorageError> {
        let res = sqlx::query(
            r"
            UPDATE roadmaps SET
                title = ?2,
                description = ?3,
                difficulty = ?4,
                visibility = ?5,
                estimated_hours = ?6,
                updated_at = ?7
            WHERE id = ?1
            ",
        )
        .bind(u64_to_i64("roadmap_id", roadmap.id().value())?)
        .bind(roadmap.title())
        .bind(roadmap.description())
        .bind(roadmap.difficulty().as_str())
        .bind(roadmap.visibility().as_str())
        .bind(i64::from(roadmap.estimated_hours()))
        .bind(roadmap.updated_at())
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn get_roadmap(&self, id: RoadmapId) -> Result<Option<Roadmap>, StorageError> {
        let sql = format!("SELECT {ROADMAP_COLUMNS} FROM roadmaps WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(u64_to_i64("roadmap_id", id.value())?)
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?;

        row.as_ref().map(map_roadmap_row).transpose()
    }

    async fn list_public_roadmaps(
        &self,
        filter: &RoadmapFilter,
    ) -> Result<Vec<Roadmap>, StorageError> {
        let mut sql = format!("SELECT {ROADMAP_COLUMNS} FROM roadmaps WHERE visibility = ?1");
        let mut next = 2;

        if filter.difficulty.is_some() {
            sql.push_str(&format!(" AND difficulty = ?{next}"));
            next += 1;
        }
        if filter.max_hours.is_some() {
            sql.push_str(&format!(" AND estimated_hours <= ?{next}"));
            next += 1;
        }
        let needle = filter.needle();
        if needle.is_some() {
            sql.push_str(&format!(
                " AND (LOWER(title) LIKE ?{next} ESCAPE '\\' OR LOWER(description) LIKE ?{next} ESCAPE '\\')"
            ));
            next += 1;
        }
        sql.push_str(&format!(" ORDER BY created_at DESC, id DESC LIMIT ?{next}"));

        let mut query = sqlx::query(&sql).bind(Visibility::Public.as_str());
        if let Some(difficulty) = filter.difficulty {
            query = query.bind(difficulty.as_str());
        }
        if let Some(hours) = filter.max_hours {
            query = query.bind(i64::from(hours));
        }
        if let Some(needle) = needle.as_deref() {
            query = query.bind(like_pattern(needle));
        }
        query = query.bind(i64::from(filter.limit));

        let rows = query.fetch_all(&self.pool).await.map_err(conn)?;
        rows.iter().map(map_roadmap_row).collect()
    }

    async fn count_roadmaps_owned_by(&self, owner: UserId) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM roadmaps WHERE owner_id = ?1")
            .bind(u64_to_i64("owner_id", owner.value())?)
            .fetch_one(&self.pool)
            .await
            .map_err(conn)?;
        u64::try_from(count).map_err(|_| StorageError::Serialization("count sign overflow".into()))
    }

    async fn set_visibility(
        &self,
        id: RoadmapId,
        visibility: Visibility,
        updated_at: DateTime<Utc>,
        revoke_followers: bool,
    ) -> Result<u64, StorageError> {
        let id = u64_to_i64("roadmap_id", id.value())?;
        let mut tx = self.pool.begin().await.map_err(conn)?;

        let res = sqlx::query("UPDATE roadmaps SET visibility = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(id)
            .bind(visibility.as_str())
            .bind(updated_at)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;
        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }

        let mut revoked = 0;
        if revoke_followers {
            revoked = sqlx::query(
                r"
                DELETE FROM roadmap_follows
                WHERE roadmap_id = ?1
                  AND user_id <> (SELECT owner_id FROM roadmaps WHERE id = ?1)
                ",
            )
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(conn)?
            .rows_affected();
        }

        tx.commit().await.map_err(conn)?;
        Ok(revoked)
    }

    async fn delete_roadmap(&self, id: RoadmapId) -> Result<(), StorageError> {
        let id = u64_to_i64("roadmap_id", id.value())?;
        let mut tx = self.pool.begin().await.map_err(conn)?;

        // Children first; does not rely on ON DELETE CASCADE.
        sqlx::query("DELETE FROM roadmap_follows WHERE roadmap_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;
        sqlx::query(
            "DELETE FROM step_videos WHERE step_id IN (SELECT id FROM roadmap_steps WHERE roadmap_id = ?1)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(conn)?;
        sqlx::query("DELETE FROM roadmap_steps WHERE roadmap_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;
        let res = sqlx::query("DELETE FROM roadmaps WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(conn)?;

        if res.rows_affected() == 0 {
            // Dropping the transaction rolls it back.
            return Err(StorageError::NotFound);
        }
        tx.commit().await.map_err(conn)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::like_pattern;

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("rust"), "%rust%");
        assert_eq!(like_pattern("100%_"), "%100\\%\\_%");
    }
}
