use chrono::{DateTime, Utc};
use roadmap_core::model::{
    Difficulty, Follow, Roadmap, RoadmapId, StepId, UserId, VideoId, Visibility, WatchRecord,
};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn conn<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

pub(crate) fn u64_to_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

pub(crate) fn roadmap_id_from_i64(v: i64) -> Result<RoadmapId, StorageError> {
    Ok(RoadmapId::new(i64_to_u64("roadmap_id", v)?))
}

pub(crate) fn step_id_from_i64(v: i64) -> Result<StepId, StorageError> {
    Ok(StepId::new(i64_to_u64("step_id", v)?))
}

pub(crate) fn user_id_from_i64(v: i64) -> Result<UserId, StorageError> {
    Ok(UserId::new(i64_to_u64("user_id", v)?))
}

pub(crate) fn video_id_from_i64(v: i64) -> Result<VideoId, StorageError> {
    Ok(VideoId::new(i64_to_u64("video_id", v)?))
}

fn u32_from_i64(field: &'static str, v: i64) -> Result<u32, StorageError> {
    u32::try_from(v).map_err(|_| StorageError::Serialization(format!("invalid {field}: {v}")))
}

pub(crate) fn map_roadmap_row(row: &SqliteRow) -> Result<Roadmap, StorageError> {
    let difficulty: String = row.try_get("difficulty").map_err(ser)?;
    let visibility: String = row.try_get("visibility").map_err(ser)?;
    let hours: i64 = row.try_get("estimated_hours").map_err(ser)?;

    Roadmap::from_persisted(
        roadmap_id_from_i64(row.try_get("id").map_err(ser)?)?,
        user_id_from_i64(row.try_get("owner_id").map_err(ser)?)?,
        row.try_get("title").map_err(ser)?,
        row.try_get("description").map_err(ser)?,
        Difficulty::parse(&difficulty).map_err(ser)?,
        Visibility::parse(&visibility).map_err(ser)?,
        u32_from_i64("estimated_hours", hours)?,
        row.try_get("created_at").map_err(ser)?,
        row.try_get("updated_at").map_err(ser)?,
    )
    .map_err(ser)
}

pub(crate) fn map_follow_row(row: &SqliteRow) -> Result<Follow, StorageError> {
    let cursor: i64 = row.try_get("cursor").map_err(ser)?;
    let version: i64 = row.try_get("version").map_err(ser)?;
    let completed_at: Option<DateTime<Utc>> = row.try_get("completed_at").map_err(ser)?;

    Ok(Follow::from_persisted(
        user_id_from_i64(row.try_get("user_id").map_err(ser)?)?,
        roadmap_id_from_i64(row.try_get("roadmap_id").map_err(ser)?)?,
        u32_from_i64("cursor", cursor)?,
        row.try_get("started_at").map_err(ser)?,
        completed_at,
        i64_to_u64("version", version)?,
    ))
}

pub(crate) fn map_watch_row(row: &SqliteRow) -> Result<WatchRecord, StorageError> {
    Ok(WatchRecord {
        user_id: user_id_from_i64(row.try_get("user_id").map_err(ser)?)?,
        video_id: video_id_from_i64(row.try_get("video_id").map_err(ser)?)?,
        watched_seconds: row.try_get("watched_seconds").map_err(ser)?,
        watched_percentage: row.try_get("watched_percentage").map_err(ser)?,
        last_watched_at: row.try_get("last_watched_at").map_err(ser)?,
    })
}

/// `?start, ?start+1, ...` placeholders for an `IN (...)` list.
pub(crate) fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_are_numbered_from_start() {
        assert_eq!(placeholders(2, 3), "?2, ?3, ?4");
        assert_eq!(placeholders(1, 0), "");
    }

    #[test]
    fn negative_ids_are_rejected() {
        assert!(matches!(
            roadmap_id_from_i64(-1),
            Err(StorageError::Serialization(_))
        ));
    }
}
