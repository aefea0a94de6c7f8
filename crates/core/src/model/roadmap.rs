use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::{RoadmapId, UserId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RoadmapError {
    #[error("roadmap title cannot be empty")]
    EmptyTitle,

    #[error("unknown difficulty: {0}")]
    UnknownDifficulty(String),

    #[error("unknown visibility: {0}")]
    UnknownVisibility(String),
}

//
// ─── DIFFICULTY / VISIBILITY ───────────────────────────────────────────────────
//

/// Difficulty tier advertised on a roadmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    #[default]
    Beginner,
    Intermediate,
    Advanced,
}

impl Difficulty {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Difficulty::Beginner => "beginner",
            Difficulty::Intermediate => "intermediate",
            Difficulty::Advanced => "advanced",
        }
    }

    /// Parses the stable string encoding.
    ///
    /// # Errors
    ///
    /// Returns `RoadmapError::UnknownDifficulty` for anything else.
    pub fn parse(s: &str) -> Result<Self, RoadmapError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "beginner" => Ok(Self::Beginner),
            "intermediate" => Ok(Self::Intermediate),
            "advanced" => Ok(Self::Advanced),
            other => Err(RoadmapError::UnknownDifficulty(other.to_owned())),
        }
    }
}

/// Whether a roadmap shows up in the catalog and accepts new followers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    Private,
}

impl Visibility {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
        }
    }

    /// Parses the stable string encoding.
    ///
    /// # Errors
    ///
    /// Returns `RoadmapError::UnknownVisibility` for anything else.
    pub fn parse(s: &str) -> Result<Self, RoadmapError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "public" => Ok(Self::Public),
            "private" => Ok(Self::Private),
            other => Err(RoadmapError::UnknownVisibility(other.to_owned())),
        }
    }

    #[must_use]
    pub fn is_public(self) -> bool {
        matches!(self, Visibility::Public)
    }
}

//
// ─── ROADMAP ───────────────────────────────────────────────────────────────────
//

/// A curated, ordered learning path owned by one user.
///
/// The steps live in their own collection; a `Roadmap` only carries the
/// header data that the owner edits.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Roadmap {
    id: RoadmapId,
    owner_id: UserId,
    title: String,
    description: String,
    difficulty: Difficulty,
    visibility: Visibility,
    estimated_hours: u32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Roadmap {
    /// Creates a new roadmap.
    ///
    /// # Errors
    ///
    /// Returns `RoadmapError::EmptyTitle` if the title is empty or whitespace-only.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: RoadmapId,
        owner_id: UserId,
        title: impl Into<String>,
        description: impl Into<String>,
        difficulty: Difficulty,
        visibility: Visibility,
        estimated_hours: u32,
        created_at: DateTime<Utc>,
    ) -> Result<Self, RoadmapError> {
        let title = title.into();
        if title.trim().is_empty() {
            return Err(RoadmapError::EmptyTitle);
        }

        Ok(Self {
            id,
            owner_id,
            title: title.trim().to_owned(),
            description: description.into().trim().to_owned(),
            difficulty,
            visibility,
            estimated_hours,
            created_at,
            updated_at: created_at,
        })
    }

    /// Rehydrates a roadmap from storage, keeping both timestamps.
    ///
    /// # Errors
    ///
    /// Returns `RoadmapError::EmptyTitle` if the stored title is blank.
    #[allow(clippy::too_many_arguments)]
    pub fn from_persisted(
        id: RoadmapId,
        owner_id: UserId,
        title: String,
        description: String,
        difficulty: Difficulty,
        visibility: Visibility,
        estimated_hours: u32,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<Self, RoadmapError> {
        let mut roadmap = Self::new(
            id,
            owner_id,
            title,
            description,
            difficulty,
            visibility,
            estimated_hours,
            created_at,
        )?;
        roadmap.updated_at = updated_at;
        Ok(roadmap)
    }

    /// Returns a copy carrying a storage-assigned id.
    #[must_use]
    pub fn with_id(mut self, id: RoadmapId) -> Self {
        self.id = id;
        self
    }

    /// Replaces the editable header fields.
    ///
    /// # Errors
    ///
    /// Returns `RoadmapError::EmptyTitle` if the new title is blank; the
    /// roadmap is left untouched in that case.
    pub fn edit(
        &mut self,
        title: impl Into<String>,
        description: impl Into<String>,
        difficulty: Difficulty,
        estimated_hours: u32,
        now: DateTime<Utc>,
    ) -> Result<(), RoadmapError> {
        let title = title.into();
        if title.trim().is_empty() {
            return Err(RoadmapError::EmptyTitle);
        }
        self.title = title.trim().to_owned();
        self.description = description.into().trim().to_owned();
        self.difficulty = difficulty;
        self.estimated_hours = estimated_hours;
        self.updated_at = now;
        Ok(())
    }

    pub fn set_visibility(&mut self, visibility: Visibility, now: DateTime<Utc>) {
        self.visibility = visibility;
        self.updated_at = now;
    }

    #[must_use]
    pub fn is_owned_by(&self, user: UserId) -> bool {
        self.owner_id == user
    }

    /// Public roadmaps accept anyone; private ones only their owner.
    #[must_use]
    pub fn is_visible_to(&self, user: UserId) -> bool {
        self.visibility.is_public() || self.is_owned_by(user)
    }

    // Accessors
    #[must_use]
    pub fn id(&self) -> RoadmapId {
        self.id
    }

    #[must_use]
    pub fn owner_id(&self) -> UserId {
        self.owner_id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    #[must_use]
    pub fn difficulty(&self) -> Difficulty {
        self.difficulty
    }

    #[must_use]
    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    #[must_use]
    pub fn estimated_hours(&self) -> u32 {
        self.estimated_hours
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
