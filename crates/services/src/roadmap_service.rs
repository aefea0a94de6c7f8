use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use roadmap_core::model::{
    Difficulty, Roadmap, RoadmapId, Step, StepId, StepKind, UserId, VideoId, Visibility,
    next_order,
};
use storage::repository::{RoadmapFilter, RoadmapRepository, StepRepository, StorageError};

use crate::Clock;
use crate::error::RoadmapServiceError;
use crate::progress_service::VisibilityPolicy;

/// Input for a new roadmap.
#[derive(Debug, Clone)]
pub struct NewRoadmap {
    pub title: String,
    pub description: String,
    pub difficulty: Difficulty,
    pub visibility: Visibility,
    pub estimated_hours: u32,
}

/// Editable header fields.
#[derive(Debug, Clone)]
pub struct RoadmapEdit {
    pub title: String,
    pub description: String,
    pub difficulty: Difficulty,
    pub estimated_hours: u32,
}

/// Input for a new step. Without an `order` the next free one is used.
#[derive(Debug, Clone)]
pub struct NewStep {
    pub kind: StepKind,
    pub title: String,
    pub order: Option<u32>,
    pub videos: Vec<VideoId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VisibilityChange {
    pub roadmap_id: RoadmapId,
    pub visibility: Visibility,
    pub revoked_follows: u64,
}

fn not_found(e: StorageError) -> RoadmapServiceError {
    match e {
        StorageError::NotFound => RoadmapServiceError::NotFound,
        other => RoadmapServiceError::Storage(other),
    }
}

/// Owner-side management of roadmaps and their steps, plus the catalog.
#[derive(Clone)]
pub struct RoadmapService {
    clock: Clock,
    policy: VisibilityPolicy,
    roadmaps: Arc<dyn RoadmapRepository>,
    steps: Arc<dyn StepRepository>,
}

impl RoadmapService {
    #[must_use]
    pub fn new(
        clock: Clock,
        policy: VisibilityPolicy,
        roadmaps: Arc<dyn RoadmapRepository>,
        steps: Arc<dyn StepRepository>,
    ) -> Self {
        Self {
            clock,
            policy,
            roadmaps,
            steps,
        }
    }

    /// Create a roadmap owned by `owner`.
    ///
    /// # Errors
    ///
    /// Returns `RoadmapServiceError::Roadmap` for validation failures.
    /// Returns `RoadmapServiceError::Storage` if persistence fails.
    pub async fn create_roadmap(
        &self,
        owner: UserId,
        input: NewRoadmap,
    ) -> Result<Roadmap, RoadmapServiceError> {
        let roadmap = Roadmap::new(
            RoadmapId::new(0),
            owner,
            input.title,
            input.description,
            input.difficulty,
            input.visibility,
            input.estimated_hours,
            self.clock.now(),
        )?;
        let id = self.roadmaps.insert_new_roadmap(&roadmap).await?;
        info!(roadmap_id = %id, owner_id = %owner, "created roadmap");
        Ok(roadmap.with_id(id))
    }

    /// Fetch a roadmap by ID.
    ///
    /// # Errors
    ///
    /// Returns `RoadmapServiceError::NotFound` if it does not exist.
    pub async fn get_roadmap(&self, id: RoadmapId) -> Result<Roadmap, RoadmapServiceError> {
        self.roadmaps
            .get_roadmap(id)
            .await?
            .ok_or(RoadmapServiceError::NotFound)
    }

    /// # Errors
    ///
    /// Returns `RoadmapServiceError::PermissionDenied` for non-owners and
    /// `RoadmapServiceError::Roadmap` if the new title is blank.
    pub async fn update_roadmap(
        &self,
        actor: UserId,
        id: RoadmapId,
        edit: RoadmapEdit,
    ) -> Result<Roadmap, RoadmapServiceError> {
        let mut roadmap = self.owned_roadmap(actor, id).await?;
        roadmap.edit(
            edit.title,
            edit.description,
            edit.difficulty,
            edit.estimated_hours,
            self.clock.now(),
        )?;
        self.roadmaps
            .update_roadmap(&roadmap)
            .await
            .map_err(not_found)?;
        Ok(roadmap)
    }

    /// Change visibility. Under `VisibilityPolicy::RevokeFollowers` turning a
    /// roadmap private removes every follow but the owner's, in the same
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns `RoadmapServiceError::PermissionDenied` for non-owners.
    pub async fn set_visibility(
        &self,
        actor: UserId,
        id: RoadmapId,
        visibility: Visibility,
    ) -> Result<VisibilityChange, RoadmapServiceError> {
        self.owned_roadmap(actor, id).await?;
        let revoke = self.policy.revokes() && !visibility.is_public();
        let revoked_follows = self
            .roadmaps
            .set_visibility(id, visibility, self.clock.now(), revoke)
            .await
            .map_err(not_found)?;
        info!(
            roadmap_id = %id,
            visibility = visibility.as_str(),
            revoked_follows,
            "changed roadmap visibility"
        );
        Ok(VisibilityChange {
            roadmap_id: id,
            visibility,
            revoked_follows,
        })
    }

    /// Delete a roadmap with its steps and follows.
    ///
    /// # Errors
    ///
    /// Returns `RoadmapServiceError::PermissionDenied` for non-owners.
    pub async fn delete_roadmap(
        &self,
        actor: UserId,
        id: RoadmapId,
    ) -> Result<(), RoadmapServiceError> {
        self.owned_roadmap(actor, id).await?;
        self.roadmaps.delete_roadmap(id).await.map_err(not_found)?;
        info!(roadmap_id = %id, "deleted roadmap");
        Ok(())
    }

    /// Append a step. An explicit order already taken in this roadmap is
    /// rejected with `DuplicateOrder`, never overwritten. Existing follows are
    /// reconciled with the new step count in the same write.
    ///
    /// # Errors
    ///
    /// Returns `RoadmapServiceError::DuplicateOrder`,
    /// `RoadmapServiceError::PermissionDenied` or `RoadmapServiceError::Step`.
    pub async fn add_step(
        &self,
        actor: UserId,
        roadmap_id: RoadmapId,
        input: NewStep,
    ) -> Result<Step, RoadmapServiceError> {
        self.owned_roadmap(actor, roadmap_id).await?;
        let existing = self.steps.steps_for_roadmap(roadmap_id).await?;
        let order = input.order.unwrap_or_else(|| next_order(&existing));
        if existing.iter().any(|s| s.order() == order) {
            return Err(RoadmapServiceError::DuplicateOrder { order });
        }

        let step = Step::new(
            StepId::new(0),
            roadmap_id,
            input.kind,
            input.title,
            order,
            input.videos,
        )?;
        let id = match self.steps.insert_step(&step, self.clock.now()).await {
            Ok(id) => id,
            // A concurrent insert took the order between the check and the write.
            Err(StorageError::Conflict) => {
                return Err(RoadmapServiceError::DuplicateOrder { order });
            }
            Err(e) => return Err(not_found(e)),
        };
        info!(roadmap_id = %roadmap_id, step_id = %id, order, "added step");
        Ok(step.with_id(id))
    }

    /// Remove a step. Remaining steps keep their order values; follows past
    /// the new end are clamped and marked complete.
    ///
    /// # Errors
    ///
    /// Returns `RoadmapServiceError::NotFound` if the step is not part of the
    /// roadmap.
    pub async fn remove_step(
        &self,
        actor: UserId,
        roadmap_id: RoadmapId,
        step_id: StepId,
    ) -> Result<(), RoadmapServiceError> {
        self.owned_roadmap(actor, roadmap_id).await?;
        self.steps
            .delete_step(roadmap_id, step_id, self.clock.now())
            .await
            .map_err(not_found)?;
        info!(roadmap_id = %roadmap_id, step_id = %step_id, "removed step");
        Ok(())
    }

    /// Steps in traversal order.
    ///
    /// # Errors
    ///
    /// Returns `RoadmapServiceError::Storage` if repository access fails.
    pub async fn steps(&self, roadmap_id: RoadmapId) -> Result<Vec<Step>, RoadmapServiceError> {
        Ok(self.steps.steps_for_roadmap(roadmap_id).await?)
    }

    /// `max(order) + 1`, or 1 for a roadmap without steps.
    ///
    /// # Errors
    ///
    /// Returns `RoadmapServiceError::NotFound` if the roadmap does not exist.
    pub async fn suggested_next_order(
        &self,
        roadmap_id: RoadmapId,
    ) -> Result<u32, RoadmapServiceError> {
        self.get_roadmap(roadmap_id).await?;
        let steps = self.steps.steps_for_roadmap(roadmap_id).await?;
        Ok(next_order(&steps))
    }

    /// Public roadmaps, newest first.
    ///
    /// # Errors
    ///
    /// Returns `RoadmapServiceError::Storage` if repository access fails.
    pub async fn catalog(&self, filter: &RoadmapFilter) -> Result<Vec<Roadmap>, RoadmapServiceError> {
        Ok(self.roadmaps.list_public_roadmaps(filter).await?)
    }

    async fn owned_roadmap(
        &self,
        actor: UserId,
        id: RoadmapId,
    ) -> Result<Roadmap, RoadmapServiceError> {
        let roadmap = self.get_roadmap(id).await?;
        if !roadmap.is_owned_by(actor) {
            return Err(RoadmapServiceError::PermissionDenied);
        }
        Ok(roadmap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use roadmap_core::time::fixed_now;
    use storage::repository::{FollowRepository, InMemoryRepository};

    fn service(repo: &InMemoryRepository, policy: VisibilityPolicy) -> RoadmapService {
        RoadmapService::new(
            Clock::fixed(fixed_now()),
            policy,
            Arc::new(repo.clone()),
            Arc::new(repo.clone()),
        )
    }

    fn new_roadmap(title: &str) -> NewRoadmap {
        NewRoadmap {
            title: title.into(),
            description: "From zero".into(),
            difficulty: Difficulty::Beginner,
            visibility: Visibility::Public,
            estimated_hours: 12,
        }
    }

    fn new_step(order: Option<u32>) -> NewStep {
        NewStep {
            kind: StepKind::Milestone,
            title: "Basics".into(),
            order,
            videos: vec![VideoId::new(1)],
        }
    }

    #[tokio::test]
    async fn create_assigns_id_and_owner() {
        let repo = InMemoryRepository::new();
        let svc = service(&repo, VisibilityPolicy::KeepFollowers);
        let roadmap = svc
            .create_roadmap(UserId::new(1), new_roadmap("Rust"))
            .await
            .unwrap();
        assert_ne!(roadmap.id(), RoadmapId::new(0));
        assert_eq!(svc.get_roadmap(roadmap.id()).await.unwrap(), roadmap);
    }

    #[tokio::test]
    async fn blank_title_is_rejected() {
        let repo = InMemoryRepository::new();
        let svc = service(&repo, VisibilityPolicy::KeepFollowers);
        let err = svc
            .create_roadmap(UserId::new(1), new_roadmap("   "))
            .await
            .unwrap_err();
        assert!(matches!(err, RoadmapServiceError::Roadmap(_)));
    }

    #[tokio::test]
    async fn duplicate_order_is_surfaced() {
        let repo = InMemoryRepository::new();
        let svc = service(&repo, VisibilityPolicy::KeepFollowers);
        let owner = UserId::new(1);
        let roadmap = svc.create_roadmap(owner, new_roadmap("Rust")).await.unwrap();

        svc.add_step(owner, roadmap.id(), new_step(Some(1)))
            .await
            .unwrap();
        let err = svc
            .add_step(owner, roadmap.id(), new_step(Some(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, RoadmapServiceError::DuplicateOrder { order: 1 }));
        assert_eq!(svc.steps(roadmap.id()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_order_takes_the_next_one() {
        let repo = InMemoryRepository::new();
        let svc = service(&repo, VisibilityPolicy::KeepFollowers);
        let owner = UserId::new(1);
        let roadmap = svc.create_roadmap(owner, new_roadmap("Rust")).await.unwrap();
        assert_eq!(svc.suggested_next_order(roadmap.id()).await.unwrap(), 1);

        svc.add_step(owner, roadmap.id(), new_step(Some(4)))
            .await
            .unwrap();
        let step = svc
            .add_step(owner, roadmap.id(), new_step(None))
            .await
            .unwrap();
        assert_eq!(step.order(), 5);
    }

    #[tokio::test]
    async fn non_owner_cannot_mutate() {
        let repo = InMemoryRepository::new();
        let svc = service(&repo, VisibilityPolicy::KeepFollowers);
        let roadmap = svc
            .create_roadmap(UserId::new(1), new_roadmap("Rust"))
            .await
            .unwrap();
        let stranger = UserId::new(2);

        assert!(matches!(
            svc.add_step(stranger, roadmap.id(), new_step(None)).await,
            Err(RoadmapServiceError::PermissionDenied)
        ));
        assert!(matches!(
            svc.delete_roadmap(stranger, roadmap.id()).await,
            Err(RoadmapServiceError::PermissionDenied)
        ));
        assert!(matches!(
            svc.set_visibility(stranger, roadmap.id(), Visibility::Private)
                .await,
            Err(RoadmapServiceError::PermissionDenied)
        ));
    }

    #[tokio::test]
    async fn removing_unknown_step_is_not_found() {
        let repo = InMemoryRepository::new();
        let svc = service(&repo, VisibilityPolicy::KeepFollowers);
        let owner = UserId::new(1);
        let roadmap = svc.create_roadmap(owner, new_roadmap("Rust")).await.unwrap();
        assert!(matches!(
            svc.remove_step(owner, roadmap.id(), StepId::new(99)).await,
            Err(RoadmapServiceError::NotFound)
        ));
    }

    #[tokio::test]
    async fn update_keeps_creation_time() {
        let repo = InMemoryRepository::new();
        let svc = service(&repo, VisibilityPolicy::KeepFollowers);
        let owner = UserId::new(1);
        let roadmap = svc.create_roadmap(owner, new_roadmap("Rust")).await.unwrap();
        let edited = svc
            .update_roadmap(
                owner,
                roadmap.id(),
                RoadmapEdit {
                    title: "Rust 2024".into(),
                    description: String::new(),
                    difficulty: Difficulty::Advanced,
                    estimated_hours: 30,
                },
            )
            .await
            .unwrap();
        assert_eq!(edited.title(), "Rust 2024");
        assert_eq!(edited.created_at(), roadmap.created_at());
        assert_eq!(svc.get_roadmap(roadmap.id()).await.unwrap(), edited);
    }

    #[tokio::test]
    async fn visibility_policy_controls_revocation() {
        let repo = InMemoryRepository::new();
        let owner = UserId::new(1);
        let keep = service(&repo, VisibilityPolicy::KeepFollowers);
        let roadmap = keep.create_roadmap(owner, new_roadmap("Rust")).await.unwrap();
        repo.insert_follow_if_absent(&roadmap_core::model::Follow::start(
            UserId::new(2),
            roadmap.id(),
            0,
            fixed_now(),
        ))
        .await
        .unwrap();

        let change = keep
            .set_visibility(owner, roadmap.id(), Visibility::Private)
            .await
            .unwrap();
        assert_eq!(change.revoked_follows, 0);

        keep.set_visibility(owner, roadmap.id(), Visibility::Public)
            .await
            .unwrap();
        let revoke = service(&repo, VisibilityPolicy::RevokeFollowers);
        let change = revoke
            .set_visibility(owner, roadmap.id(), Visibility::Private)
            .await
            .unwrap();
        assert_eq!(change.revoked_follows, 1);
        assert!(
            repo.get_follow(UserId::new(2), roadmap.id())
                .await
                .unwrap()
                .is_none()
        );
    }
}
