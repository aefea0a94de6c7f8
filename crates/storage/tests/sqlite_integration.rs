use chrono::Duration;
use roadmap_core::model::{
    Difficulty, Follow, Roadmap, RoadmapId, Step, StepId, StepKind, UserId, VideoId, Visibility,
    WatchRecord, WatchSample,
};
use roadmap_core::time::fixed_now;
use storage::repository::{
    FollowRepository, RoadmapFilter, RoadmapRepository, StepRepository, StorageError,
    WatchRecordRepository,
};
use storage::sqlite::SqliteRepository;

async fn connect(name: &str) -> SqliteRepository {
    let url = format!("sqlite:file:{name}?mode=memory&cache=shared");
    let repo = SqliteRepository::connect(&url).await.expect("connect");
    repo.migrate().await.expect("migrate");
    repo
}

fn build_roadmap(owner: u64, title: &str, hours: u32) -> Roadmap {
    Roadmap::new(
        RoadmapId::new(0),
        UserId::new(owner),
        title,
        "A path through the basics",
        Difficulty::Beginner,
        Visibility::Public,
        hours,
        fixed_now(),
    )
    .unwrap()
}

fn build_step(roadmap: RoadmapId, order: u32, videos: &[u64]) -> Step {
    Step::new(
        StepId::new(0),
        roadmap,
        StepKind::Channel,
        format!("Step {order}"),
        order,
        videos.iter().copied().map(VideoId::new).collect(),
    )
    .unwrap()
}

#[tokio::test]
async fn sqlite_roundtrip_keeps_steps_in_order_with_videos() {
    let repo = connect("memdb_steps").await;
    let id = repo
        .insert_new_roadmap(&build_roadmap(1, "Rust", 10))
        .await
        .unwrap();

    repo.insert_step(&build_step(id, 2, &[3, 4]), fixed_now()).await.unwrap();
    repo.insert_step(&build_step(id, 1, &[2, 1]), fixed_now()).await.unwrap();

    let steps = repo.steps_for_roadmap(id).await.unwrap();
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[0].order(), 1);
    assert_eq!(steps[0].videos(), &[VideoId::new(2), VideoId::new(1)]);
    assert_eq!(steps[1].videos(), &[VideoId::new(3), VideoId::new(4)]);

    let err = repo
        .insert_step(&build_step(id, 1, &[9]), fixed_now())
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Conflict));

    let fetched = repo.get_roadmap(id).await.unwrap().unwrap();
    assert_eq!(fetched.title(), "Rust");
    assert_eq!(fetched.created_at(), fixed_now());
}

#[tokio::test]
async fn sqlite_delete_roadmap_cascades_everything() {
    let repo = connect("memdb_cascade").await;
    let id = repo
        .insert_new_roadmap(&build_roadmap(1, "Go", 5))
        .await
        .unwrap();
    let step_id = repo.insert_step(&build_step(id, 1, &[1]), fixed_now()).await.unwrap();
    repo.insert_follow_if_absent(&Follow::start(UserId::new(2), id, 1, fixed_now()))
        .await
        .unwrap();

    repo.delete_roadmap(id).await.unwrap();

    assert!(repo.get_roadmap(id).await.unwrap().is_none());
    assert!(repo.steps_for_roadmap(id).await.unwrap().is_empty());
    assert!(repo.get_follow(UserId::new(2), id).await.unwrap().is_none());
    assert!(matches!(
        repo.delete_step(id, step_id, fixed_now()).await.unwrap_err(),
        StorageError::NotFound
    ));
    assert!(matches!(
        repo.delete_roadmap(id).await.unwrap_err(),
        StorageError::NotFound
    ));
}

#[tokio::test]
async fn sqlite_step_changes_reconcile_follows_in_the_same_write() {
    let repo = connect("memdb_reconcile").await;
    let id = repo
        .insert_new_roadmap(&build_roadmap(1, "Kotlin", 4))
        .await
        .unwrap();
    let first = repo
        .insert_step(&build_step(id, 1, &[1]), fixed_now())
        .await
        .unwrap();
    repo.insert_step(&build_step(id, 2, &[2]), fixed_now())
        .await
        .unwrap();

    let learner = UserId::new(2);
    let (mut done, _) = repo
        .insert_follow_if_absent(&Follow::start(learner, id, 2, fixed_now()))
        .await
        .unwrap();
    done.set_cursor(2, 2, fixed_now());
    repo.update_follow_cursor(&done, 0).await.unwrap().unwrap();
    let (mut mid, _) = repo
        .insert_follow_if_absent(&Follow::start(UserId::new(3), id, 2, fixed_now()))
        .await
        .unwrap();
    mid.set_cursor(1, 2, fixed_now());
    repo.update_follow_cursor(&mid, 0).await.unwrap().unwrap();

    // A third step reopens the finished learner.
    repo.insert_step(&build_step(id, 3, &[3]), fixed_now())
        .await
        .unwrap();
    let stored = repo.get_follow(learner, id).await.unwrap().unwrap();
    assert_eq!(stored.cursor(), 2);
    assert!(stored.completed_at().is_none());
    assert!(stored.is_consistent(3));
    assert_eq!(stored.version(), 2);

    // Dropping two steps clamps both cursors and completes them.
    let later = fixed_now() + Duration::minutes(10);
    repo.delete_step(id, first, later).await.unwrap();
    let steps = repo.steps_for_roadmap(id).await.unwrap();
    repo.delete_step(id, steps[1].id(), later).await.unwrap();

    let stored = repo.get_follow(learner, id).await.unwrap().unwrap();
    assert_eq!(stored.cursor(), 1);
    assert_eq!(stored.completed_at(), Some(later));
    assert!(stored.is_consistent(1));

    let stored = repo.get_follow(UserId::new(3), id).await.unwrap().unwrap();
    assert_eq!(stored.cursor(), 1);
    assert_eq!(stored.completed_at(), Some(later));
}

#[tokio::test]
async fn sqlite_follow_insert_is_idempotent_and_cursor_is_versioned() {
    let repo = connect("memdb_follow").await;
    let id = repo
        .insert_new_roadmap(&build_roadmap(1, "SQL", 3))
        .await
        .unwrap();
    let user = UserId::new(7);

    let (first, created) = repo
        .insert_follow_if_absent(&Follow::start(user, id, 2, fixed_now()))
        .await
        .unwrap();
    assert!(created);
    let later = fixed_now() + Duration::hours(1);
    let (second, created) = repo
        .insert_follow_if_absent(&Follow::start(user, id, 2, later))
        .await
        .unwrap();
    assert!(!created);
    assert_eq!(second.started_at(), first.started_at());

    let mut moved = first.clone();
    moved.set_cursor(2, 2, later);
    let stored = repo.update_follow_cursor(&moved, 0).await.unwrap().unwrap();
    assert_eq!(stored.cursor(), 2);
    assert_eq!(stored.version(), 1);
    assert_eq!(stored.completed_at(), Some(later));

    assert!(repo.update_follow_cursor(&moved, 0).await.unwrap().is_none());
    assert_eq!(repo.follows_for_user(user).await.unwrap().len(), 1);
    assert!(repo.delete_follow(user, id).await.unwrap());
    assert!(!repo.delete_follow(user, id).await.unwrap());
}

#[tokio::test]
async fn sqlite_private_switch_revokes_other_followers() {
    let repo = connect("memdb_visibility").await;
    let id = repo
        .insert_new_roadmap(&build_roadmap(1, "Secret", 3))
        .await
        .unwrap();
    for user in [1, 2, 3] {
        repo.insert_follow_if_absent(&Follow::start(UserId::new(user), id, 0, fixed_now()))
            .await
            .unwrap();
    }

    let revoked = repo
        .set_visibility(id, Visibility::Private, fixed_now(), true)
        .await
        .unwrap();
    assert_eq!(revoked, 2);
    assert!(repo.get_follow(UserId::new(1), id).await.unwrap().is_some());

    let roadmap = repo.get_roadmap(id).await.unwrap().unwrap();
    assert_eq!(roadmap.visibility(), Visibility::Private);
    let public = repo
        .list_public_roadmaps(&RoadmapFilter::default())
        .await
        .unwrap();
    assert!(public.iter().all(|r| r.id() != id));
}

#[tokio::test]
async fn sqlite_catalog_filters_and_orders_newest_first() {
    let repo = connect("memdb_catalog").await;
    let older = repo
        .insert_new_roadmap(&build_roadmap(1, "Rust basics", 10))
        .await
        .unwrap();
    let tomorrow = Roadmap::from_persisted(
        RoadmapId::new(0),
        UserId::new(1),
        "Rust async".to_owned(),
        String::new(),
        Difficulty::Advanced,
        Visibility::Public,
        40,
        fixed_now() + Duration::days(1),
        fixed_now() + Duration::days(1),
    )
    .unwrap();
    let newer = repo.insert_new_roadmap(&tomorrow).await.unwrap();
    repo.insert_new_roadmap(&build_roadmap(1, "Cooking 100%", 2))
        .await
        .unwrap();

    let filter = RoadmapFilter {
        search: Some("rust".into()),
        ..RoadmapFilter::default()
    };
    let ids: Vec<RoadmapId> = repo
        .list_public_roadmaps(&filter)
        .await
        .unwrap()
        .iter()
        .map(Roadmap::id)
        .collect();
    assert_eq!(ids, vec![newer, older]);

    let filter = RoadmapFilter {
        difficulty: Some(Difficulty::Beginner),
        max_hours: Some(20),
        search: Some("rust".into()),
        limit: 10,
    };
    let found = repo.list_public_roadmaps(&filter).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id(), older);

    let filter = RoadmapFilter {
        search: Some("0%".into()),
        ..RoadmapFilter::default()
    };
    assert_eq!(repo.list_public_roadmaps(&filter).await.unwrap().len(), 1);

    assert_eq!(repo.count_roadmaps_owned_by(UserId::new(1)).await.unwrap(), 3);
}

#[tokio::test]
async fn sqlite_watch_records_batch_and_total() {
    let repo = connect("memdb_watch").await;
    let user = UserId::new(3);
    let first = WatchRecord::first(
        user,
        VideoId::new(1),
        WatchSample::new(120.0, 40.0).unwrap(),
        fixed_now(),
    );
    repo.upsert_watch_record(&first).await.unwrap();
    let merged = first.merged(&WatchSample::new(300.0, 97.0).unwrap(), fixed_now());
    repo.upsert_watch_record(&merged).await.unwrap();
    repo.upsert_watch_record(&WatchRecord::first(
        user,
        VideoId::new(2),
        WatchSample::new(60.0, 10.0).unwrap(),
        fixed_now(),
    ))
    .await
    .unwrap();

    let map = repo
        .watch_records(user, &[VideoId::new(1), VideoId::new(5)])
        .await
        .unwrap();
    assert_eq!(map.len(), 1);
    assert!(map[&VideoId::new(1)].is_complete());
    assert!(repo.watch_records(user, &[]).await.unwrap().is_empty());
    assert_eq!(repo.total_watched_seconds(user).await.unwrap(), 360.0);
    assert_eq!(
        repo.total_watched_seconds(UserId::new(99)).await.unwrap(),
        0.0
    );
}
