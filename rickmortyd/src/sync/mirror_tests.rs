use super::*;
use tempfile::tempdir;
use time::Month;

async fn make_store() -> MirrorStore {
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    let store = MirrorStore::from_pool(pool);
    store.init().await.unwrap();
    store
}

fn location(id: i64, name: &str) -> Location {
    Location {
        id,
        name: name.into(),
        location_type: "Planet".into(),
        dimension: "Dimension C-137".into(),
        url: format!("https://x/api/location/{id}"),
        created: None,
    }
}

fn character(id: i64, location_id: Option<i64>) -> Character {
    Character {
        id,
        name: format!("Character {id}"),
        status: LifeStatus::Alive,
        species: "Human".into(),
        subtype: String::new(),
        gender: Gender::Male,
        location_id,
        avatar_uploaded: false,
        url: format!("https://x/api/character/{id}"),
        created: Some("2017-11-04T18:48:46.250Z".into()),
    }
}

fn episode(id: i64) -> Episode {
    Episode {
        id,
        name: "Pilot".into(),
        code: "S01E01".into(),
        air_date: "December 2, 2013".into(),
        aired_on: Date::from_calendar_date(2013, Month::December, 2).ok(),
        url: format!("https://x/api/episode/{id}"),
        created: None,
    }
}

#[tokio::test]
async fn upsert_creates_missing_record() {
    let store = make_store().await;

    let created = store.upsert(1, || location(1, "Earth")).await.unwrap();

    assert_eq!(created, Some(location(1, "Earth")));
    assert_eq!(store.get_location(1).await.unwrap(), Some(location(1, "Earth")));
    assert_eq!(store.count(EntityKind::Location).await.unwrap(), 1);
}

#[tokio::test]
async fn upsert_keeps_original_payload_for_known_id() {
    let store = make_store().await;
    store.upsert(1, || location(1, "Earth")).await.unwrap();

    let mut built = false;
    let second = store
        .upsert(1, || {
            built = true;
            location(1, "Earth (Replacement Dimension)")
        })
        .await
        .unwrap();

    assert!(second.is_none());
    assert!(!built);
    assert_eq!(store.get_location(1).await.unwrap().unwrap().name, "Earth");
    assert_eq!(store.count(EntityKind::Location).await.unwrap(), 1);
}

#[tokio::test]
async fn upsert_rejects_record_with_other_id() {
    let store = make_store().await;

    let err = store.upsert(1, || location(2, "Citadel")).await.unwrap_err();

    assert!(matches!(err, StoreError::IdMismatch { expected: 1, actual: 2 }));
    assert_eq!(store.count(EntityKind::Location).await.unwrap(), 0);
}

#[tokio::test]
async fn character_round_trips_with_location() {
    let store = make_store().await;
    store.upsert(3, || location(3, "Citadel of Ricks")).await.unwrap();
    let mut morty = character(2, Some(3));
    morty.status = LifeStatus::Unknown;
    morty.gender = Gender::Genderless;
    let stored = morty.clone();

    store.upsert(2, move || stored).await.unwrap();

    assert_eq!(store.get_character(2).await.unwrap(), Some(morty));
    assert_eq!(store.residents_of(3).await.unwrap(), vec![2]);
}

#[tokio::test]
async fn character_insert_fails_for_unknown_location() {
    let store = make_store().await;

    let result = store.upsert(1, || character(1, Some(99))).await;

    assert!(matches!(result, Err(StoreError::Sqlx(_))));
    assert!(store.get_character(1).await.unwrap().is_none());
}

#[tokio::test]
async fn episode_round_trips_parsed_air_date() {
    let store = make_store().await;
    store.upsert(1, || episode(1)).await.unwrap();

    let fetched = store.get_episode(1).await.unwrap().unwrap();

    assert_eq!(fetched, episode(1));
    assert_eq!(
        fetched.aired_on,
        Date::from_calendar_date(2013, Month::December, 2).ok()
    );
}

#[tokio::test]
async fn find_characters_by_ids_skips_unknown() {
    let store = make_store().await;
    for id in [1, 2, 3] {
        store.upsert(id, || character(id, None)).await.unwrap();
    }

    let found = store.find_characters_by_ids(&[3, 1, 42]).await.unwrap();

    assert_eq!(found.iter().map(|c| c.id).collect::<Vec<_>>(), vec![1, 3]);
    assert!(store.find_characters_by_ids(&[]).await.unwrap().is_empty());
}

#[tokio::test]
async fn link_is_symmetric_for_every_character() {
    let store = make_store().await;
    for id in [1, 2, 3] {
        store.upsert(id, || character(id, None)).await.unwrap();
    }
    store.upsert(10, || episode(10)).await.unwrap();

    let outcome = store.link_episode_characters(10, &[1, 2, 3]).await.unwrap();

    assert_eq!(outcome.linked, vec![1, 2, 3]);
    assert!(outcome.missing.is_empty());
    assert_eq!(store.character_ids_for_episode(10).await.unwrap(), vec![1, 2, 3]);
    for id in [1, 2, 3] {
        assert_eq!(store.episode_ids_for_character(id).await.unwrap(), vec![10]);
    }
}

#[tokio::test]
async fn link_twice_adds_no_duplicates() {
    let store = make_store().await;
    for id in [1, 2] {
        store.upsert(id, || character(id, None)).await.unwrap();
    }
    store.upsert(10, || episode(10)).await.unwrap();

    store.link_episode_characters(10, &[1, 2, 2]).await.unwrap();
    let again = store.link_episode_characters(10, &[2, 1]).await.unwrap();

    assert!(again.linked.is_empty());
    assert_eq!(again.already_linked, vec![2, 1]);
    assert_eq!(store.membership_count().await.unwrap(), 2);
}

#[tokio::test]
async fn link_reports_unknown_characters() {
    let store = make_store().await;
    store.upsert(1, || character(1, None)).await.unwrap();
    store.upsert(10, || episode(10)).await.unwrap();

    let outcome = store.link_episode_characters(10, &[1, 7]).await.unwrap();

    assert_eq!(outcome.linked, vec![1]);
    assert_eq!(outcome.missing, vec![7]);
    assert_eq!(store.character_ids_for_episode(10).await.unwrap(), vec![1]);
}

#[tokio::test]
async fn avatar_flag_transitions_once() {
    let store = make_store().await;
    store.upsert(1, || character(1, None)).await.unwrap();

    assert!(store.avatar_pending(1).await.unwrap());
    assert!(store.mark_avatar_uploaded(1).await.unwrap());
    assert!(!store.mark_avatar_uploaded(1).await.unwrap());
    assert!(!store.avatar_pending(1).await.unwrap());
    assert!(store.get_character(1).await.unwrap().unwrap().avatar_uploaded);
    assert!(!store.avatar_pending(99).await.unwrap());
}

#[tokio::test]
async fn favorites_cover_every_target_kind() {
    let store = make_store().await;
    store.upsert(1, || location(1, "Earth")).await.unwrap();
    store.upsert(2, || character(2, Some(1))).await.unwrap();
    store.upsert(3, || episode(3)).await.unwrap();

    assert!(store.add_favorite("user-1", FavoriteTarget::Location(1)).await.unwrap());
    assert!(store.add_favorite("user-1", FavoriteTarget::Character(2)).await.unwrap());
    assert!(store.add_favorite("user-1", FavoriteTarget::Episode(3)).await.unwrap());
    assert!(!store.add_favorite("user-1", FavoriteTarget::Episode(3)).await.unwrap());

    let favorites = store.list_favorites("user-1").await.unwrap();
    assert_eq!(favorites.len(), 3);
    assert!(favorites.contains(&FavoriteTarget::Location(1)));
    assert!(favorites.contains(&FavoriteTarget::Character(2)));
    assert!(favorites.contains(&FavoriteTarget::Episode(3)));
    assert!(store.list_favorites("user-2").await.unwrap().is_empty());

    assert!(store.remove_favorite("user-1", FavoriteTarget::Character(2)).await.unwrap());
    assert!(!store.remove_favorite("user-1", FavoriteTarget::Character(2)).await.unwrap());
    assert_eq!(store.list_favorites("user-1").await.unwrap().len(), 2);
}

#[tokio::test]
async fn favorite_requires_mirrored_target() {
    let store = make_store().await;

    let err = store
        .add_favorite("user-1", FavoriteTarget::Character(5))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        StoreError::MissingTarget {
            kind: EntityKind::Character,
            id: 5
        }
    ));
}

#[tokio::test]
async fn file_backed_store_persists_between_opens() {
    let dir = tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("mirror.db").display());

    {
        let store = MirrorStore::new(&url).await.unwrap();
        store.upsert(1, || location(1, "Earth")).await.unwrap();
    }

    let reopened = MirrorStore::new(&url).await.unwrap();
    assert_eq!(reopened.get_location(1).await.unwrap().unwrap().name, "Earth");
}

async fn fail_link_inserts(store: &MirrorStore) {
    sqlx::query(
        "CREATE TRIGGER reject_links BEFORE INSERT ON character_episodes
         BEGIN SELECT RAISE(ABORT, 'links unavailable'); END",
    )
    .execute(&store.pool)
    .await
    .unwrap();
}

#[tokio::test]
async fn create_episode_with_links_commits_episode_and_links_together() {
    let store = make_store().await;
    for id in [1, 2] {
        store.upsert(id, || character(id, None)).await.unwrap();
    }

    let outcome = store
        .create_episode_with_links(episode(10), &[1, 2, 5])
        .await
        .unwrap()
        .unwrap();

    assert_eq!(outcome.linked, vec![1, 2]);
    assert_eq!(outcome.missing, vec![5]);
    assert_eq!(store.get_episode(10).await.unwrap(), Some(episode(10)));
    assert_eq!(store.episode_ids_for_character(2).await.unwrap(), vec![10]);
}

#[tokio::test]
async fn create_episode_with_links_leaves_existing_episode_alone() {
    let store = make_store().await;
    store.upsert(1, || character(1, None)).await.unwrap();
    store.upsert(10, || episode(10)).await.unwrap();

    let second = store
        .create_episode_with_links(episode(10), &[1])
        .await
        .unwrap();

    assert!(second.is_none());
    assert_eq!(store.membership_count().await.unwrap(), 0);
}

#[tokio::test]
async fn failed_link_rolls_back_new_episode() {
    let store = make_store().await;
    store.upsert(1, || character(1, None)).await.unwrap();
    fail_link_inserts(&store).await;

    let result = store.create_episode_with_links(episode(10), &[1]).await;

    assert!(matches!(result, Err(StoreError::Sqlx(_))));
    assert!(store.get_episode(10).await.unwrap().is_none());
    assert_eq!(store.membership_count().await.unwrap(), 0);
}
