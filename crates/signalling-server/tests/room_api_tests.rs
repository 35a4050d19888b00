//! Membership API integration tests.
//!
//! Each mutating operation must be transactional and emit exactly one
//! lifecycle event on success, with payload snapshots taken inside the
//! transaction. Uses `#[sqlx::test]` for isolated test databases.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use signalling_server::errors::ApiError;
use signalling_server::events::{EventKind, EventPayload, RoomEvent};
use signalling_server::rooms::RoomApi;
use sqlx::PgPool;
use tokio::sync::mpsc;

fn api(pool: PgPool) -> (RoomApi, mpsc::Receiver<RoomEvent>) {
    let (events_tx, events_rx) = mpsc::channel(32);
    (
        RoomApi::new(pool, "access-secret".to_string(), events_tx),
        events_rx,
    )
}

fn next_event(events: &mut mpsc::Receiver<RoomEvent>) -> RoomEvent {
    events.try_recv().expect("exactly one event expected")
}

fn assert_no_event(events: &mut mpsc::Receiver<RoomEvent>) {
    assert!(events.try_recv().is_err(), "no event expected");
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_register_user_emits_registered_event(pool: PgPool) -> Result<(), anyhow::Error> {
    let (api, mut events) = api(pool);

    let user = api.register_user("u1", "Jasmine Chan", "jasmine.png").await?;
    assert_eq!(user.id, "u1");
    assert!(!user.online, "online flag is never set by registration");

    let event = next_event(&mut events);
    assert_eq!(event.kind, EventKind::UserRegistered);
    match event.payload {
        EventPayload::UserInstance(p) => {
            assert_eq!(p.id, "u1");
            assert_eq!(p.name, "Jasmine Chan");
            assert!(p.room_ids.is_empty());
        }
        other => panic!("unexpected payload: {other:?}"),
    }
    assert_no_event(&mut events);

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_register_duplicate_user_fails_without_event(
    pool: PgPool,
) -> Result<(), anyhow::Error> {
    let (api, mut events) = api(pool);

    api.register_user("u1", "Jasmine Chan", "").await?;
    let _ = next_event(&mut events);

    let result = api.register_user("u1", "Someone Else", "").await;
    assert!(matches!(result, Err(ApiError::UserAlreadyExists)));
    assert_no_event(&mut events);

    // The original profile survives the failed re-registration
    let user = api.get_user("u1").await?;
    assert_eq!(user.name, "Jasmine Chan");

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_update_user_profile_snapshots_post_state(
    pool: PgPool,
) -> Result<(), anyhow::Error> {
    let (api, mut events) = api(pool);

    api.register_user("u1", "Old Name", "").await?;
    api.create_room("r1", "room one", "", "", &["u1".to_string()])
        .await?;
    while events.try_recv().is_ok() {}

    let user = api.update_user_profile("u1", "New Name", "new.png").await?;
    assert_eq!(user.name, "New Name");

    let event = next_event(&mut events);
    assert_eq!(event.kind, EventKind::UserProfileUpdated);
    match event.payload {
        EventPayload::UserInstance(p) => {
            assert_eq!(p.name, "New Name");
            assert_eq!(p.photo, "new.png");
            assert_eq!(p.room_ids, vec!["r1".to_string()]);
        }
        other => panic!("unexpected payload: {other:?}"),
    }

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_update_missing_user_fails(pool: PgPool) -> Result<(), anyhow::Error> {
    let (api, mut events) = api(pool);

    let result = api.update_user_profile("ghost", "Name", "").await;
    assert!(matches!(result, Err(ApiError::UserNotFound)));
    assert_no_event(&mut events);

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_remove_user_cascades_and_snapshots_dissolved_rooms(
    pool: PgPool,
) -> Result<(), anyhow::Error> {
    let (api, mut events) = api(pool.clone());

    api.register_user("u1", "Jasmine Chan", "").await?;
    api.register_user("u2", "Will Smith", "").await?;
    api.create_room("r1", "one", "", "", &["u1".to_string(), "u2".to_string()])
        .await?;
    api.create_room("r2", "two", "", "", &["u1".to_string()])
        .await?;
    while events.try_recv().is_ok() {}

    let removed = api.remove_user("u1").await?;
    assert_eq!(removed.id, "u1");

    // The event names the rooms the removal affected
    let event = next_event(&mut events);
    assert_eq!(event.kind, EventKind::UserRemoved);
    match event.payload {
        EventPayload::UserInstance(p) => {
            assert_eq!(p.room_ids, vec!["r1".to_string(), "r2".to_string()]);
        }
        other => panic!("unexpected payload: {other:?}"),
    }

    // Memberships are gone, the other member is untouched
    assert!(matches!(api.get_user("u1").await, Err(ApiError::UserNotFound)));
    let r1 = api.get_room("r1").await?;
    assert_eq!(r1.members.len(), 1);
    assert_eq!(r1.members[0].id, "u2");

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_remove_missing_user_is_not_found(pool: PgPool) -> Result<(), anyhow::Error> {
    let (api, mut events) = api(pool);

    let result = api.remove_user("ghost").await;
    assert!(matches!(result, Err(ApiError::UserNotFound)));
    assert_no_event(&mut events);

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_create_room_emits_event_with_member_set(
    pool: PgPool,
) -> Result<(), anyhow::Error> {
    let (api, mut events) = api(pool);

    api.register_user("u1", "Jasmine Chan", "").await?;
    api.register_user("u2", "Will Smith", "").await?;
    while events.try_recv().is_ok() {}

    let room = api
        .create_room(
            "r1",
            "standup",
            "daily sync",
            "room.png",
            &["u2".to_string(), "u1".to_string(), "u2".to_string()],
        )
        .await?;

    // Set semantics: the duplicate initial member collapses
    assert_eq!(room.members.len(), 2);
    let member_ids: Vec<&str> = room.members.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(member_ids, vec!["u1", "u2"]);

    let event = next_event(&mut events);
    assert_eq!(event.kind, EventKind::RoomCreated);
    match event.payload {
        EventPayload::RoomInstance(p) => {
            assert_eq!(p.id, "r1");
            assert_eq!(p.description, "daily sync");
            assert_eq!(p.member_ids, vec!["u1".to_string(), "u2".to_string()]);
        }
        other => panic!("unexpected payload: {other:?}"),
    }

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_create_room_with_unknown_member_fails_atomically(
    pool: PgPool,
) -> Result<(), anyhow::Error> {
    let (api, mut events) = api(pool);

    api.register_user("u1", "Jasmine Chan", "").await?;
    while events.try_recv().is_ok() {}

    let result = api
        .create_room("r1", "standup", "", "", &["u1".to_string(), "ghost".to_string()])
        .await;
    assert!(matches!(result, Err(ApiError::UserNotFound)));
    assert_no_event(&mut events);

    // Nothing of the room persists
    assert!(matches!(api.get_room("r1").await, Err(ApiError::RoomNotFound)));

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_duplicate_room_id_fails(pool: PgPool) -> Result<(), anyhow::Error> {
    let (api, mut events) = api(pool);

    api.create_room("r1", "standup", "", "", &[]).await?;
    let _ = next_event(&mut events);

    let result = api.create_room("r1", "other", "", "", &[]).await;
    assert!(matches!(result, Err(ApiError::RoomAlreadyExists)));
    assert_no_event(&mut events);

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_add_user_snapshots_post_join_participants(
    pool: PgPool,
) -> Result<(), anyhow::Error> {
    let (api, mut events) = api(pool);

    api.register_user("u1", "Jasmine Chan", "").await?;
    api.register_user("u2", "Will Smith", "").await?;
    api.create_room("r1", "standup", "", "", &["u1".to_string()])
        .await?;
    while events.try_recv().is_ok() {}

    let room = api.add_user("r1", "u2").await?;
    assert_eq!(room.members.len(), 2);

    let event = next_event(&mut events);
    assert_eq!(event.kind, EventKind::UserJoinedRoom);
    match event.payload {
        EventPayload::RoomParticipant(p) => {
            assert_eq!(p.user_id, "u2");
            assert_eq!(p.room_id, "r1");
            // Post-mutation set includes the new member
            assert_eq!(p.participant_ids, vec!["u1".to_string(), "u2".to_string()]);
        }
        other => panic!("unexpected payload: {other:?}"),
    }

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_add_user_twice_keeps_set_semantics(pool: PgPool) -> Result<(), anyhow::Error> {
    let (api, mut events) = api(pool);

    api.register_user("u1", "Jasmine Chan", "").await?;
    api.create_room("r1", "standup", "", "", &["u1".to_string()])
        .await?;
    while events.try_recv().is_ok() {}

    let room = api.add_user("r1", "u1").await?;
    assert_eq!(room.members.len(), 1, "member must appear at most once");

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_add_user_missing_entities(pool: PgPool) -> Result<(), anyhow::Error> {
    let (api, mut events) = api(pool);

    api.register_user("u1", "Jasmine Chan", "").await?;
    api.create_room("r1", "standup", "", "", &[]).await?;
    while events.try_recv().is_ok() {}

    assert!(matches!(
        api.add_user("ghost-room", "u1").await,
        Err(ApiError::RoomNotFound)
    ));
    assert!(matches!(
        api.add_user("r1", "ghost").await,
        Err(ApiError::UserNotFound)
    ));
    assert_no_event(&mut events);

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_kick_user_requires_edge(pool: PgPool) -> Result<(), anyhow::Error> {
    let (api, mut events) = api(pool);

    api.register_user("u1", "Jasmine Chan", "").await?;
    api.register_user("u2", "Will Smith", "").await?;
    api.create_room("r1", "standup", "", "", &["u1".to_string(), "u2".to_string()])
        .await?;
    while events.try_recv().is_ok() {}

    let room = api.kick_user("r1", "u2").await?;
    assert_eq!(room.members.len(), 1);

    let event = next_event(&mut events);
    assert_eq!(event.kind, EventKind::UserLeftRoom);
    match event.payload {
        EventPayload::RoomParticipant(p) => {
            assert_eq!(p.user_id, "u2");
            // Post-mutation set no longer carries the kicked user
            assert_eq!(p.participant_ids, vec!["u1".to_string()]);
        }
        other => panic!("unexpected payload: {other:?}"),
    }

    // Kicking again: the edge is gone
    let result = api.kick_user("r1", "u2").await;
    assert!(matches!(result, Err(ApiError::MemberNotFound)));
    assert_no_event(&mut events);

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_destroy_room_snapshots_dissolved_members(
    pool: PgPool,
) -> Result<(), anyhow::Error> {
    let (api, mut events) = api(pool);

    api.register_user("u1", "Jasmine Chan", "").await?;
    api.register_user("u2", "Will Smith", "").await?;
    api.create_room("r1", "standup", "", "", &["u1".to_string(), "u2".to_string()])
        .await?;
    while events.try_recv().is_ok() {}

    let room = api.destroy_room("r1").await?;
    assert_eq!(room.id, "r1");

    let event = next_event(&mut events);
    assert_eq!(event.kind, EventKind::RoomDestroyed);
    match event.payload {
        EventPayload::RoomInstance(p) => {
            assert_eq!(p.member_ids, vec!["u1".to_string(), "u2".to_string()]);
        }
        other => panic!("unexpected payload: {other:?}"),
    }

    // Missing on delete is NotFound
    assert!(matches!(
        api.destroy_room("r1").await,
        Err(ApiError::RoomNotFound)
    ));
    assert_no_event(&mut events);

    // Members survive the room
    assert!(api.get_user("u1").await.is_ok());
    assert!(api.get_user("u2").await.is_ok());

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_get_users_keyword_listing(pool: PgPool) -> Result<(), anyhow::Error> {
    let (api, mut events) = api(pool);

    for (id, name) in [
        ("u1", "Cameron Boyce"),
        ("u2", "Jasmine Chan"),
        ("u3", "Will Smith"),
        ("u4", "Kristen Stewart"),
        ("u5", "Peyton List"),
        ("u6", "Amanda Bynes"),
        ("u7", "Brandon Soo Hoo"),
    ] {
        api.register_user(id, name, "").await?;
    }
    while events.try_recv().is_ok() {}

    let (users, count) = api.get_users(0, 10, "an").await?;
    assert_eq!(count, 3);
    let names: Vec<&str> = users.iter().map(|u| u.name.as_str()).collect();
    assert_eq!(names, vec!["Jasmine Chan", "Amanda Bynes", "Brandon Soo Hoo"]);

    // Case-insensitive match
    let (_, count) = api.get_users(0, 10, "AN").await?;
    assert_eq!(count, 3);

    // Count ignores pagination but honors the keyword
    let (page, count) = api.get_users(0, 1, "an").await?;
    assert_eq!(page.len(), 1);
    assert_eq!(count, 3);

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_get_rooms_counts_the_listed_table(pool: PgPool) -> Result<(), anyhow::Error> {
    let (api, mut events) = api(pool);

    api.register_user("u1", "Jasmine Chan", "").await?;
    api.create_room("r1", "alpha team", "", "", &["u1".to_string()])
        .await?;
    api.create_room("r2", "beta team", "", "", &[]).await?;
    api.create_room("r3", "gamma", "", "", &[]).await?;
    while events.try_recv().is_ok() {}

    let (rooms, count) = api.get_rooms(0, 10, "team").await?;
    assert_eq!(count, 2);
    assert_eq!(rooms.len(), 2);
    assert_eq!(rooms[0].id, "r1");
    assert_eq!(rooms[0].members.len(), 1);

    Ok(())
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_access_token_round_trips_user_id(pool: PgPool) -> Result<(), anyhow::Error> {
    let (api, _events) = api(pool);

    api.register_user("u1", "Jasmine Chan", "").await?;

    let token = api.get_user_access_token("u1").await?;
    let claims = signalling_server::auth::validate_token("access-secret", &token)?;
    assert_eq!(claims.user_id, "u1");

    assert!(matches!(
        api.get_user_access_token("ghost").await,
        Err(ApiError::UserNotFound)
    ));

    Ok(())
}
