//! Membership API: the sole writer of the user/room/membership tables and
//! the sole emitter of membership lifecycle events.
//!
//! Every mutating operation runs in a single transaction and emits exactly
//! one event on success, after the transaction commits. Events never
//! precede a commit, so a store failure cannot orphan an event. Payload
//! snapshots are read inside the transaction: post-mutation state for
//! additive and update operations, the set being dissolved for destructive
//! ones (a post-delete snapshot would always be empty and the event would
//! reach nobody).

use crate::auth;
use crate::errors::ApiError;
use crate::events::{
    EventKind, EventPayload, RoomEvent, RoomInstancePayload, RoomParticipantPayload,
    UserInstancePayload,
};
use crate::models::{Room, User};
use crate::repositories::{RoomsRepository, UsersRepository};
use sqlx::PgPool;
use std::collections::BTreeSet;
use tokio::sync::mpsc;
use tracing::instrument;

/// Membership API over users, rooms and the membership relation.
///
/// The outbound event channel is injected at construction and immutable
/// for the lifetime of the instance.
pub struct RoomApi {
    pool: PgPool,
    access_secret: String,
    events: mpsc::Sender<RoomEvent>,
}

impl RoomApi {
    /// Create a new membership API bound to its outbound event channel.
    #[must_use]
    pub fn new(pool: PgPool, access_secret: String, events: mpsc::Sender<RoomEvent>) -> Self {
        Self {
            pool,
            access_secret,
            events,
        }
    }

    /// Enqueue a lifecycle event.
    ///
    /// The transaction has already committed when this runs; a closed
    /// channel loses the event (at-least-once delivery is bounded by the
    /// bus anyway) and is logged rather than surfaced.
    async fn emit(&self, event: RoomEvent) {
        let kind = event.kind;
        if self.events.send(event).await.is_err() {
            tracing::warn!(
                target: "signalling.rooms",
                kind = kind.subject(),
                "Event channel closed, lifecycle event dropped"
            );
        }
    }

    /// Register a new user.
    #[instrument(skip_all, fields(user_id = %id))]
    pub async fn register_user(
        &self,
        id: &str,
        name: &str,
        photo: &str,
    ) -> Result<User, ApiError> {
        let mut tx = self.pool.begin().await?;
        if UsersRepository::find(&mut *tx, id).await?.is_some() {
            return Err(ApiError::UserAlreadyExists);
        }
        UsersRepository::insert(&mut *tx, id, name, photo).await?;
        tx.commit().await?;

        self.emit(RoomEvent::now(
            EventKind::UserRegistered,
            EventPayload::UserInstance(UserInstancePayload {
                id: id.to_string(),
                name: name.to_string(),
                photo: photo.to_string(),
                room_ids: Vec::new(),
            }),
        ))
        .await;

        Ok(User {
            id: id.to_string(),
            name: name.to_string(),
            photo: photo.to_string(),
            online: false,
        })
    }

    /// Fetch a user by id.
    pub async fn get_user(&self, id: &str) -> Result<User, ApiError> {
        UsersRepository::find(&self.pool, id)
            .await?
            .ok_or(ApiError::UserNotFound)
    }

    /// List users with pagination and case-insensitive substring match on
    /// name. The count ignores pagination but honors the keyword.
    pub async fn get_users(
        &self,
        offset: u64,
        limit: u64,
        keyword: &str,
    ) -> Result<(Vec<User>, u64), ApiError> {
        let users = UsersRepository::list(&self.pool, keyword, offset, limit).await?;
        let count = UsersRepository::count(&self.pool, keyword).await?;
        Ok((users, count))
    }

    /// Mint the access token a peer presents as its identity.
    pub async fn get_user_access_token(&self, id: &str) -> Result<String, ApiError> {
        let user = self.get_user(id).await?;
        Ok(auth::generate_token(&self.access_secret, &user.id)?)
    }

    /// Update a user's profile.
    #[instrument(skip_all, fields(user_id = %id))]
    pub async fn update_user_profile(
        &self,
        id: &str,
        name: &str,
        photo: &str,
    ) -> Result<User, ApiError> {
        let mut tx = self.pool.begin().await?;
        let user = UsersRepository::find(&mut *tx, id)
            .await?
            .ok_or(ApiError::UserNotFound)?;
        UsersRepository::update_profile(&mut *tx, id, name, photo).await?;
        let room_ids = RoomsRepository::room_ids_of_user(&mut *tx, id).await?;
        tx.commit().await?;

        self.emit(RoomEvent::now(
            EventKind::UserProfileUpdated,
            EventPayload::UserInstance(UserInstancePayload {
                id: id.to_string(),
                name: name.to_string(),
                photo: photo.to_string(),
                room_ids,
            }),
        ))
        .await;

        Ok(User {
            id: id.to_string(),
            name: name.to_string(),
            photo: photo.to_string(),
            online: user.online,
        })
    }

    /// Remove a user and cascade their memberships.
    #[instrument(skip_all, fields(user_id = %id))]
    pub async fn remove_user(&self, id: &str) -> Result<User, ApiError> {
        let mut tx = self.pool.begin().await?;
        let user = UsersRepository::find(&mut *tx, id)
            .await?
            .ok_or(ApiError::UserNotFound)?;
        // Snapshot before the cascade: the rooms this removal affects
        let room_ids = RoomsRepository::room_ids_of_user(&mut *tx, id).await?;
        RoomsRepository::remove_memberships_of_user(&mut *tx, id).await?;
        UsersRepository::delete(&mut *tx, id).await?;
        tx.commit().await?;

        self.emit(RoomEvent::now(
            EventKind::UserRemoved,
            EventPayload::UserInstance(UserInstancePayload {
                id: user.id.clone(),
                name: user.name.clone(),
                photo: user.photo.clone(),
                room_ids,
            }),
        ))
        .await;

        Ok(user)
    }

    /// Create a room with an initial member set.
    #[instrument(skip_all, fields(room_id = %id))]
    pub async fn create_room(
        &self,
        id: &str,
        name: &str,
        description: &str,
        photo: &str,
        member_ids: &[String],
    ) -> Result<Room, ApiError> {
        let unique_members: BTreeSet<&String> = member_ids.iter().collect();

        let mut tx = self.pool.begin().await?;
        if RoomsRepository::find(&mut *tx, id).await?.is_some() {
            return Err(ApiError::RoomAlreadyExists);
        }
        // Every initial member must reference an existing user
        let existing = UsersRepository::count_existing(&mut *tx, member_ids).await?;
        if existing != unique_members.len() as u64 {
            return Err(ApiError::UserNotFound);
        }
        RoomsRepository::insert(&mut *tx, id, name, description, photo).await?;
        for member in &unique_members {
            RoomsRepository::add_member(&mut *tx, id, member.as_str()).await?;
        }
        let members = RoomsRepository::members_of(&mut *tx, id).await?;
        tx.commit().await?;

        self.emit(RoomEvent::now(
            EventKind::RoomCreated,
            EventPayload::RoomInstance(RoomInstancePayload {
                id: id.to_string(),
                name: name.to_string(),
                photo: photo.to_string(),
                description: description.to_string(),
                member_ids: members.iter().map(|u| u.id.clone()).collect(),
            }),
        ))
        .await;

        Ok(Room {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            photo: photo.to_string(),
            members,
        })
    }

    /// Fetch a room and its participants by id.
    pub async fn get_room(&self, id: &str) -> Result<Room, ApiError> {
        let row = RoomsRepository::find(&self.pool, id)
            .await?
            .ok_or(ApiError::RoomNotFound)?;
        let members = RoomsRepository::members_of(&self.pool, id).await?;
        Ok(Room {
            id: row.id,
            name: row.name,
            description: row.description,
            photo: row.photo,
            members,
        })
    }

    /// List rooms with pagination and case-insensitive substring match on
    /// name. The count ignores pagination but honors the keyword.
    pub async fn get_rooms(
        &self,
        offset: u64,
        limit: u64,
        keyword: &str,
    ) -> Result<(Vec<Room>, u64), ApiError> {
        let rows = RoomsRepository::list(&self.pool, keyword, offset, limit).await?;
        let count = RoomsRepository::count(&self.pool, keyword).await?;
        let mut rooms = Vec::with_capacity(rows.len());
        for row in rows {
            let members = RoomsRepository::members_of(&self.pool, &row.id).await?;
            rooms.push(Room {
                id: row.id,
                name: row.name,
                description: row.description,
                photo: row.photo,
                members,
            });
        }
        Ok((rooms, count))
    }

    /// Update a room's profile.
    #[instrument(skip_all, fields(room_id = %id))]
    pub async fn update_room_profile(
        &self,
        id: &str,
        name: &str,
        description: &str,
        photo: &str,
    ) -> Result<Room, ApiError> {
        let mut tx = self.pool.begin().await?;
        RoomsRepository::find(&mut *tx, id)
            .await?
            .ok_or(ApiError::RoomNotFound)?;
        RoomsRepository::update_profile(&mut *tx, id, name, description, photo).await?;
        let members = RoomsRepository::members_of(&mut *tx, id).await?;
        tx.commit().await?;

        self.emit(RoomEvent::now(
            EventKind::RoomProfileUpdated,
            EventPayload::RoomInstance(RoomInstancePayload {
                id: id.to_string(),
                name: name.to_string(),
                photo: photo.to_string(),
                description: description.to_string(),
                member_ids: members.iter().map(|u| u.id.clone()).collect(),
            }),
        ))
        .await;

        Ok(Room {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            photo: photo.to_string(),
            members,
        })
    }

    /// Destroy a room and cascade its memberships.
    #[instrument(skip_all, fields(room_id = %id))]
    pub async fn destroy_room(&self, id: &str) -> Result<Room, ApiError> {
        let mut tx = self.pool.begin().await?;
        let row = RoomsRepository::find(&mut *tx, id)
            .await?
            .ok_or(ApiError::RoomNotFound)?;
        // Snapshot before the cascade: the membership being dissolved
        let members = RoomsRepository::members_of(&mut *tx, id).await?;
        RoomsRepository::remove_memberships_of_room(&mut *tx, id).await?;
        RoomsRepository::delete(&mut *tx, id).await?;
        tx.commit().await?;

        self.emit(RoomEvent::now(
            EventKind::RoomDestroyed,
            EventPayload::RoomInstance(RoomInstancePayload {
                id: row.id.clone(),
                name: row.name.clone(),
                photo: row.photo.clone(),
                description: row.description.clone(),
                member_ids: members.iter().map(|u| u.id.clone()).collect(),
            }),
        ))
        .await;

        Ok(Room {
            id: row.id,
            name: row.name,
            description: row.description,
            photo: row.photo,
            members,
        })
    }

    /// Add a user to a room. Adding an existing member is a no-op insert.
    #[instrument(skip_all, fields(room_id = %room_id, user_id = %user_id))]
    pub async fn add_user(&self, room_id: &str, user_id: &str) -> Result<Room, ApiError> {
        let mut tx = self.pool.begin().await?;
        let row = RoomsRepository::find(&mut *tx, room_id)
            .await?
            .ok_or(ApiError::RoomNotFound)?;
        UsersRepository::find(&mut *tx, user_id)
            .await?
            .ok_or(ApiError::UserNotFound)?;
        RoomsRepository::add_member(&mut *tx, room_id, user_id).await?;
        let members = RoomsRepository::members_of(&mut *tx, room_id).await?;
        tx.commit().await?;

        self.emit(RoomEvent::now(
            EventKind::UserJoinedRoom,
            EventPayload::RoomParticipant(RoomParticipantPayload {
                user_id: user_id.to_string(),
                room_id: room_id.to_string(),
                participant_ids: members.iter().map(|u| u.id.clone()).collect(),
            }),
        ))
        .await;

        Ok(Room {
            id: row.id,
            name: row.name,
            description: row.description,
            photo: row.photo,
            members,
        })
    }

    /// Kick a user from a room.
    #[instrument(skip_all, fields(room_id = %room_id, user_id = %user_id))]
    pub async fn kick_user(&self, room_id: &str, user_id: &str) -> Result<Room, ApiError> {
        let mut tx = self.pool.begin().await?;
        let row = RoomsRepository::find(&mut *tx, room_id)
            .await?
            .ok_or(ApiError::RoomNotFound)?;
        UsersRepository::find(&mut *tx, user_id)
            .await?
            .ok_or(ApiError::UserNotFound)?;
        let removed = RoomsRepository::remove_member(&mut *tx, room_id, user_id).await?;
        if removed == 0 {
            return Err(ApiError::MemberNotFound);
        }
        let members = RoomsRepository::members_of(&mut *tx, room_id).await?;
        tx.commit().await?;

        self.emit(RoomEvent::now(
            EventKind::UserLeftRoom,
            EventPayload::RoomParticipant(RoomParticipantPayload {
                user_id: user_id.to_string(),
                room_id: room_id.to_string(),
                participant_ids: members.iter().map(|u| u.id.clone()).collect(),
            }),
        ))
        .await;

        Ok(Room {
            id: row.id,
            name: row.name,
            description: row.description,
            photo: row.photo,
            members,
        })
    }
}
