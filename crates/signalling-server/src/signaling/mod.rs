//! Signalling API: per-caller presentation of events and per-caller relay
//! of peer traffic.
//!
//! Each `subscribe_*` method drives one private stream for one caller: it
//! reads decoded bus traffic from its own receiver, applies the caller's
//! authorization filter and writes wire-form messages to its own sender.
//! Fan-out across callers is never done by sharing a stream; every session
//! owns its channels and its bus subscription (wired by the gRPC layer).

pub mod presence;

use crate::config::IceServer;
use crate::errors::ApiError;
use crate::events::{
    to_proto_timestamp, EventKind, EventPayload, IceOffer, OnlineStatus, RoomEvent, SdpCommand,
    SdpType,
};
use crate::models::{Room, User};
use crate::repositories::{RoomsRepository, UsersRepository};
use proto_gen::signalling as proto;
use sqlx::PgPool;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Liveness window for presence sessions; each heartbeat re-arms it.
pub const HEARTBEAT_TTL: Duration = Duration::from_secs(5);

/// Per-caller signalling API.
///
/// Outbound channels are injected at construction and immutable for the
/// lifetime of the instance.
pub struct SignalingApi {
    pool: PgPool,
    ice_servers: Vec<IceServer>,
    heartbeat_ttl: Duration,
    events: mpsc::Sender<RoomEvent>,
    commands: mpsc::Sender<SdpCommand>,
    ices: mpsc::Sender<IceOffer>,
    onlines: mpsc::Sender<OnlineStatus>,
}

impl SignalingApi {
    /// Create a new signalling API bound to its outbound channels.
    #[must_use]
    pub fn new(
        pool: PgPool,
        ice_servers: Vec<IceServer>,
        events: mpsc::Sender<RoomEvent>,
        commands: mpsc::Sender<SdpCommand>,
        ices: mpsc::Sender<IceOffer>,
        onlines: mpsc::Sender<OnlineStatus>,
    ) -> Self {
        Self {
            pool,
            ice_servers,
            heartbeat_ttl: HEARTBEAT_TTL,
            events,
            commands,
            ices,
            onlines,
        }
    }

    /// Override the heartbeat window (tests exercise stalls without
    /// waiting out the production window).
    #[must_use]
    pub fn with_heartbeat_ttl(mut self, ttl: Duration) -> Self {
        self.heartbeat_ttl = ttl;
        self
    }

    /// Resolve the caller behind a scoped user id.
    ///
    /// An empty id means the scoped context carried no identity.
    pub async fn user_context(&self, user_id: &str) -> Result<User, ApiError> {
        if user_id.is_empty() {
            return Err(ApiError::ContextInvalid);
        }
        UsersRepository::find(&self.pool, user_id)
            .await?
            .ok_or(ApiError::UserNotFound)
    }

    /// Profile and ICE configuration for the caller.
    pub async fn my_profile(&self, user_id: &str) -> Result<proto::Profile, ApiError> {
        let user = self.user_context(user_id).await?;
        Ok(self.profile_of(&user))
    }

    /// Attach the configured ICE servers to a user's profile.
    fn profile_of(&self, user: &User) -> proto::Profile {
        let servers = self
            .ice_servers
            .iter()
            .map(|ice| proto::IceServer {
                url: ice.url.clone(),
                username: ice.username.clone(),
                credential_type: proto::IceCredentialType::from(ice.credential_type) as i32,
                password: ice.password.clone(),
                access_token: ice.access_token.clone(),
                mac_key: ice.mac_key.clone(),
            })
            .collect();
        proto::Profile {
            id: user.id.clone(),
            name: user.name.clone(),
            photo: user.photo.clone(),
            servers,
        }
    }

    /// Update the caller's own profile and emit the lifecycle event.
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn update_profile(
        &self,
        user_id: &str,
        name: &str,
        photo: &str,
    ) -> Result<proto::Profile, ApiError> {
        let user = self.user_context(user_id).await?;

        let mut tx = self.pool.begin().await?;
        UsersRepository::update_profile(&mut *tx, &user.id, name, photo).await?;
        let room_ids = RoomsRepository::room_ids_of_user(&mut *tx, &user.id).await?;
        tx.commit().await?;

        let event = RoomEvent::now(
            EventKind::UserProfileUpdated,
            EventPayload::UserInstance(crate::events::UserInstancePayload {
                id: user.id.clone(),
                name: name.to_string(),
                photo: photo.to_string(),
                room_ids,
            }),
        );
        if self.events.send(event).await.is_err() {
            tracing::warn!(
                target: "signalling.api",
                "Event channel closed, profile update event dropped"
            );
        }

        let updated = User {
            id: user.id,
            name: name.to_string(),
            photo: photo.to_string(),
            online: user.online,
        };
        Ok(self.profile_of(&updated))
    }

    /// Rooms the caller participates in.
    pub async fn my_rooms(&self, user_id: &str) -> Result<(Vec<Room>, u64), ApiError> {
        let user = self.user_context(user_id).await?;
        let rows = RoomsRepository::rooms_of_user(&self.pool, &user.id).await?;
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
        let count = rooms.len() as u64;
        Ok((rooms, count))
    }

    /// Detailed information about one of the caller's rooms.
    ///
    /// A room the caller is not a member of is indistinguishable from an
    /// absent one.
    pub async fn my_room_info(&self, user_id: &str, room_id: &str) -> Result<Room, ApiError> {
        let user = self.user_context(user_id).await?;
        let row = RoomsRepository::find(&self.pool, room_id)
            .await?
            .ok_or(ApiError::RoomNotFound)?;
        let members = RoomsRepository::members_of(&self.pool, room_id).await?;
        if !members.iter().any(|m| m.id == user.id) {
            return Err(ApiError::RoomNotFound);
        }
        Ok(Room {
            id: row.id,
            name: row.name,
            description: row.description,
            photo: row.photo,
            members,
        })
    }

    /// Fetch a user by id.
    pub async fn get_user(&self, id: &str) -> Result<User, ApiError> {
        UsersRepository::find(&self.pool, id)
            .await?
            .ok_or(ApiError::UserNotFound)
    }

    /// Send a session description offer to a target peer.
    pub async fn offer_sdp(
        &self,
        user_id: &str,
        to: &str,
        description: &str,
    ) -> Result<(), ApiError> {
        self.send_sdp(SdpType::Offer, user_id, to, description).await
    }

    /// Answer a session description offer from a peer.
    pub async fn answer_sdp(
        &self,
        user_id: &str,
        to: &str,
        description: &str,
    ) -> Result<(), ApiError> {
        self.send_sdp(SdpType::Answer, user_id, to, description)
            .await
    }

    async fn send_sdp(
        &self,
        sdp_type: SdpType,
        user_id: &str,
        to: &str,
        description: &str,
    ) -> Result<(), ApiError> {
        let user = self.user_context(user_id).await?;
        self.commands
            .send(SdpCommand {
                sdp_type,
                from: user.id,
                to: to.to_string(),
                description: description.to_string(),
            })
            .await
            .map_err(|_| ApiError::Bus("command channel closed".to_string()))
    }

    /// Send an ICE candidate offer to a target peer.
    pub async fn send_ice_candidate(
        &self,
        user_id: &str,
        to: &str,
        candidate: &str,
        is_remote: bool,
    ) -> Result<(), ApiError> {
        let user = self.user_context(user_id).await?;
        self.ices
            .send(IceOffer {
                from: user.id,
                to: to.to_string(),
                is_remote,
                candidate: candidate.to_string(),
            })
            .await
            .map_err(|_| ApiError::Bus("ice channel closed".to_string()))
    }

    /// Relay SDP commands addressed to the caller.
    ///
    /// Runs until the input channel closes, the output side disconnects or
    /// `cancel` fires. Commands addressed elsewhere are silently skipped.
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn subscribe_sdp_commands(
        &self,
        user_id: &str,
        mut commands: mpsc::Receiver<SdpCommand>,
        out: mpsc::Sender<proto::Sdp>,
        cancel: CancellationToken,
    ) -> Result<(), ApiError> {
        let user = self.user_context(user_id).await?;
        loop {
            tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                () = out.closed() => return Ok(()),
                command = commands.recv() => {
                    let Some(command) = command else { return Ok(()) };
                    if command.to != user.id {
                        continue;
                    }
                    let sdp = proto::Sdp {
                        r#type: proto::SdpTypes::from(command.sdp_type) as i32,
                        sender_id: command.from,
                        description: command.description,
                    };
                    if out.send(sdp).await.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Relay ICE candidate offers addressed to the caller.
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn subscribe_ice_candidates(
        &self,
        user_id: &str,
        mut offers: mpsc::Receiver<IceOffer>,
        out: mpsc::Sender<proto::IceOffer>,
        cancel: CancellationToken,
    ) -> Result<(), ApiError> {
        let user = self.user_context(user_id).await?;
        loop {
            tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                () = out.closed() => return Ok(()),
                offer = offers.recv() => {
                    let Some(offer) = offer else { return Ok(()) };
                    if offer.to != user.id {
                        continue;
                    }
                    let wire = proto::IceOffer {
                        sender_id: offer.from,
                        is_remote: offer.is_remote,
                        candidate: offer.candidate,
                    };
                    if out.send(wire).await.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Deliver room lifecycle events the caller is entitled to see.
    ///
    /// The membership predicate is evaluated per event against current
    /// store state; a failed lookup logs and skips the event without
    /// tearing the stream down.
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn subscribe_room_events(
        &self,
        user_id: &str,
        mut events: mpsc::Receiver<RoomEvent>,
        out: mpsc::Sender<proto::RoomEvent>,
        cancel: CancellationToken,
    ) -> Result<(), ApiError> {
        let user = self.user_context(user_id).await?;
        loop {
            tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                () = out.closed() => return Ok(()),
                event = events.recv() => {
                    let Some(event) = event else { return Ok(()) };
                    let Some(wire) = self.filter_room_event(&user, &event).await else {
                        continue;
                    };
                    if out.send(wire).await.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Apply the caller's authorization filter to one event.
    ///
    /// Returns the wire form when the event is visible to `user`, `None`
    /// otherwise. Kind/payload mismatches are skipped; the timestamp of a
    /// delivered event is the original emission time.
    async fn filter_room_event(
        &self,
        user: &User,
        event: &RoomEvent,
    ) -> Option<proto::RoomEvent> {
        let payload = match (event.kind, &event.payload) {
            (
                EventKind::UserJoinedRoom | EventKind::UserLeftRoom,
                EventPayload::RoomParticipant(p),
            ) => {
                if !p.participant_ids.iter().any(|id| id == &user.id) {
                    return None;
                }
                proto::room_event::Payload::RoomParticipant(proto::RoomParticipantEventPayload {
                    participant_id: p.user_id.clone(),
                    room_id: p.room_id.clone(),
                })
            }
            (
                EventKind::RoomCreated | EventKind::RoomProfileUpdated | EventKind::RoomDestroyed,
                EventPayload::RoomInstance(p),
            ) => {
                if !p.member_ids.iter().any(|id| id == &user.id) {
                    return None;
                }
                proto::room_event::Payload::RoomInstance(proto::RoomInstanceEventPayload {
                    id: p.id.clone(),
                    name: p.name.clone(),
                    photo: p.photo.clone(),
                    description: p.description.clone(),
                    member_ids: p.member_ids.clone(),
                })
            }
            (
                EventKind::UserProfileUpdated | EventKind::UserRemoved,
                EventPayload::UserInstance(p),
            ) => {
                // Resolved against the store at evaluation time, not cached
                match RoomsRepository::is_member_of_any(&self.pool, &user.id, &p.room_ids).await {
                    Ok(true) => {}
                    Ok(false) => return None,
                    Err(e) => {
                        tracing::warn!(
                            target: "signalling.api",
                            error = %e,
                            kind = event.kind.subject(),
                            "Membership lookup failed, skipping event"
                        );
                        return None;
                    }
                }
                proto::room_event::Payload::UserInstance(proto::UserInstanceEventPayload {
                    id: p.id.clone(),
                    name: p.name.clone(),
                    photo: p.photo.clone(),
                    room_ids: p.room_ids.clone(),
                })
            }
            // UserRegistered fans out to nobody; mismatched payloads skip
            _ => return None,
        };

        Some(proto::RoomEvent {
            event: proto::RoomEvents::from(event.kind) as i32,
            time: Some(to_proto_timestamp(event.time)),
            payload: Some(payload),
        })
    }

    /// Presence session for the caller; see [`presence`].
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn subscribe_online_status(
        &self,
        user_id: &str,
        heartbeats: mpsc::Receiver<proto::Heartbeat>,
        statuses: mpsc::Receiver<OnlineStatus>,
        out: mpsc::Sender<proto::OnlineStatus>,
        cancel: CancellationToken,
    ) -> Result<(), ApiError> {
        let user = self.user_context(user_id).await?;
        presence::PresenceSession::new(self, user.id, self.heartbeat_ttl)
            .run(heartbeats, statuses, out, cancel)
            .await
    }

    /// Flip a user's online flag and publish the status change.
    pub(crate) async fn set_user_online(&self, id: &str, online: bool) -> Result<(), ApiError> {
        tracing::debug!(
            target: "signalling.presence",
            user_id = %id,
            online = online,
            "Setting user online status"
        );
        UsersRepository::set_online(&self.pool, id, online).await?;
        self.onlines
            .send(OnlineStatus {
                id: id.to_string(),
                online,
            })
            .await
            .map_err(|_| ApiError::Bus("online status channel closed".to_string()))
    }
}
