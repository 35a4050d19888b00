//! Event taxonomy and domain payloads.
//!
//! Every membership lifecycle change is described by a [`RoomEvent`]: a
//! closed set of kinds ([`EventKind`]), a payload variant chosen by kind
//! ([`EventPayload`]) and the emission timestamp. The same types travel
//! in-process (mpsc channels) and over the bus (JSON records under the
//! subject tree, see [`crate::bus`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Subject suffix for SDP commands; the SDP type is the trailing token.
pub const SDP_SUBJECT_PREFIX: &str = "chat.sdp";

/// Subject suffix for ICE candidate offers.
pub const ICE_CANDIDATE_SUBJECT: &str = "chat.ice-candidate";

/// Subject suffix for user online status changes.
pub const ONLINE_STATUS_SUBJECT: &str = "chat.user.online-change";

/// Lifecycle event kinds emitted by the membership API.
///
/// The wire subject of each kind doubles as its identity: subjects are
/// `<namespace>.<subject suffix>` on the bus, and subscribers dispatch on
/// the suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A user joined a room.
    UserJoinedRoom,
    /// A user left (or was kicked from) a room.
    UserLeftRoom,
    /// A new room was created.
    RoomCreated,
    /// A room profile was updated.
    RoomProfileUpdated,
    /// A room was destroyed.
    RoomDestroyed,
    /// A new user registered.
    UserRegistered,
    /// A user profile was updated.
    UserProfileUpdated,
    /// A user was removed from the system.
    UserRemoved,
}

impl EventKind {
    /// Subject suffix for this kind, appended to the configured namespace.
    #[must_use]
    pub fn subject(self) -> &'static str {
        match self {
            EventKind::UserJoinedRoom => "chat.room.user-joined",
            EventKind::UserLeftRoom => "chat.room.user-left",
            EventKind::RoomCreated => "chat.room.created",
            EventKind::RoomProfileUpdated => "chat.room.updated",
            EventKind::RoomDestroyed => "chat.room.destroyed",
            EventKind::UserRegistered => "chat.user.registered",
            EventKind::UserProfileUpdated => "chat.user.profile-updated",
            EventKind::UserRemoved => "chat.user.removed",
        }
    }

    /// Resolve a subject suffix back to its kind.
    ///
    /// Returns `None` for subjects outside the lifecycle set (for example
    /// `chat.user.online-change`, which shares the `chat.user` prefix).
    #[must_use]
    pub fn from_subject(subject: &str) -> Option<Self> {
        match subject {
            "chat.room.user-joined" => Some(EventKind::UserJoinedRoom),
            "chat.room.user-left" => Some(EventKind::UserLeftRoom),
            "chat.room.created" => Some(EventKind::RoomCreated),
            "chat.room.updated" => Some(EventKind::RoomProfileUpdated),
            "chat.room.destroyed" => Some(EventKind::RoomDestroyed),
            "chat.user.registered" => Some(EventKind::UserRegistered),
            "chat.user.profile-updated" => Some(EventKind::UserProfileUpdated),
            "chat.user.removed" => Some(EventKind::UserRemoved),
            _ => None,
        }
    }
}

/// Payload for participant changes (join/leave).
///
/// `participant_ids` is the full participant set of the room at the time
/// of the change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomParticipantPayload {
    pub user_id: String,
    pub room_id: String,
    pub participant_ids: Vec<String>,
}

/// Payload for room instance changes (created/updated/destroyed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomInstancePayload {
    pub id: String,
    pub name: String,
    pub photo: String,
    pub description: String,
    pub member_ids: Vec<String>,
}

/// Payload for user instance changes (registered/profile-updated/removed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInstancePayload {
    pub id: String,
    pub name: String,
    pub photo: String,
    pub room_ids: Vec<String>,
}

/// Payload variants, one per event family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    RoomParticipant(RoomParticipantPayload),
    RoomInstance(RoomInstancePayload),
    UserInstance(UserInstancePayload),
}

/// A membership lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomEvent {
    pub kind: EventKind,
    pub payload: EventPayload,
    pub time: DateTime<Utc>,
}

impl RoomEvent {
    /// Build an event stamped with the current time.
    #[must_use]
    pub fn now(kind: EventKind, payload: EventPayload) -> Self {
        Self {
            kind,
            payload,
            time: Utc::now(),
        }
    }
}

/// Session description command type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

impl SdpType {
    /// Wire name of the SDP type; also the trailing subject token.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SdpType::Offer => "offer",
            SdpType::Answer => "answer",
            SdpType::Pranswer => "pranswer",
            SdpType::Rollback => "rollback",
        }
    }

    /// Parse a trailing subject token back into an SDP type.
    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "offer" => Some(SdpType::Offer),
            "answer" => Some(SdpType::Answer),
            "pranswer" => Some(SdpType::Pranswer),
            "rollback" => Some(SdpType::Rollback),
            _ => None,
        }
    }
}

impl From<EventKind> for proto_gen::signalling::RoomEvents {
    fn from(value: EventKind) -> Self {
        use proto_gen::signalling::RoomEvents;
        match value {
            EventKind::UserJoinedRoom => RoomEvents::UserJoinedRoom,
            EventKind::UserLeftRoom => RoomEvents::UserLeftRoom,
            EventKind::RoomCreated => RoomEvents::RoomCreated,
            EventKind::RoomProfileUpdated => RoomEvents::RoomProfileUpdated,
            EventKind::RoomDestroyed => RoomEvents::RoomDestroyed,
            EventKind::UserRegistered => RoomEvents::UserRegistered,
            EventKind::UserProfileUpdated => RoomEvents::UserProfileUpdated,
            EventKind::UserRemoved => RoomEvents::UserRemoved,
        }
    }
}

impl From<SdpType> for proto_gen::signalling::SdpTypes {
    fn from(value: SdpType) -> Self {
        match value {
            SdpType::Offer => proto_gen::signalling::SdpTypes::Offer,
            SdpType::Answer => proto_gen::signalling::SdpTypes::Answer,
            SdpType::Pranswer => proto_gen::signalling::SdpTypes::Pranswer,
            SdpType::Rollback => proto_gen::signalling::SdpTypes::Rollback,
        }
    }
}

/// An addressed session description command relayed between peers.
///
/// The description is opaque to the service and forwarded byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdpCommand {
    pub sdp_type: SdpType,
    pub from: String,
    pub to: String,
    pub description: String,
}

/// An addressed ICE candidate offer relayed between peers.
///
/// `is_remote` marks a candidate being forwarded from the remote peer back
/// to it; the candidate string itself is opaque.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceOffer {
    pub from: String,
    pub to: String,
    pub is_remote: bool,
    pub candidate: String,
}

/// A user online status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlineStatus {
    pub id: String,
    pub online: bool,
}

/// Convert a chrono timestamp to its protobuf wire form.
#[must_use]
pub fn to_proto_timestamp(time: DateTime<Utc>) -> prost_types::Timestamp {
    prost_types::Timestamp {
        seconds: time.timestamp(),
        nanos: time.timestamp_subsec_nanos() as i32,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const ALL_KINDS: [EventKind; 8] = [
        EventKind::UserJoinedRoom,
        EventKind::UserLeftRoom,
        EventKind::RoomCreated,
        EventKind::RoomProfileUpdated,
        EventKind::RoomDestroyed,
        EventKind::UserRegistered,
        EventKind::UserProfileUpdated,
        EventKind::UserRemoved,
    ];

    #[test]
    fn test_event_kind_subject_round_trip() {
        for kind in ALL_KINDS {
            assert_eq!(EventKind::from_subject(kind.subject()), Some(kind));
        }
    }

    #[test]
    fn test_event_kind_subjects_are_unique() {
        let mut subjects: Vec<&str> = ALL_KINDS.iter().map(|k| k.subject()).collect();
        subjects.sort_unstable();
        subjects.dedup();
        assert_eq!(subjects.len(), ALL_KINDS.len());
    }

    #[test]
    fn test_online_change_is_not_a_lifecycle_kind() {
        // online-change shares the chat.user prefix but must not dispatch
        // as a lifecycle event
        assert_eq!(EventKind::from_subject(ONLINE_STATUS_SUBJECT), None);
    }

    #[test]
    fn test_unknown_subject_is_skipped() {
        assert_eq!(EventKind::from_subject("chat.room.renamed"), None);
        assert_eq!(EventKind::from_subject(""), None);
    }

    #[test]
    fn test_sdp_type_round_trip() {
        for sdp_type in [
            SdpType::Offer,
            SdpType::Answer,
            SdpType::Pranswer,
            SdpType::Rollback,
        ] {
            assert_eq!(SdpType::from_str(sdp_type.as_str()), Some(sdp_type));
        }
        assert_eq!(SdpType::from_str("renegotiate"), None);
    }

    #[test]
    fn test_room_participant_payload_field_names() {
        let payload = RoomParticipantPayload {
            user_id: "u1".to_string(),
            room_id: "r1".to_string(),
            participant_ids: vec!["u1".to_string(), "u2".to_string()],
        };

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["user_id"], "u1");
        assert_eq!(json["room_id"], "r1");
        assert_eq!(json["participant_ids"][1], "u2");
    }

    #[test]
    fn test_ice_offer_field_names() {
        let offer = IceOffer {
            from: "u1".to_string(),
            to: "u2".to_string(),
            is_remote: true,
            candidate: "candidate:1".to_string(),
        };

        let json = serde_json::to_value(&offer).unwrap();
        assert_eq!(json["from"], "u1");
        assert_eq!(json["to"], "u2");
        assert_eq!(json["is_remote"], true);
        assert_eq!(json["candidate"], "candidate:1");
    }

    #[test]
    fn test_to_proto_timestamp() {
        let time = DateTime::parse_from_rfc3339("2024-05-01T12:00:00.5Z")
            .unwrap()
            .with_timezone(&Utc);
        let ts = to_proto_timestamp(time);
        assert_eq!(ts.seconds, time.timestamp());
        assert_eq!(ts.nanos, 500_000_000);
    }
}
