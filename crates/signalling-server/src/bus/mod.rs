//! Bus adapter: bidirectional bridge between typed in-process streams and
//! the NATS subject tree.
//!
//! Subjects are `<namespace>.<suffix>` with the suffixes defined in
//! [`crate::events`]. Payloads are self-describing JSON records; lifecycle
//! event records additionally carry the envelope timestamp so delivered
//! events retain their original emission time. Delivery is at-least-once
//! with no cross-subject ordering; decode failures are logged and the
//! message dropped, never surfaced.

use crate::errors::ApiError;
use crate::events::{
    EventKind, EventPayload, IceOffer, OnlineStatus, RoomEvent, RoomInstancePayload,
    RoomParticipantPayload, SdpCommand, SdpType, UserInstancePayload, ICE_CANDIDATE_SUBJECT,
    ONLINE_STATUS_SUBJECT, SDP_SUBJECT_PREFIX,
};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A lifecycle event payload on the wire, with the envelope timestamp
/// alongside the payload fields.
#[derive(Serialize, Deserialize)]
struct EventRecord<T> {
    #[serde(flatten)]
    payload: T,
    time: DateTime<Utc>,
}

/// SDP command record; the type travels in the subject, not the payload.
#[derive(Serialize, Deserialize)]
struct SdpRecord {
    from: String,
    to: String,
    description: String,
}

/// Encode a lifecycle event into its subject suffix and JSON record.
fn encode_room_event(event: &RoomEvent) -> Result<(String, Vec<u8>), serde_json::Error> {
    let suffix = event.kind.subject().to_string();
    let bytes = match &event.payload {
        EventPayload::RoomParticipant(p) => serde_json::to_vec(&EventRecord {
            payload: p,
            time: event.time,
        })?,
        EventPayload::RoomInstance(p) => serde_json::to_vec(&EventRecord {
            payload: p,
            time: event.time,
        })?,
        EventPayload::UserInstance(p) => serde_json::to_vec(&EventRecord {
            payload: p,
            time: event.time,
        })?,
    };
    Ok((suffix, bytes))
}

fn decode_record<T: DeserializeOwned>(data: &[u8]) -> Option<EventRecord<T>> {
    match serde_json::from_slice(data) {
        Ok(record) => Some(record),
        Err(e) => {
            tracing::error!(target: "signalling.bus", error = %e, "Dropping undecodable bus message");
            None
        }
    }
}

/// Decode a lifecycle event from its subject suffix and JSON record.
///
/// Returns `None` for unknown suffixes (for example the online-change
/// subject sharing the `chat.user` prefix) and for undecodable payloads.
fn decode_room_event(suffix: &str, data: &[u8]) -> Option<RoomEvent> {
    let kind = EventKind::from_subject(suffix)?;
    let (payload, time) = match kind {
        EventKind::UserJoinedRoom | EventKind::UserLeftRoom => {
            let record = decode_record::<RoomParticipantPayload>(data)?;
            (EventPayload::RoomParticipant(record.payload), record.time)
        }
        EventKind::RoomCreated | EventKind::RoomProfileUpdated | EventKind::RoomDestroyed => {
            let record = decode_record::<RoomInstancePayload>(data)?;
            (EventPayload::RoomInstance(record.payload), record.time)
        }
        EventKind::UserRegistered | EventKind::UserProfileUpdated | EventKind::UserRemoved => {
            let record = decode_record::<UserInstancePayload>(data)?;
            (EventPayload::UserInstance(record.payload), record.time)
        }
    };
    Some(RoomEvent {
        kind,
        payload,
        time,
    })
}

/// Decode an SDP command from the trailing subject token and JSON record.
fn decode_sdp_command(type_token: &str, data: &[u8]) -> Option<SdpCommand> {
    let sdp_type = SdpType::from_str(type_token)?;
    let record: SdpRecord = match serde_json::from_slice(data) {
        Ok(record) => record,
        Err(e) => {
            tracing::error!(target: "signalling.bus", error = %e, "Dropping undecodable SDP message");
            return None;
        }
    };
    Some(SdpCommand {
        sdp_type,
        from: record.from,
        to: record.to,
        description: record.description,
    })
}

fn decode_json<T: DeserializeOwned>(data: &[u8]) -> Option<T> {
    match serde_json::from_slice(data) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::error!(target: "signalling.bus", error = %e, "Dropping undecodable bus message");
            None
        }
    }
}

/// Handle on one logical bus subscription and its pump tasks.
///
/// Teardown is deterministic: the server-side subscriptions are dropped
/// first, then the pump tasks drain and exit, which closes the local
/// downstream channel.
pub struct BusSubscription {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl BusSubscription {
    /// Unsubscribe and wait for the pump tasks to drain.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::warn!(target: "signalling.bus", error = %e, "Bus pump task failed");
            }
        }
    }
}

/// Bidirectional bridge between in-process channels and the bus.
#[derive(Clone)]
pub struct BusAdapter {
    client: async_nats::Client,
    namespace: String,
}

impl BusAdapter {
    /// Connect to the bus.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Bus`] when the endpoint is unreachable.
    pub async fn connect(url: &str, namespace: &str) -> Result<Self, ApiError> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| ApiError::Bus(e.to_string()))?;
        Ok(Self {
            client,
            namespace: namespace.to_string(),
        })
    }

    fn subject(&self, suffix: &str) -> String {
        format!("{}.{}", self.namespace, suffix)
    }

    async fn publish(&self, subject: String, bytes: Vec<u8>) {
        if let Err(e) = self.client.publish(subject.clone(), bytes.into()).await {
            tracing::error!(
                target: "signalling.bus",
                subject = %subject,
                error = %e,
                "Publish failed"
            );
        }
    }

    /// Pump lifecycle events from the local channel onto the bus.
    #[must_use]
    pub fn spawn_room_event_publisher(
        &self,
        mut events: mpsc::Receiver<RoomEvent>,
    ) -> JoinHandle<()> {
        let adapter = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match encode_room_event(&event) {
                    Ok((suffix, bytes)) => {
                        adapter.publish(adapter.subject(&suffix), bytes).await;
                    }
                    Err(e) => {
                        tracing::error!(target: "signalling.bus", error = %e, "Event encode failed");
                    }
                }
            }
        })
    }

    /// Pump SDP commands from the local channel onto the bus. The SDP type
    /// becomes the trailing subject token.
    #[must_use]
    pub fn spawn_sdp_publisher(&self, mut commands: mpsc::Receiver<SdpCommand>) -> JoinHandle<()> {
        let adapter = self.clone();
        tokio::spawn(async move {
            while let Some(command) = commands.recv().await {
                let suffix = format!("{}.{}", SDP_SUBJECT_PREFIX, command.sdp_type.as_str());
                let record = SdpRecord {
                    from: command.from,
                    to: command.to,
                    description: command.description,
                };
                match serde_json::to_vec(&record) {
                    Ok(bytes) => adapter.publish(adapter.subject(&suffix), bytes).await,
                    Err(e) => {
                        tracing::error!(target: "signalling.bus", error = %e, "SDP encode failed");
                    }
                }
            }
        })
    }

    /// Pump ICE candidate offers from the local channel onto the bus.
    #[must_use]
    pub fn spawn_ice_publisher(&self, mut offers: mpsc::Receiver<IceOffer>) -> JoinHandle<()> {
        let adapter = self.clone();
        tokio::spawn(async move {
            while let Some(offer) = offers.recv().await {
                match serde_json::to_vec(&offer) {
                    Ok(bytes) => {
                        adapter
                            .publish(adapter.subject(ICE_CANDIDATE_SUBJECT), bytes)
                            .await;
                    }
                    Err(e) => {
                        tracing::error!(target: "signalling.bus", error = %e, "ICE encode failed");
                    }
                }
            }
        })
    }

    /// Pump online status changes from the local channel onto the bus.
    #[must_use]
    pub fn spawn_online_status_publisher(
        &self,
        mut statuses: mpsc::Receiver<OnlineStatus>,
    ) -> JoinHandle<()> {
        let adapter = self.clone();
        tokio::spawn(async move {
            while let Some(status) = statuses.recv().await {
                match serde_json::to_vec(&status) {
                    Ok(bytes) => {
                        adapter
                            .publish(adapter.subject(ONLINE_STATUS_SUBJECT), bytes)
                            .await;
                    }
                    Err(e) => {
                        tracing::error!(target: "signalling.bus", error = %e, "Status encode failed");
                    }
                }
            }
        })
    }

    /// Subscribe to lifecycle events, decoding into the given channel.
    ///
    /// Covers both the `chat.room.*` and `chat.user.*` prefixes; subjects
    /// outside the lifecycle set (`online-change`) are skipped by
    /// dispatch.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Bus`] when the subscription cannot be
    /// established.
    pub async fn subscribe_room_events(
        &self,
        tx: mpsc::Sender<RoomEvent>,
    ) -> Result<BusSubscription, ApiError> {
        let cancel = CancellationToken::new();
        let mut handles = Vec::new();
        for prefix in ["chat.room.*", "chat.user.*"] {
            let subscriber = self
                .client
                .subscribe(self.subject(prefix))
                .await
                .map_err(|e| ApiError::Bus(e.to_string()))?;
            handles.push(spawn_pump(subscriber, tx.clone(), cancel.clone(), {
                let ns_prefix = format!("{}.", self.namespace);
                move |subject, data| {
                    let suffix = subject.strip_prefix(ns_prefix.as_str())?;
                    decode_room_event(suffix, data)
                }
            }));
        }
        Ok(BusSubscription { cancel, handles })
    }

    /// Subscribe to SDP commands, decoding into the given channel.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Bus`] when the subscription cannot be
    /// established.
    pub async fn subscribe_sdp_commands(
        &self,
        tx: mpsc::Sender<SdpCommand>,
    ) -> Result<BusSubscription, ApiError> {
        let cancel = CancellationToken::new();
        let subscriber = self
            .client
            .subscribe(self.subject(&format!("{SDP_SUBJECT_PREFIX}.*")))
            .await
            .map_err(|e| ApiError::Bus(e.to_string()))?;
        let type_prefix = format!("{}.{}.", self.namespace, SDP_SUBJECT_PREFIX);
        let handle = spawn_pump(subscriber, tx, cancel.clone(), move |subject, data| {
            let type_token = subject.strip_prefix(type_prefix.as_str())?;
            decode_sdp_command(type_token, data)
        });
        Ok(BusSubscription {
            cancel,
            handles: vec![handle],
        })
    }

    /// Subscribe to ICE candidate offers, decoding into the given channel.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Bus`] when the subscription cannot be
    /// established.
    pub async fn subscribe_ice_offers(
        &self,
        tx: mpsc::Sender<IceOffer>,
    ) -> Result<BusSubscription, ApiError> {
        let cancel = CancellationToken::new();
        let subscriber = self
            .client
            .subscribe(self.subject(ICE_CANDIDATE_SUBJECT))
            .await
            .map_err(|e| ApiError::Bus(e.to_string()))?;
        let handle = spawn_pump(subscriber, tx, cancel.clone(), |_, data| decode_json(data));
        Ok(BusSubscription {
            cancel,
            handles: vec![handle],
        })
    }

    /// Subscribe to online status changes, decoding into the given
    /// channel.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Bus`] when the subscription cannot be
    /// established.
    pub async fn subscribe_online_status(
        &self,
        tx: mpsc::Sender<OnlineStatus>,
    ) -> Result<BusSubscription, ApiError> {
        let cancel = CancellationToken::new();
        let subscriber = self
            .client
            .subscribe(self.subject(ONLINE_STATUS_SUBJECT))
            .await
            .map_err(|e| ApiError::Bus(e.to_string()))?;
        let handle = spawn_pump(subscriber, tx, cancel.clone(), |_, data| decode_json(data));
        Ok(BusSubscription {
            cancel,
            handles: vec![handle],
        })
    }
}

/// Pump one subscription into a local channel until cancelled, the
/// subscription ends or the receiver side goes away.
fn spawn_pump<T, F>(
    mut subscriber: async_nats::Subscriber,
    tx: mpsc::Sender<T>,
    cancel: CancellationToken,
    decode: F,
) -> JoinHandle<()>
where
    T: Send + 'static,
    F: Fn(&str, &[u8]) -> Option<T> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    if let Err(e) = subscriber.unsubscribe().await {
                        tracing::warn!(target: "signalling.bus", error = %e, "Unsubscribe failed");
                    }
                    return;
                }
                message = subscriber.next() => {
                    let Some(message) = message else { return };
                    let Some(value) = decode(message.subject.as_str(), &message.payload) else {
                        continue;
                    };
                    if tx.send(value).await.is_err() {
                        return;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_room_event_codec_round_trip() {
        let event = RoomEvent {
            kind: EventKind::UserJoinedRoom,
            payload: EventPayload::RoomParticipant(RoomParticipantPayload {
                user_id: "u7".to_string(),
                room_id: "r3".to_string(),
                participant_ids: vec!["u2".to_string(), "u3".to_string(), "u4".to_string()],
            }),
            time: sample_time(),
        };

        let (suffix, bytes) = encode_room_event(&event).unwrap();
        assert_eq!(suffix, "chat.room.user-joined");

        let decoded = decode_room_event(&suffix, &bytes).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_room_event_record_is_self_describing() {
        let event = RoomEvent {
            kind: EventKind::RoomCreated,
            payload: EventPayload::RoomInstance(RoomInstancePayload {
                id: "r1".to_string(),
                name: "standup".to_string(),
                photo: String::new(),
                description: "daily".to_string(),
                member_ids: vec!["u1".to_string()],
            }),
            time: sample_time(),
        };

        let (_, bytes) = encode_room_event(&event).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["id"], "r1");
        assert_eq!(json["member_ids"][0], "u1");
        assert!(json["time"].is_string());
    }

    #[test]
    fn test_decode_unknown_subject_is_skipped() {
        assert!(decode_room_event("chat.user.online-change", b"{}").is_none());
        assert!(decode_room_event("chat.room.renamed", b"{}").is_none());
    }

    #[test]
    fn test_decode_malformed_payload_is_dropped() {
        assert!(decode_room_event("chat.room.user-joined", b"not-json").is_none());
        assert!(decode_room_event("chat.room.user-joined", b"{\"user_id\":3}").is_none());
        assert!(decode_sdp_command("offer", b"not-json").is_none());
    }

    #[test]
    fn test_sdp_codec_type_from_subject_token() {
        let record = SdpRecord {
            from: "u1".to_string(),
            to: "u2".to_string(),
            description: "D".to_string(),
        };
        let bytes = serde_json::to_vec(&record).unwrap();

        // The payload carries no type field; the token decides
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(json.get("type").is_none());

        let command = decode_sdp_command("pranswer", &bytes).unwrap();
        assert_eq!(command.sdp_type, SdpType::Pranswer);
        assert_eq!(command.from, "u1");
        assert_eq!(command.to, "u2");
        assert_eq!(command.description, "D");

        assert!(decode_sdp_command("renegotiate", &bytes).is_none());
    }

    #[test]
    fn test_ice_and_online_records_round_trip() {
        let offer = IceOffer {
            from: "u1".to_string(),
            to: "u2".to_string(),
            is_remote: true,
            candidate: "candidate:1".to_string(),
        };
        let bytes = serde_json::to_vec(&offer).unwrap();
        assert_eq!(decode_json::<IceOffer>(&bytes).unwrap(), offer);

        let status = OnlineStatus {
            id: "u1".to_string(),
            online: false,
        };
        let bytes = serde_json::to_vec(&status).unwrap();
        assert_eq!(decode_json::<OnlineStatus>(&bytes).unwrap(), status);
    }
}
