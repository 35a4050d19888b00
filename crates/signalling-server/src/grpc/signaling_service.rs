//! Signalling gRPC service: per-caller streaming sessions and unary
//! signalling operations.
//!
//! Identity binding: every call carries a signed access token in metadata
//! under `token`; the decoded user id becomes the scoped caller identity
//! handed to the signalling API. Absent or invalid tokens fail with
//! `PermissionDenied` before any work happens.
//!
//! Session lifecycle for streaming endpoints: a fresh local channel pair
//! and a private bus subscription per call. When the API task exits (caller
//! disconnect, send failure, cancellation), the bus subscription is
//! dropped first, its pump tasks drain, and the downstream channel closes.

use crate::auth::{self, TOKEN_METADATA_KEY};
use crate::bus::BusAdapter;
use crate::signaling::SignalingApi;
use futures::{Stream, StreamExt};
use proto_gen::signalling as proto;
use proto_gen::signalling::signalling_server::Signalling;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::metadata::MetadataMap;
use tonic::{Request, Response, Status, Streaming};
use tracing::instrument;

/// Buffer size of per-session local channels.
const SESSION_CHANNEL_CAPACITY: usize = 64;

type ResponseStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send + 'static>>;

/// Signalling service backed by the per-caller signalling API.
pub struct SignallingService {
    api: Arc<SignalingApi>,
    bus: BusAdapter,
    access_secret: String,
    shutdown: tokio_util::sync::CancellationToken,
}

impl SignallingService {
    /// Create a new signalling service.
    #[must_use]
    pub fn new(
        api: Arc<SignalingApi>,
        bus: BusAdapter,
        access_secret: String,
        shutdown: tokio_util::sync::CancellationToken,
    ) -> Self {
        Self {
            api,
            bus,
            access_secret,
            shutdown,
        }
    }

    /// Extract and verify the caller identity from call metadata.
    #[expect(
        clippy::result_large_err,
        reason = "Status is the standard gRPC error type"
    )]
    fn caller_id(&self, metadata: &MetadataMap) -> Result<String, Status> {
        let token = metadata
            .get(TOKEN_METADATA_KEY)
            .ok_or_else(|| Status::permission_denied("token not found on metadata"))?
            .to_str()
            .map_err(|_| Status::permission_denied("invalid token"))?;
        let claims = auth::validate_token(&self.access_secret, token)
            .map_err(|_| Status::permission_denied("invalid token"))?;
        Ok(claims.user_id)
    }
}

#[tonic::async_trait]
impl Signalling for SignallingService {
    #[instrument(skip_all, name = "signalling.grpc.get_profile")]
    async fn get_profile(
        &self,
        request: Request<()>,
    ) -> Result<Response<proto::Profile>, Status> {
        let user_id = self.caller_id(request.metadata())?;
        let profile = self.api.my_profile(&user_id).await?;
        Ok(Response::new(profile))
    }

    #[instrument(skip_all, name = "signalling.grpc.update_profile")]
    async fn update_profile(
        &self,
        request: Request<proto::UpdateProfileParam>,
    ) -> Result<Response<proto::Profile>, Status> {
        let user_id = self.caller_id(request.metadata())?;
        let req = request.into_inner();
        let profile = self
            .api
            .update_profile(&user_id, &req.name, &req.photo)
            .await?;
        Ok(Response::new(profile))
    }

    #[instrument(skip_all, name = "signalling.grpc.get_my_rooms")]
    async fn get_my_rooms(
        &self,
        request: Request<()>,
    ) -> Result<Response<proto::Rooms>, Status> {
        let user_id = self.caller_id(request.metadata())?;
        let (rooms, count) = self.api.my_rooms(&user_id).await?;
        Ok(Response::new(proto::Rooms {
            rooms: rooms.into_iter().map(Into::into).collect(),
            count,
        }))
    }

    #[instrument(skip_all, name = "signalling.grpc.get_room")]
    async fn get_room(
        &self,
        request: Request<proto::GetRoomParam>,
    ) -> Result<Response<proto::Room>, Status> {
        let user_id = self.caller_id(request.metadata())?;
        let req = request.into_inner();
        let room = self.api.my_room_info(&user_id, &req.id).await?;
        Ok(Response::new(room.into()))
    }

    #[instrument(skip_all, name = "signalling.grpc.get_user")]
    async fn get_user(
        &self,
        request: Request<proto::GetUserParam>,
    ) -> Result<Response<proto::User>, Status> {
        self.caller_id(request.metadata())?;
        let req = request.into_inner();
        let user = self.api.get_user(&req.id).await?;
        Ok(Response::new(user.into()))
    }

    #[instrument(skip_all, name = "signalling.grpc.offer_session_description")]
    async fn offer_session_description(
        &self,
        request: Request<proto::SdpParam>,
    ) -> Result<Response<()>, Status> {
        let user_id = self.caller_id(request.metadata())?;
        let req = request.into_inner();
        self.api
            .offer_sdp(&user_id, &req.user_id, &req.description)
            .await?;
        Ok(Response::new(()))
    }

    #[instrument(skip_all, name = "signalling.grpc.answer_session_description")]
    async fn answer_session_description(
        &self,
        request: Request<proto::SdpParam>,
    ) -> Result<Response<()>, Status> {
        let user_id = self.caller_id(request.metadata())?;
        let req = request.into_inner();
        self.api
            .answer_sdp(&user_id, &req.user_id, &req.description)
            .await?;
        Ok(Response::new(()))
    }

    type SubscribeSdpCommandStream = ResponseStream<proto::Sdp>;

    #[instrument(skip_all, name = "signalling.grpc.subscribe_sdp_command")]
    async fn subscribe_sdp_command(
        &self,
        request: Request<()>,
    ) -> Result<Response<Self::SubscribeSdpCommandStream>, Status> {
        let user_id = self.caller_id(request.metadata())?;

        let (commands_tx, commands_rx) = mpsc::channel(SESSION_CHANNEL_CAPACITY);
        let subscription = self.bus.subscribe_sdp_commands(commands_tx).await?;
        let (out_tx, out_rx) = mpsc::channel(SESSION_CHANNEL_CAPACITY);

        let api = Arc::clone(&self.api);
        let cancel = self.shutdown.child_token();
        tokio::spawn(async move {
            if let Err(e) = api
                .subscribe_sdp_commands(&user_id, commands_rx, out_tx.clone(), cancel)
                .await
            {
                tracing::warn!(target: "signalling.grpc", error = %e, "SDP relay session failed");
            }
            // Unsubscribe and drain before the downstream channel closes
            subscription.shutdown().await;
            drop(out_tx);
        });

        let stream = ReceiverStream::new(out_rx).map(Ok);
        Ok(Response::new(Box::pin(stream)))
    }

    type SubscribeRoomEventStream = ResponseStream<proto::RoomEvent>;

    #[instrument(skip_all, name = "signalling.grpc.subscribe_room_event")]
    async fn subscribe_room_event(
        &self,
        request: Request<()>,
    ) -> Result<Response<Self::SubscribeRoomEventStream>, Status> {
        let user_id = self.caller_id(request.metadata())?;

        let (events_tx, events_rx) = mpsc::channel(SESSION_CHANNEL_CAPACITY);
        let subscription = self.bus.subscribe_room_events(events_tx).await?;
        let (out_tx, out_rx) = mpsc::channel(SESSION_CHANNEL_CAPACITY);

        let api = Arc::clone(&self.api);
        let cancel = self.shutdown.child_token();
        tokio::spawn(async move {
            if let Err(e) = api
                .subscribe_room_events(&user_id, events_rx, out_tx.clone(), cancel)
                .await
            {
                tracing::warn!(target: "signalling.grpc", error = %e, "Room event session failed");
            }
            subscription.shutdown().await;
            drop(out_tx);
        });

        let stream = ReceiverStream::new(out_rx).map(Ok);
        Ok(Response::new(Box::pin(stream)))
    }

    #[instrument(skip_all, name = "signalling.grpc.send_ice_candidate")]
    async fn send_ice_candidate(
        &self,
        request: Request<proto::IceParam>,
    ) -> Result<Response<()>, Status> {
        let user_id = self.caller_id(request.metadata())?;
        let req = request.into_inner();
        self.api
            .send_ice_candidate(&user_id, &req.user_id, &req.candidate, req.is_remote)
            .await?;
        Ok(Response::new(()))
    }

    type SubscribeIceCandidateStream = ResponseStream<proto::IceOffer>;

    #[instrument(skip_all, name = "signalling.grpc.subscribe_ice_candidate")]
    async fn subscribe_ice_candidate(
        &self,
        request: Request<()>,
    ) -> Result<Response<Self::SubscribeIceCandidateStream>, Status> {
        let user_id = self.caller_id(request.metadata())?;

        let (offers_tx, offers_rx) = mpsc::channel(SESSION_CHANNEL_CAPACITY);
        let subscription = self.bus.subscribe_ice_offers(offers_tx).await?;
        let (out_tx, out_rx) = mpsc::channel(SESSION_CHANNEL_CAPACITY);

        let api = Arc::clone(&self.api);
        let cancel = self.shutdown.child_token();
        tokio::spawn(async move {
            if let Err(e) = api
                .subscribe_ice_candidates(&user_id, offers_rx, out_tx.clone(), cancel)
                .await
            {
                tracing::warn!(target: "signalling.grpc", error = %e, "ICE relay session failed");
            }
            subscription.shutdown().await;
            drop(out_tx);
        });

        let stream = ReceiverStream::new(out_rx).map(Ok);
        Ok(Response::new(Box::pin(stream)))
    }

    type SubscribeOnlineStatusStream = ResponseStream<proto::OnlineStatus>;

    #[instrument(skip_all, name = "signalling.grpc.subscribe_online_status")]
    async fn subscribe_online_status(
        &self,
        request: Request<Streaming<proto::Heartbeat>>,
    ) -> Result<Response<Self::SubscribeOnlineStatusStream>, Status> {
        let user_id = self.caller_id(request.metadata())?;
        let mut inbound = request.into_inner();

        // Heartbeats pump: closing the channel (client disconnect or
        // stream error) reads to the watchdog as a stall
        let (heartbeat_tx, heartbeat_rx) = mpsc::channel(SESSION_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            loop {
                match inbound.next().await {
                    Some(Ok(beat)) => {
                        if heartbeat_tx.send(beat).await.is_err() {
                            return;
                        }
                    }
                    Some(Err(_)) | None => return,
                }
            }
        });

        let (status_tx, status_rx) = mpsc::channel(SESSION_CHANNEL_CAPACITY);
        let subscription = self.bus.subscribe_online_status(status_tx).await?;
        let (out_tx, out_rx) = mpsc::channel(SESSION_CHANNEL_CAPACITY);

        let api = Arc::clone(&self.api);
        let cancel = self.shutdown.child_token();
        tokio::spawn(async move {
            if let Err(e) = api
                .subscribe_online_status(&user_id, heartbeat_rx, status_rx, out_tx.clone(), cancel)
                .await
            {
                tracing::warn!(target: "signalling.grpc", error = %e, "Presence session failed");
            }
            subscription.shutdown().await;
            drop(out_tx);
        });

        let stream = ReceiverStream::new(out_rx).map(Ok);
        Ok(Response::new(Box::pin(stream)))
    }
}
