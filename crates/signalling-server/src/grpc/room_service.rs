//! Room management gRPC service: administrative CRUD over users, rooms
//! and memberships.

use crate::rooms::RoomApi;
use proto_gen::signalling as proto;
use proto_gen::signalling::room_management_server::RoomManagement;
use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::instrument;

/// Maximum allowed entity identifier length, matching the store schema.
const MAX_ID_LENGTH: usize = 100;

/// Room management service backed by the membership API.
pub struct RoomManagementService {
    api: Arc<RoomApi>,
}

impl RoomManagementService {
    /// Create a new room management service.
    #[must_use]
    pub fn new(api: Arc<RoomApi>) -> Self {
        Self { api }
    }

    /// Validate an entity identifier on the creation paths.
    #[expect(
        clippy::result_large_err,
        reason = "Status is the standard gRPC error type"
    )]
    fn validate_id(id: &str, field_name: &str) -> Result<(), Status> {
        if id.is_empty() {
            return Err(Status::invalid_argument(format!("{field_name} is required")));
        }
        if id.len() > MAX_ID_LENGTH {
            return Err(Status::invalid_argument(format!("{field_name} is too long")));
        }
        Ok(())
    }
}

#[tonic::async_trait]
impl RoomManagement for RoomManagementService {
    #[instrument(skip_all, name = "signalling.grpc.register_user")]
    async fn register_user(
        &self,
        request: Request<proto::NewUserParam>,
    ) -> Result<Response<proto::User>, Status> {
        let req = request.into_inner();
        Self::validate_id(&req.id, "id")?;
        let user = self
            .api
            .register_user(&req.id, &req.name, &req.photo)
            .await?;
        Ok(Response::new(user.into()))
    }

    #[instrument(skip_all, name = "signalling.grpc.get_user")]
    async fn get_user(
        &self,
        request: Request<proto::GetUserParam>,
    ) -> Result<Response<proto::User>, Status> {
        let req = request.into_inner();
        let user = self.api.get_user(&req.id).await?;
        Ok(Response::new(user.into()))
    }

    #[instrument(skip_all, name = "signalling.grpc.get_users")]
    async fn get_users(
        &self,
        request: Request<proto::PaginationParam>,
    ) -> Result<Response<proto::Users>, Status> {
        let req = request.into_inner();
        let (users, count) = self
            .api
            .get_users(req.offset, req.limit, &req.keyword)
            .await?;
        Ok(Response::new(proto::Users {
            users: users.into_iter().map(Into::into).collect(),
            count,
        }))
    }

    #[instrument(skip_all, name = "signalling.grpc.get_user_access_token")]
    async fn get_user_access_token(
        &self,
        request: Request<proto::GetUserParam>,
    ) -> Result<Response<proto::UserAccessToken>, Status> {
        let req = request.into_inner();
        let token = self.api.get_user_access_token(&req.id).await?;
        Ok(Response::new(proto::UserAccessToken { token }))
    }

    #[instrument(skip_all, name = "signalling.grpc.update_user_profile")]
    async fn update_user_profile(
        &self,
        request: Request<proto::UpdateUserProfileParam>,
    ) -> Result<Response<proto::User>, Status> {
        let req = request.into_inner();
        let user = self
            .api
            .update_user_profile(&req.id, &req.name, &req.photo)
            .await?;
        Ok(Response::new(user.into()))
    }

    #[instrument(skip_all, name = "signalling.grpc.remove_user")]
    async fn remove_user(
        &self,
        request: Request<proto::GetUserParam>,
    ) -> Result<Response<proto::User>, Status> {
        let req = request.into_inner();
        let user = self.api.remove_user(&req.id).await?;
        Ok(Response::new(user.into()))
    }

    #[instrument(skip_all, name = "signalling.grpc.create_room")]
    async fn create_room(
        &self,
        request: Request<proto::NewRoomParam>,
    ) -> Result<Response<proto::Room>, Status> {
        let req = request.into_inner();
        Self::validate_id(&req.id, "id")?;
        let room = self
            .api
            .create_room(&req.id, &req.name, &req.description, &req.photo, &req.user_ids)
            .await?;
        Ok(Response::new(room.into()))
    }

    #[instrument(skip_all, name = "signalling.grpc.get_room")]
    async fn get_room(
        &self,
        request: Request<proto::GetRoomParam>,
    ) -> Result<Response<proto::Room>, Status> {
        let req = request.into_inner();
        let room = self.api.get_room(&req.id).await?;
        Ok(Response::new(room.into()))
    }

    #[instrument(skip_all, name = "signalling.grpc.get_rooms")]
    async fn get_rooms(
        &self,
        request: Request<proto::PaginationParam>,
    ) -> Result<Response<proto::Rooms>, Status> {
        let req = request.into_inner();
        let (rooms, count) = self
            .api
            .get_rooms(req.offset, req.limit, &req.keyword)
            .await?;
        Ok(Response::new(proto::Rooms {
            rooms: rooms.into_iter().map(Into::into).collect(),
            count,
        }))
    }

    #[instrument(skip_all, name = "signalling.grpc.update_room_profile")]
    async fn update_room_profile(
        &self,
        request: Request<proto::UpdateRoomProfileParam>,
    ) -> Result<Response<proto::Room>, Status> {
        let req = request.into_inner();
        let room = self
            .api
            .update_room_profile(&req.id, &req.name, &req.description, &req.photo)
            .await?;
        Ok(Response::new(room.into()))
    }

    #[instrument(skip_all, name = "signalling.grpc.add_user_to_room")]
    async fn add_user_to_room(
        &self,
        request: Request<proto::UserRoomParam>,
    ) -> Result<Response<proto::Room>, Status> {
        let req = request.into_inner();
        let room = self.api.add_user(&req.room_id, &req.user_id).await?;
        Ok(Response::new(room.into()))
    }

    #[instrument(skip_all, name = "signalling.grpc.kick_user_from_room")]
    async fn kick_user_from_room(
        &self,
        request: Request<proto::UserRoomParam>,
    ) -> Result<Response<proto::Room>, Status> {
        let req = request.into_inner();
        let room = self.api.kick_user(&req.room_id, &req.user_id).await?;
        Ok(Response::new(room.into()))
    }

    #[instrument(skip_all, name = "signalling.grpc.destroy_room")]
    async fn destroy_room(
        &self,
        request: Request<proto::GetRoomParam>,
    ) -> Result<Response<proto::Room>, Status> {
        let req = request.into_inner();
        let room = self.api.destroy_room(&req.id).await?;
        Ok(Response::new(room.into()))
    }
}
