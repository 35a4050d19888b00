//! Service error types.
//!
//! All errors map to gRPC status codes via `From<ApiError> for Status`.
//! Store and bus failures are logged server-side and surfaced with generic
//! messages to avoid leaking internal details.

use thiserror::Error;
use tonic::Status;

/// Signalling service error type.
///
/// Maps to gRPC status codes:
/// - UserAlreadyExists, RoomAlreadyExists: ALREADY_EXISTS
/// - UserNotFound, RoomNotFound, MemberNotFound: NOT_FOUND
/// - ContextInvalid, PermissionDenied: PERMISSION_DENIED
/// - Store, Bus, Decode: INTERNAL
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("user with same id already exists")]
    UserAlreadyExists,

    #[error("user not found")]
    UserNotFound,

    #[error("room with same id already exists")]
    RoomAlreadyExists,

    #[error("room not found")]
    RoomNotFound,

    #[error("member not found")]
    MemberNotFound,

    #[error("context invalid")]
    ContextInvalid,

    #[error("permission denied")]
    PermissionDenied,

    #[error("store failure: {0}")]
    Store(#[from] sqlx::Error),

    #[error("bus failure: {0}")]
    Bus(String),

    #[error("decode failure: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("token failure: {0}")]
    Token(#[from] crate::auth::TokenError),
}

impl From<ApiError> for Status {
    fn from(err: ApiError) -> Self {
        match &err {
            ApiError::UserAlreadyExists | ApiError::RoomAlreadyExists => {
                Status::already_exists(err.to_string())
            }
            ApiError::UserNotFound | ApiError::RoomNotFound | ApiError::MemberNotFound => {
                Status::not_found(err.to_string())
            }
            ApiError::ContextInvalid | ApiError::PermissionDenied => {
                Status::permission_denied(err.to_string())
            }
            ApiError::Store(cause) => {
                // Log actual error server-side, return generic message to client
                tracing::error!(target: "signalling.store", error = %cause, "Store operation failed");
                Status::internal("store failure")
            }
            ApiError::Bus(cause) => {
                tracing::error!(target: "signalling.bus", error = %cause, "Bus operation failed");
                Status::internal("bus failure")
            }
            ApiError::Decode(cause) => {
                tracing::error!(target: "signalling.bus", error = %cause, "Payload decode failed");
                Status::internal("decode failure")
            }
            ApiError::Token(cause) => {
                tracing::error!(target: "signalling.auth", error = %cause, "Token signing failed");
                Status::internal("token failure")
            }
        }
    }
}
