//! gRPC service layer: maps RPC sessions onto the membership and
//! signalling APIs.
//!
//! Unary endpoints are thin pass-throughs after identity binding. Each
//! streaming endpoint owns a fresh pair of local channels and its own bus
//! subscription, hands them to the signalling API, and pipes the output to
//! the RPC send path.

pub mod room_service;
pub mod signaling_service;

pub use room_service::RoomManagementService;
pub use signaling_service::SignallingService;
