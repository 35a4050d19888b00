//! WebRTC signalling service.
//!
//! Mediates peer-to-peer session establishment: SDP offer/answer exchange,
//! ICE candidate trickling, membership-scoped event fan-out and per-user
//! presence, across a fleet of stateless instances coordinating through a
//! shared NATS bus.
//!
//! # Architecture
//!
//! ```text
//! grpc/*.rs -> rooms/, signaling/ -> repositories/*.rs (Postgres)
//!                    |
//!                  bus/ (NATS subject tree, JSON records)
//! ```
//!
//! # Modules
//!
//! - `config` - Configuration from yaml file and environment
//! - `errors` - Error types with gRPC status mapping
//! - `auth` - HS256 access tokens
//! - `events` - Event taxonomy and domain payloads
//! - `models` - Domain models and wire conversions
//! - `repositories` - Store access (sqlx)
//! - `rooms` - Membership API (sole writer, sole event emitter)
//! - `signaling` - Per-caller event filter, SDP/ICE relay, presence
//! - `bus` - Bus adapter between typed channels and NATS subjects
//! - `grpc` - RPC session lifecycle

pub mod auth;
pub mod bus;
pub mod config;
pub mod errors;
pub mod events;
pub mod grpc;
pub mod models;
pub mod repositories;
pub mod rooms;
pub mod signaling;
