//! Generated Protocol Buffer code for the signalling service.
//!
//! This crate contains the compiled Protocol Buffer definitions for the
//! RoomManagement and Signalling gRPC services.

#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)] // Generated code has various doc formatting
#![allow(clippy::default_trait_access)] // Generated code uses Default::default()
#![allow(clippy::too_many_lines)] // Generated code has long functions

// Re-export prost traits for convenience
pub use prost::Message;

// Re-export tonic for gRPC service traits
pub use tonic;

// Generated protobuf module
pub mod signalling {
    //! Client-server signalling messages with gRPC service traits
    tonic::include_proto!("signalling");
}
