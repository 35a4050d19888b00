//! Repository layer for the membership store.
//!
//! All SQL lives here as parameterized statements. Methods are generic
//! over the executor so the membership API can run them against the pool
//! or inside a transaction.

pub mod rooms;
pub mod users;

pub use rooms::{RoomRow, RoomsRepository};
pub use users::UsersRepository;
