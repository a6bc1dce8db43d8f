//! Wire models shared by the locker client crates.

pub mod api;
pub mod events;
pub mod models;
pub mod timestamp;
