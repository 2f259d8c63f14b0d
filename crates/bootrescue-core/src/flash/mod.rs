//! Flash controller operations
//!
//! [`unlock`]/[`lock`] drive the key sequences, the engine functions erase
//! 64 byte pages and program 64 byte blocks. Every function takes the
//! register bus explicitly and keeps no state between calls.

mod engine;
mod unlock;

pub use engine::*;
pub use unlock::{is_locked, lock, unlock};
