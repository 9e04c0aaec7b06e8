//! Session management for conversation state.
//!
//! Each conversation owns one [`Session`]: a dialog state plus a data bag.
//! The [`SessionStore`] serializes mutations per conversation and delegates
//! persistence to a pluggable [`SessionStorage`] backend.

mod locks;
mod storage;
mod store;

pub use locks::{KeyGuard, KeyedLocks};
pub use storage::{FileStorage, MemoryStorage, SessionData, SessionStorage};
pub use store::{Session, SessionStore};
