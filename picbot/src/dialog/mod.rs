//! Per-conversation dialogue state machine.
//!
//! An inbound message is classified against the conversation's current state
//! ([`Event`]), matched against the ordered [`RouteTable`] to pick a [`Step`],
//! and applied to the session by [`transition`] under the per-conversation
//! lock. The resulting [`Effect`]s (replies and external operations) are then
//! executed by [`Dialog`] outside the lock.
//!
//! ```text
//! Idle ──text──▶ AwaitingResultCount ──number──▶ search ──▶ Idle
//!  │                     └──cancel──▶ Idle
//!  └──photo──▶ ImageMenu ◀──────────────┐
//!               ├─describe/similar──▶ (stay)
//!               ├─question──▶ AwaitingQuestion ──text──┘
//!               └─other──▶ Idle
//! ```

mod classify;
mod handler;
pub mod messages;
mod routes;
mod state;
mod transition;

#[cfg(test)]
mod proptests;

pub use classify::{ContentKind, Event};
pub use handler::Dialog;
pub use messages::actions;
pub use routes::{Predicate, Route, RouteTable, Step, parse_count};
pub use state::DialogState;
pub use transition::{
    DialogSettings, Effect, IMAGE_KEY, QUERY_KEY, SEARCH_PENDING_KEY, Transition, abandon_image,
    finish_search, transition,
};
