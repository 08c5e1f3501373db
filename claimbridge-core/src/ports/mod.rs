//! Collaborator ports the engine needs, with in-memory adapters.
//!
//! Durable storage and the human review queue live outside this crate; the
//! engine only appends and reads.

pub mod review;
pub mod store;

pub use review::{InMemoryReviewQueue, ReviewQueue, ReviewReason, ReviewTicket};
pub use store::{ClaimStore, InMemoryClaimStore};
