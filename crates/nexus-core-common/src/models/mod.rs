//! Core domain models shared across all Nexus services.
//!
//! These are the "truth" types — what the database stores and the API serializes.
//! Each model is keyed by a UUIDv7, giving globally unique, time-sortable identifiers
//! without a coordinated ID-generation service.

pub mod conversation;
pub mod crypto;
pub mod message;
pub mod outbox;

/// Re-export all model types for convenience.
pub use conversation::*;
pub use crypto::*;
pub use message::*;
pub use outbox::*;
