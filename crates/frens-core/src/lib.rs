//! Foundational Nostr data types shared across frens crates.
//!
//! Provides the signed event model, subscription filters, the NIP-01 message
//! frames and the time helpers used for handshake freshness checks.

pub mod event;
pub mod filter;
pub mod message;
pub mod time_utils;

pub use event::*;
pub use filter::*;
pub use message::*;
pub use time_utils::{current_unix_timestamp, is_within_skew};
