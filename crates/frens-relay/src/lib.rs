//! Members-only Nostr relay: NIP-01 message handling, the NIP-42 handshake,
//! NIP-11 information and pluggable event storage, with every query and write
//! admitted through a [`frens_access::AdmissionHooks`] gate.
pub mod event_store;
pub mod postgres_store;
pub mod relay_info;
pub mod relay_server;
pub mod sqlite_store;

pub use event_store::*;
pub use postgres_store::*;
pub use relay_info::*;
pub use relay_server::*;
pub use sqlite_store::*;
