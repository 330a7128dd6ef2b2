//! Allow-list resolution and admission enforcement for the frens relay.
//!
//! An [`AllowListSource`] resolves the set of member identities once at
//! startup (and optionally on a refresh cadence); an [`AuthorizationGate`]
//! answers query and write admission from a connection's authenticated
//! identity against the published snapshot.
pub mod allowlist;
pub mod error;
pub mod gate;
pub mod identity;
pub mod membership;
pub mod refresh;
pub mod social_graph;
pub mod well_known;

pub use allowlist::*;
pub use error::*;
pub use gate::*;
pub use identity::*;
pub use membership::*;
pub use refresh::*;
pub use social_graph::*;
pub use well_known::*;
