use frens_core::{Event, Filter};

use crate::{AllowList, AllowListHandle, Identity};

pub const QUERY_AUTH_REQUIRED_REASON: &str =
    "auth-required: this query requires you to be authenticated";
pub const WRITE_AUTH_REQUIRED_REASON: &str =
    "auth-required: publishing this event requires authentication";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionIntent {
    Query,
    Write,
}

impl AdmissionIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Write => "write",
        }
    }

    fn denial_reason(&self) -> &'static str {
        match self {
            Self::Query => QUERY_AUTH_REQUIRED_REASON,
            Self::Write => WRITE_AUTH_REQUIRED_REASON,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionVerdict {
    Allowed,
    Denied { reason: &'static str },
}

impl AdmissionVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

#[derive(Debug, Clone)]
/// Membership check shared by every connection task.
///
/// Holds no lock and never writes; each decision reads one published
/// allow-list snapshot.
pub struct AuthorizationGate {
    allowlist: AllowListHandle,
}

impl AuthorizationGate {
    pub fn new(allowlist: AllowListHandle) -> Self {
        Self { allowlist }
    }

    pub fn from_allowlist(allowlist: AllowList) -> Self {
        Self::new(AllowListHandle::new(allowlist))
    }

    pub fn allowlist(&self) -> &AllowListHandle {
        &self.allowlist
    }

    /// Unauthenticated sessions are always denied, for reads as well as writes.
    pub fn authorize(
        &self,
        identity: Option<&Identity>,
        intent: AdmissionIntent,
    ) -> AdmissionVerdict {
        match identity {
            Some(identity) if self.allowlist.contains(identity) => AdmissionVerdict::Allowed,
            _ => AdmissionVerdict::Denied {
                reason: intent.denial_reason(),
            },
        }
    }
}

/// Per-connection view the relay hands to admission hooks.
pub trait SessionContext {
    fn authenticated_identity(&self) -> Option<&Identity>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Hook answer in the relay's `(deny, reason)` shape.
pub struct Admission {
    pub deny: bool,
    pub reason: String,
}

impl Admission {
    pub fn allow() -> Self {
        Self {
            deny: false,
            reason: String::new(),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            deny: true,
            reason: reason.into(),
        }
    }
}

impl From<AdmissionVerdict> for Admission {
    fn from(value: AdmissionVerdict) -> Self {
        match value {
            AdmissionVerdict::Allowed => Self::allow(),
            AdmissionVerdict::Denied { reason } => Self::deny(reason),
        }
    }
}

/// Decision hooks the relay consults before running a query or storing a write.
///
/// The filter and event are passed through for context only.
pub trait AdmissionHooks: Send + Sync {
    fn query_admission(&self, session: &dyn SessionContext, filter: &Filter) -> Admission;
    fn write_admission(&self, session: &dyn SessionContext, event: &Event) -> Admission;
}

impl AdmissionHooks for AuthorizationGate {
    fn query_admission(&self, session: &dyn SessionContext, _filter: &Filter) -> Admission {
        self.authorize(session.authenticated_identity(), AdmissionIntent::Query)
            .into()
    }

    fn write_admission(&self, session: &dyn SessionContext, _event: &Event) -> Admission {
        self.authorize(session.authenticated_identity(), AdmissionIntent::Write)
            .into()
    }
}
