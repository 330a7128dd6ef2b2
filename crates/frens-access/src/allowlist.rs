use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tracing::{info, warn};

use crate::{
    fetch_social_graph_allowlist, fetch_well_known_allowlist, load_membership_file,
    AllowListError, Identity, SocialGraphConfig, WellKnownConfig,
};

pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Ordered member identities. Lookup is "at least one equal element";
/// duplicates are kept as-is.
pub struct AllowList {
    members: Vec<Identity>,
}

impl AllowList {
    pub fn new(members: Vec<Identity>) -> Self {
        Self { members }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.members.iter().any(|member| member == identity)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Identity> {
        self.members.iter()
    }

    pub fn as_slice(&self) -> &[Identity] {
        self.members.as_slice()
    }
}

impl FromIterator<Identity> for AllowList {
    fn from_iter<T: IntoIterator<Item = Identity>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone)]
/// Published allow-list snapshot shared by every admission check.
///
/// Readers take a lock-free load of the current `Arc<AllowList>`; the
/// refresh runtime is the only writer and swaps in whole lists.
pub struct AllowListHandle {
    current: Arc<ArcSwap<AllowList>>,
}

impl AllowListHandle {
    pub fn new(allowlist: AllowList) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(allowlist)),
        }
    }

    pub fn snapshot(&self) -> Arc<AllowList> {
        self.current.load_full()
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.current.load().contains(identity)
    }

    pub fn len(&self) -> usize {
        self.current.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.load().is_empty()
    }

    pub(crate) fn publish(&self, allowlist: AllowList) {
        self.current.store(Arc::new(allowlist));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// What a network source does when the upstream answers too slowly.
pub enum TimeoutPolicy {
    /// Continue with an empty list (members are locked out until refresh).
    #[default]
    Degrade,
    /// Treat the timeout as a fatal startup error.
    Fail,
}

impl TimeoutPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Degrade => "degrade",
            Self::Fail => "fail",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Where the member set comes from.
pub enum AllowListSource {
    Static { path: PathBuf },
    SocialGraph(SocialGraphConfig),
    WellKnown(WellKnownConfig),
}

impl AllowListSource {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Static { .. } => "static",
            Self::SocialGraph(_) => "social-graph",
            Self::WellKnown(_) => "well-known",
        }
    }

    pub fn timeout_policy(&self) -> Option<TimeoutPolicy> {
        match self {
            Self::Static { .. } => None,
            Self::SocialGraph(config) => Some(config.timeout_policy),
            Self::WellKnown(config) => Some(config.timeout_policy),
        }
    }

    /// Performs one resolution and reports timeouts as errors.
    pub async fn fetch(&self) -> Result<AllowList, AllowListError> {
        match self {
            Self::Static { path } => load_membership_file(path),
            Self::SocialGraph(config) => fetch_social_graph_allowlist(config).await,
            Self::WellKnown(config) => fetch_well_known_allowlist(config).await,
        }
    }

    /// Startup resolution: a timeout degrades to an empty list unless the
    /// source's policy is [`TimeoutPolicy::Fail`].
    pub async fn resolve(&self) -> Result<AllowList, AllowListError> {
        match self.fetch().await {
            Ok(allowlist) => {
                info!(
                    source = self.label(),
                    members = allowlist.len(),
                    "allow-list resolved"
                );
                Ok(allowlist)
            }
            Err(error)
                if error.is_timeout() && self.timeout_policy() == Some(TimeoutPolicy::Degrade) =>
            {
                warn!(
                    source = self.label(),
                    reason_code = error.reason_code(),
                    %error,
                    "allow-list upstream timed out; continuing with an empty allow-list, every connection will be denied"
                );
                Ok(AllowList::empty())
            }
            Err(error) => Err(error),
        }
    }
}
