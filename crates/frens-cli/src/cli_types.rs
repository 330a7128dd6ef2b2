use clap::ValueEnum;

use frens_access::TimeoutPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliAllowListSource {
    Static,
    SocialGraph,
    WellKnown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliTimeoutPolicy {
    Degrade,
    Fail,
}

impl From<CliTimeoutPolicy> for TimeoutPolicy {
    fn from(value: CliTimeoutPolicy) -> Self {
        match value {
            CliTimeoutPolicy::Degrade => TimeoutPolicy::Degrade,
            CliTimeoutPolicy::Fail => TimeoutPolicy::Fail,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliEventStore {
    Memory,
    Sqlite,
    Postgres,
}
