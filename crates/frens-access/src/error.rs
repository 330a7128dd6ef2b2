use thiserror::Error;

#[derive(Debug, Error)]
/// Failures raised while resolving an allow-list.
pub enum AllowListError {
    #[error("allow-list configuration error: {message}")]
    Configuration { message: String },
    #[error("allow-list upstream {upstream} is unavailable: {message}")]
    UpstreamUnavailable { upstream: String, message: String },
    #[error("allow-list upstream {upstream} returned nothing within {timeout_ms}ms")]
    UpstreamTimeout { upstream: String, timeout_ms: u64 },
}

impl AllowListError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn upstream_unavailable(upstream: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UpstreamUnavailable {
            upstream: upstream.into(),
            message: message.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::UpstreamTimeout { .. })
    }

    /// Stable code used in startup logs and refresh reports.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "allowlist_configuration_error",
            Self::UpstreamUnavailable { .. } => "allowlist_upstream_unavailable",
            Self::UpstreamTimeout { .. } => "allowlist_upstream_timeout",
        }
    }
}
