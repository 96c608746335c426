use thiserror::Error;

/// Every failure the reconciliation core can surface to the driver.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Connection failure or non-success status from the proxy admin API
    /// or the container runtime.
    #[error("transport error talking to {endpoint}: {message}")]
    Transport { endpoint: String, message: String },

    /// A response body that could not be parsed.
    #[error("failed to decode response from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },

    /// A destroy notification arrived for an identity the table never saw.
    #[error("destroy received for untracked instance `{identity}`; desired state has drifted")]
    Consistency { identity: String },

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("failed to encode routing payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("event producer task failed: {0}")]
    Producer(#[from] tokio::task::JoinError),
}

impl SyncError {
    pub fn transport(endpoint: impl Into<String>, err: impl std::fmt::Display) -> Self {
        SyncError::Transport {
            endpoint: endpoint.into(),
            message: err.to_string(),
        }
    }

    /// True for the errors [`crate::retry::with_backoff`] retries.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Transport { .. })
    }
}
