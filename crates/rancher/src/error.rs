//! Cattle API error types.

use thiserror::Error;

/// Cattle API errors
#[derive(Debug, Error)]
pub enum RancherError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{method} {url} returned {status}")]
    Status {
        method: &'static str,
        url: String,
        status: u16,
    },

    #[error("failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("no project visible to this API key")]
    NoProject,

    #[error("invalid client configuration: {0}")]
    Config(String),
}

impl RancherError {
    /// Whether a later attempt could succeed without operator action
    ///
    /// Transport failures, timeouts and server-side errors are retryable;
    /// client errors (4xx) and malformed responses are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            RancherError::Transport { .. } => true,
            RancherError::Status { status, .. } => *status >= 500 || *status == 429,
            RancherError::Decode { .. } | RancherError::NoProject | RancherError::Config(_) => {
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_retryability() {
        let server_error = RancherError::Status {
            method: "PUT",
            url: "http://rancher/certificates/1c1".to_string(),
            status: 503,
        };
        let conflict = RancherError::Status {
            method: "POST",
            url: "http://rancher/certificates".to_string(),
            status: 422,
        };

        assert!(server_error.is_retryable());
        assert!(!conflict.is_retryable());
        assert!(!RancherError::NoProject.is_retryable());
    }

    #[test]
    fn test_status_display() {
        let err = RancherError::Status {
            method: "PUT",
            url: "http://rancher/v2-beta/loadbalancerservices/1s3".to_string(),
            status: 404,
        };
        assert_eq!(
            err.to_string(),
            "PUT http://rancher/v2-beta/loadbalancerservices/1s3 returned 404"
        );
    }
}
