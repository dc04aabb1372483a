//! ACME error types.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

/// Errors raised while issuing a certificate
#[derive(Debug, Error)]
pub enum AcmeError {
    #[error("no domains requested")]
    NoDomains,

    #[error("account registration failed: {0}")]
    Registration(String),

    #[error("account registration timed out after {0:?}")]
    RegistrationTimeout(Duration),

    #[error("order creation failed: {0}")]
    OrderCreation(String),

    #[error("failed to build signing request: {0}")]
    SigningRequest(String),

    #[error("ACME {operation} failed: {reason}")]
    Protocol {
        operation: &'static str,
        reason: String,
    },

    #[error("no authorization for {0} in order")]
    AuthorizationNotFound(String),

    #[error("no supported challenge for {domain} (offered: {offered})")]
    NoSupportedChallenge { domain: String, offered: String },

    #[error("failed to listen on {addr}: {source}")]
    ListenerBind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("accepting challenge for {domain} failed: {reason}")]
    ChallengeAccept { domain: String, reason: String },

    #[error("authorization for {domain} is invalid")]
    AuthorizationInvalid { domain: String },

    #[error("authorization for {domain} timed out after {timeout:?}")]
    AuthorizationTimeout { domain: String, timeout: Duration },

    #[error("order is invalid: {0}")]
    OrderInvalid(String),

    #[error("certificate issuance timed out after {0:?}")]
    IssuanceTimeout(Duration),

    #[error("invalid certificate chain: {0}")]
    Chain(String),
}

impl AcmeError {
    /// Whether a later cycle could succeed without operator action
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            AcmeError::NoDomains
                | AcmeError::SigningRequest(_)
                | AcmeError::NoSupportedChallenge { .. }
        )
    }

    /// Domain the error is about, for per-domain failures
    pub fn domain(&self) -> Option<&str> {
        match self {
            AcmeError::AuthorizationNotFound(domain)
            | AcmeError::NoSupportedChallenge { domain, .. }
            | AcmeError::ChallengeAccept { domain, .. }
            | AcmeError::AuthorizationInvalid { domain }
            | AcmeError::AuthorizationTimeout { domain, .. } => Some(domain),
            _ => None,
        }
    }
}
