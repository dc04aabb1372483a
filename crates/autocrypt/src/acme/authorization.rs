//! Per-domain HTTP-01 authorization

use std::net::SocketAddr;
use std::time::Duration;

use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, info, warn};

use super::challenge::{challenge_path, ChallengeResponder};
use super::directory::{AcmeOrder, AuthorizationStatus, Challenge};
use super::error::AcmeError;

/// Progress of one domain authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationPhase {
    Requested,
    Pending,
    ChallengeSelected,
    ChallengeResponding,
    Valid,
    Invalid,
    TimedOut,
}

impl AuthorizationPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AuthorizationPhase::Valid | AuthorizationPhase::Invalid | AuthorizationPhase::TimedOut
        )
    }
}

impl std::fmt::Display for AuthorizationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AuthorizationPhase::Requested => "requested",
            AuthorizationPhase::Pending => "pending",
            AuthorizationPhase::ChallengeSelected => "challenge-selected",
            AuthorizationPhase::ChallengeResponding => "challenge-responding",
            AuthorizationPhase::Valid => "valid",
            AuthorizationPhase::Invalid => "invalid",
            AuthorizationPhase::TimedOut => "timed-out",
        };
        f.write_str(name)
    }
}

/// Timing and binding for domain authorizations
#[derive(Debug, Clone)]
pub struct AuthorizationSettings {
    /// Where the challenge responder listens
    pub challenge_addr: SocketAddr,
    /// Delay between authorization status checks
    pub poll_interval: Duration,
    /// Deadline for one domain, from fetch to valid
    pub timeout: Duration,
}

struct DomainAuthorization<'a> {
    domain: &'a str,
    phase: AuthorizationPhase,
}

impl<'a> DomainAuthorization<'a> {
    fn new(domain: &'a str) -> Self {
        Self {
            domain,
            phase: AuthorizationPhase::Requested,
        }
    }

    fn advance(&mut self, next: AuthorizationPhase) {
        debug!(
            domain = %self.domain,
            from = %self.phase,
            to = %next,
            "Authorization phase change"
        );
        self.phase = next;
    }

    /// Record the terminal phase matching `result`
    fn settle(&mut self, result: &Result<(), AcmeError>) {
        let next = match result {
            Ok(()) => AuthorizationPhase::Valid,
            Err(AcmeError::AuthorizationTimeout { .. }) => AuthorizationPhase::TimedOut,
            Err(_) => AuthorizationPhase::Invalid,
        };
        self.advance(next);
    }
}

/// Drive the authorization for `domain` to `valid`
///
/// The whole exchange is bounded by `settings.timeout`. The challenge
/// responder is shut down before this returns, whatever the outcome, so the
/// next domain can bind the same port.
pub(crate) async fn authorize(
    order: &mut dyn AcmeOrder,
    domain: &str,
    settings: &AuthorizationSettings,
) -> Result<(), AcmeError> {
    let deadline = Instant::now() + settings.timeout;
    let mut state = DomainAuthorization::new(domain);

    let result = run(order, &mut state, settings, deadline).await;
    state.settle(&result);

    match &result {
        Ok(()) => info!(domain = %domain, "Domain authorization valid"),
        Err(e) => warn!(domain = %domain, phase = %state.phase, error = %e, "Domain authorization failed"),
    }

    result
}

async fn run(
    order: &mut dyn AcmeOrder,
    state: &mut DomainAuthorization<'_>,
    settings: &AuthorizationSettings,
    deadline: Instant,
) -> Result<(), AcmeError> {
    let domain = state.domain;
    let timed_out = || AcmeError::AuthorizationTimeout {
        domain: domain.to_string(),
        timeout: settings.timeout,
    };

    let authorization = timeout_at(deadline, order.authorization(domain))
        .await
        .map_err(|_| timed_out())??;

    match authorization.status {
        AuthorizationStatus::Valid => {
            debug!(domain = %domain, "Authorization already valid");
            return Ok(());
        }
        AuthorizationStatus::Invalid => {
            return Err(AcmeError::AuthorizationInvalid {
                domain: domain.to_string(),
            });
        }
        AuthorizationStatus::Pending => state.advance(AuthorizationPhase::Pending),
    }

    let challenge = authorization
        .http01()
        .cloned()
        .ok_or_else(|| AcmeError::NoSupportedChallenge {
            domain: domain.to_string(),
            offered: authorization.offered(),
        })?;
    state.advance(AuthorizationPhase::ChallengeSelected);

    let responder = ChallengeResponder::bind(
        settings.challenge_addr,
        challenge_path(&challenge.token),
        challenge.key_authorization.clone(),
    )
    .await?;
    state.advance(AuthorizationPhase::ChallengeResponding);

    let outcome = timeout_at(
        deadline,
        respond(order, domain, &challenge, settings.poll_interval),
    )
    .await;

    responder.shutdown().await;

    outcome.map_err(|_| timed_out())?
}

async fn respond(
    order: &mut dyn AcmeOrder,
    domain: &str,
    challenge: &Challenge,
    poll_interval: Duration,
) -> Result<(), AcmeError> {
    order
        .challenge_ready(challenge)
        .await
        .map_err(|e| AcmeError::ChallengeAccept {
            domain: domain.to_string(),
            reason: e.to_string(),
        })?;

    loop {
        sleep(poll_interval).await;

        let authorization = order.authorization(domain).await?;
        match authorization.status {
            AuthorizationStatus::Valid => return Ok(()),
            AuthorizationStatus::Invalid => {
                return Err(AcmeError::AuthorizationInvalid {
                    domain: domain.to_string(),
                })
            }
            AuthorizationStatus::Pending => {
                debug!(domain = %domain, "Authorization still pending");
            }
        }
    }
}
