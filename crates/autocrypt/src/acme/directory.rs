//! ACME protocol seam
//!
//! The issuance client talks to the CA only through [`AcmeDirectory`],
//! [`AcmeAccount`] and [`AcmeOrder`]. [`InstantAcmeDirectory`] implements
//! them over `instant-acme`.

use std::time::Duration;

use async_trait::async_trait;
use instant_acme::{
    Account, AuthorizationStatus as AcmeAuthorizationStatus, ChallengeType, Identifier,
    NewAccount, NewOrder, Order, OrderStatus,
};
use tracing::{debug, info, trace};

use super::error::AcmeError;

/// Validation state of one domain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    /// Invalid, revoked, expired or deactivated
    Invalid,
}

/// Challenge type offered by the CA
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeKind {
    Http01,
    Dns01,
    TlsAlpn01,
    Other(String),
}

impl std::fmt::Display for ChallengeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChallengeKind::Http01 => write!(f, "http-01"),
            ChallengeKind::Dns01 => write!(f, "dns-01"),
            ChallengeKind::TlsAlpn01 => write!(f, "tls-alpn-01"),
            ChallengeKind::Other(kind) => write!(f, "{}", kind),
        }
    }
}

/// A challenge offered for one authorization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub kind: ChallengeKind,
    pub token: String,
    /// Challenge URL, used to signal readiness
    pub url: String,
    /// `token.thumbprint` value the responder must serve
    pub key_authorization: String,
}

/// Authorization state for one domain of an order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    pub domain: String,
    pub status: AuthorizationStatus,
    pub challenges: Vec<Challenge>,
}

impl Authorization {
    /// The offered `http-01` challenge, if any
    pub fn http01(&self) -> Option<&Challenge> {
        self.challenges
            .iter()
            .find(|c| c.kind == ChallengeKind::Http01)
    }

    /// Comma separated list of offered challenge types
    pub fn offered(&self) -> String {
        let kinds: Vec<String> = self.challenges.iter().map(|c| c.kind.to_string()).collect();
        if kinds.is_empty() {
            "none".to_string()
        } else {
            kinds.join(", ")
        }
    }
}

/// Entry point of a CA: account registration
#[async_trait]
pub trait AcmeDirectory: Send + Sync {
    /// Register a fresh account with `mailto:<contact_email>` as contact
    async fn register(&self, contact_email: &str) -> Result<Box<dyn AcmeAccount>, AcmeError>;
}

/// A registered account
#[async_trait]
pub trait AcmeAccount: Send + Sync {
    /// Open an order covering `domains`
    ///
    /// `validity` is the requested certificate lifetime; CAs are free to
    /// ignore it.
    async fn new_order(
        &self,
        domains: &[String],
        validity: Duration,
    ) -> Result<Box<dyn AcmeOrder>, AcmeError>;
}

/// An open order
#[async_trait]
pub trait AcmeOrder: Send {
    /// Fetch the current authorization for `domain`
    async fn authorization(&mut self, domain: &str) -> Result<Authorization, AcmeError>;

    /// Tell the CA the challenge response is in place
    async fn challenge_ready(&mut self, challenge: &Challenge) -> Result<(), AcmeError>;

    /// Whether every authorization is settled and the CSR can be submitted
    async fn poll_ready(&mut self) -> Result<bool, AcmeError>;

    /// Submit the DER encoded CSR
    async fn finalize(&mut self, csr_der: &[u8]) -> Result<(), AcmeError>;

    /// Check for the issued chain
    ///
    /// Returns `None` while the CA is still processing, otherwise the DER
    /// encoded chain, leaf first.
    async fn poll_certificate(&mut self) -> Result<Option<Vec<Vec<u8>>>, AcmeError>;
}

/// [`AcmeDirectory`] backed by `instant-acme`
#[derive(Debug, Clone)]
pub struct InstantAcmeDirectory {
    url: String,
}

impl InstantAcmeDirectory {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl AcmeDirectory for InstantAcmeDirectory {
    async fn register(&self, contact_email: &str) -> Result<Box<dyn AcmeAccount>, AcmeError> {
        let contact = format!("mailto:{}", contact_email);
        info!(directory = %self.url, contact = %contact, "Registering new ACME account");

        let (account, _credentials) = Account::create(
            &NewAccount {
                contact: &[&contact],
                terms_of_service_agreed: true,
                only_return_existing: false,
            },
            &self.url,
            None,
        )
        .await
        .map_err(|e| AcmeError::Registration(e.to_string()))?;

        debug!(directory = %self.url, "ACME account registered");
        Ok(Box::new(InstantAcmeAccount { account }))
    }
}

struct InstantAcmeAccount {
    account: Account,
}

#[async_trait]
impl AcmeAccount for InstantAcmeAccount {
    async fn new_order(
        &self,
        domains: &[String],
        validity: Duration,
    ) -> Result<Box<dyn AcmeOrder>, AcmeError> {
        let identifiers: Vec<Identifier> = domains
            .iter()
            .map(|d| Identifier::Dns(d.clone()))
            .collect();

        // ACME v2 new-order carries no usable lifetime field here, so the CA default applies
        debug!(
            domains = ?domains,
            requested_validity_hours = validity.as_secs() / 3600,
            "Creating ACME order"
        );

        let order = self
            .account
            .new_order(&NewOrder {
                identifiers: &identifiers,
            })
            .await
            .map_err(|e| AcmeError::OrderCreation(e.to_string()))?;

        Ok(Box::new(InstantAcmeOrder { order }))
    }
}

struct InstantAcmeOrder {
    order: Order,
}

impl InstantAcmeOrder {
    /// Refresh the order; an invalid order is an error
    async fn refresh_status(&mut self) -> Result<OrderStatus, AcmeError> {
        self.order
            .refresh()
            .await
            .map_err(|e| AcmeError::Protocol {
                operation: "order refresh",
                reason: e.to_string(),
            })?;
        let status = self.order.state().status;

        trace!(status = ?status, "ACME order status");

        if status == OrderStatus::Invalid {
            let reason = self
                .order
                .state()
                .error
                .as_ref()
                .map(|e| format!("{:?}", e))
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(AcmeError::OrderInvalid(reason));
        }

        Ok(status)
    }

    fn convert(&self, authz: &instant_acme::Authorization) -> Authorization {
        let Identifier::Dns(domain) = &authz.identifier;

        let status = match authz.status {
            AcmeAuthorizationStatus::Pending => AuthorizationStatus::Pending,
            AcmeAuthorizationStatus::Valid => AuthorizationStatus::Valid,
            _ => AuthorizationStatus::Invalid,
        };

        let challenges = authz
            .challenges
            .iter()
            .map(|c| Challenge {
                kind: match &c.r#type {
                    ChallengeType::Http01 => ChallengeKind::Http01,
                    ChallengeType::Dns01 => ChallengeKind::Dns01,
                    ChallengeType::TlsAlpn01 => ChallengeKind::TlsAlpn01,
                    #[allow(unreachable_patterns)]
                    other => ChallengeKind::Other(format!("{:?}", other)),
                },
                token: c.token.clone(),
                url: c.url.clone(),
                key_authorization: self.order.key_authorization(c).as_str().to_string(),
            })
            .collect();

        Authorization {
            domain: domain.clone(),
            status,
            challenges,
        }
    }
}

#[async_trait]
impl AcmeOrder for InstantAcmeOrder {
    async fn authorization(&mut self, domain: &str) -> Result<Authorization, AcmeError> {
        let authorizations = self
            .order
            .authorizations()
            .await
            .map_err(|e| AcmeError::Protocol {
                operation: "authorization fetch",
                reason: e.to_string(),
            })?;

        authorizations
            .iter()
            .map(|authz| self.convert(authz))
            .find(|authz| authz.domain == domain)
            .ok_or_else(|| AcmeError::AuthorizationNotFound(domain.to_string()))
    }

    async fn challenge_ready(&mut self, challenge: &Challenge) -> Result<(), AcmeError> {
        self.order
            .set_challenge_ready(&challenge.url)
            .await
            .map_err(|e| AcmeError::Protocol {
                operation: "challenge ready",
                reason: e.to_string(),
            })
    }

    async fn poll_ready(&mut self) -> Result<bool, AcmeError> {
        Ok(self.refresh_status().await? != OrderStatus::Pending)
    }

    async fn finalize(&mut self, csr_der: &[u8]) -> Result<(), AcmeError> {
        self.order
            .finalize(csr_der)
            .await
            .map_err(|e| AcmeError::Protocol {
                operation: "finalize",
                reason: e.to_string(),
            })
    }

    async fn poll_certificate(&mut self) -> Result<Option<Vec<Vec<u8>>>, AcmeError> {
        if self.refresh_status().await? != OrderStatus::Valid {
            return Ok(None);
        }

        let Some(chain_pem) = self
            .order
            .certificate()
            .await
            .map_err(|e| AcmeError::Protocol {
                operation: "certificate download",
                reason: e.to_string(),
            })?
        else {
            return Ok(None);
        };

        let chain: Vec<Vec<u8>> = pem::parse_many(chain_pem.as_bytes())
            .map_err(|e| AcmeError::Chain(e.to_string()))?
            .into_iter()
            .filter(|block| block.tag() == "CERTIFICATE")
            .map(|block| block.into_contents())
            .collect();

        Ok(Some(chain))
    }
}
