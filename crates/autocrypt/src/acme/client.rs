//! Certificate issuance client
//!
//! Runs the full ACME sequence for one set of domains: account
//! registration, CSR construction, per-domain authorization, finalization
//! and chain download.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, instrument};

use super::authorization::{authorize, AuthorizationSettings};
use super::certificate::{IssuedCertificate, SigningRequest};
use super::directory::{AcmeAccount, AcmeDirectory, AcmeOrder};
use super::error::AcmeError;

/// Default account registration timeout
const DEFAULT_REGISTRATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Default per-domain authorization timeout
const DEFAULT_AUTHORIZATION_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Default timeout from finalize to downloaded chain
const DEFAULT_ISSUANCE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Default delay between status checks
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default requested certificate lifetime (12 * 365 hours)
const DEFAULT_VALIDITY: Duration = Duration::from_secs(12 * 365 * 3600);

/// Something that can turn a domain list into a signed certificate
#[async_trait]
pub trait CertificateIssuer: Send + Sync {
    /// Issue one certificate covering every domain in `domains`
    ///
    /// `domains[0]` becomes the common name. Either every domain is
    /// authorized and a certificate is returned, or nothing is.
    async fn issue(&self, domains: &[String]) -> Result<IssuedCertificate, AcmeError>;
}

/// Issuance parameters
#[derive(Debug, Clone)]
pub struct IssuanceSettings {
    /// Account contact, registered as `mailto:<contact_email>`
    pub contact_email: String,
    /// Challenge responder bind address
    pub challenge_addr: SocketAddr,
    pub registration_timeout: Duration,
    pub authorization_timeout: Duration,
    pub issuance_timeout: Duration,
    pub poll_interval: Duration,
    /// Requested certificate lifetime
    pub validity: Duration,
}

impl IssuanceSettings {
    pub fn new(contact_email: impl Into<String>, challenge_addr: SocketAddr) -> Self {
        Self {
            contact_email: contact_email.into(),
            challenge_addr,
            registration_timeout: DEFAULT_REGISTRATION_TIMEOUT,
            authorization_timeout: DEFAULT_AUTHORIZATION_TIMEOUT,
            issuance_timeout: DEFAULT_ISSUANCE_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            validity: DEFAULT_VALIDITY,
        }
    }

    pub fn with_registration_timeout(mut self, timeout: Duration) -> Self {
        self.registration_timeout = timeout;
        self
    }

    pub fn with_authorization_timeout(mut self, timeout: Duration) -> Self {
        self.authorization_timeout = timeout;
        self
    }

    pub fn with_issuance_timeout(mut self, timeout: Duration) -> Self {
        self.issuance_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_validity(mut self, validity: Duration) -> Self {
        self.validity = validity;
        self
    }

    fn authorization(&self) -> AuthorizationSettings {
        AuthorizationSettings {
            challenge_addr: self.challenge_addr,
            poll_interval: self.poll_interval,
            timeout: self.authorization_timeout,
        }
    }
}

/// ACME issuance client
///
/// Registers a fresh account for every call; nothing is cached between
/// issuances.
pub struct IssuanceClient<D> {
    directory: D,
    settings: IssuanceSettings,
}

impl<D: AcmeDirectory> IssuanceClient<D> {
    pub fn new(directory: D, settings: IssuanceSettings) -> Self {
        Self {
            directory,
            settings,
        }
    }

    pub fn settings(&self) -> &IssuanceSettings {
        &self.settings
    }

    async fn register(&self) -> Result<Box<dyn AcmeAccount>, AcmeError> {
        let limit = self.settings.registration_timeout;
        timeout(limit, self.directory.register(&self.settings.contact_email))
            .await
            .map_err(|_| AcmeError::RegistrationTimeout(limit))?
    }

    async fn open_order(
        &self,
        account: &dyn AcmeAccount,
        domains: &[String],
    ) -> Result<Box<dyn AcmeOrder>, AcmeError> {
        let limit = self.settings.registration_timeout;
        timeout(limit, account.new_order(domains, self.settings.validity))
            .await
            .map_err(|_| AcmeError::OrderCreation(format!("timed out after {:?}", limit)))?
    }

    async fn finalize(
        &self,
        order: &mut dyn AcmeOrder,
        request: &SigningRequest,
    ) -> Result<Vec<Vec<u8>>, AcmeError> {
        while !order.poll_ready().await? {
            sleep(self.settings.poll_interval).await;
        }
        order.finalize(request.der()).await?;
        debug!("Order finalized, waiting for certificate");

        loop {
            if let Some(chain) = order.poll_certificate().await? {
                return Ok(chain);
            }
            sleep(self.settings.poll_interval).await;
        }
    }
}

#[async_trait]
impl<D: AcmeDirectory> CertificateIssuer for IssuanceClient<D> {
    #[instrument(skip(self), fields(primary = domains.first().map(String::as_str).unwrap_or_default()))]
    async fn issue(&self, domains: &[String]) -> Result<IssuedCertificate, AcmeError> {
        if domains.is_empty() {
            return Err(AcmeError::NoDomains);
        }

        info!(domains = ?domains, "Starting certificate issuance");

        let account = self.register().await?;
        let request = SigningRequest::new(domains)?;
        let mut order = self.open_order(account.as_ref(), domains).await?;

        let authorization = self.settings.authorization();
        for domain in domains {
            authorize(order.as_mut(), domain, &authorization).await?;
        }

        let limit = self.settings.issuance_timeout;
        let chain = timeout(limit, self.finalize(order.as_mut(), &request))
            .await
            .map_err(|_| AcmeError::IssuanceTimeout(limit))??;

        let issued =
            IssuedCertificate::from_der_chain(domains.to_vec(), request.into_key_pem(), chain)?;

        info!(
            domains = ?domains,
            expires = %issued.not_after(),
            "Certificate issued"
        );

        Ok(issued)
    }
}
