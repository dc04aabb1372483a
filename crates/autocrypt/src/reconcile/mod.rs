//! Reconciliation loop
//!
//! Periodically walks the eligible services, decides which certificates
//! need issuing or renewal, and publishes the results to the platform.
//!
//! # Cycle
//!
//! 1. Load balancers and eligible services are listed once
//! 2. For every service, in listing order, the certificate named after the
//!    primary hostname is looked up
//! 3. An existing certificate is renewed in place when due
//! 4. A missing certificate is issued, created, and bound to every known
//!    load balancer
//!
//! Failures are recorded per service and the cycle moves on.

mod outcome;

pub use outcome::{CycleSummary, ReconcileError, ServiceOutcome, ServiceReport};

use std::time::Duration;

use autocrypt_common::{CertificateId, CycleId};
use autocrypt_rancher::{Certificate, LoadBalancer, PlatformApi, Service};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::acme::{CertificateIssuer, IssuedCertificate};
use crate::renewal::{certificate_not_after, RenewalPolicy};
use crate::storage::CertificateStore;

/// Default time between cycles
const DEFAULT_INTERVAL: Duration = Duration::from_secs(24 * 3600);

/// Drives certificates for eligible services towards the desired state
pub struct Reconciler<P, I> {
    platform: P,
    issuer: I,
    store: Option<CertificateStore>,
    policy: RenewalPolicy,
    interval: Duration,
}

impl<P: PlatformApi, I: CertificateIssuer> Reconciler<P, I> {
    pub fn new(platform: P, issuer: I) -> Self {
        Self {
            platform,
            issuer,
            store: None,
            policy: RenewalPolicy::default(),
            interval: DEFAULT_INTERVAL,
        }
    }

    /// Keep a local copy of every issued certificate
    pub fn with_store(mut self, store: CertificateStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_policy(mut self, policy: RenewalPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Run cycles until `cancel` fires
    ///
    /// The first cycle starts immediately. Cancellation interrupts the wait
    /// between cycles and is honoured between services.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            renew_before_days = self.policy.renew_before().num_days(),
            "Starting reconciliation loop"
        );

        loop {
            let summary = self.reconcile_once(&cancel).await;
            summary.log();

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {
                    debug!("Starting scheduled reconciliation cycle");
                }
            }
        }

        info!("Reconciliation loop stopped");
    }

    /// Run a single cycle
    pub async fn reconcile_once(&self, cancel: &CancellationToken) -> CycleSummary {
        let cycle_id = CycleId::new();
        let span = info_span!("cycle", cycle_id = %cycle_id);
        self.reconcile_cycle(cycle_id, cancel).instrument(span).await
    }

    async fn reconcile_cycle(&self, cycle_id: CycleId, cancel: &CancellationToken) -> CycleSummary {
        let mut summary = CycleSummary::new(cycle_id);

        let mut load_balancers = match self.platform.load_balancers().await {
            Ok(lbs) => lbs,
            Err(e) => {
                warn!(error = %e, "Failed to list load balancers, new certificates will not be bound");
                Vec::new()
            }
        };

        let services = match self.platform.eligible_services().await {
            Ok(services) => services,
            Err(e) => {
                error!(error = %e, "Failed to list services");
                summary.listing_error = Some(e.into());
                summary.finish();
                return summary;
            }
        };

        info!(
            services = services.len(),
            load_balancers = load_balancers.len(),
            "Reconciling services"
        );

        for service in services {
            if cancel.is_cancelled() {
                info!("Cycle cancelled");
                summary.cancelled = true;
                break;
            }

            let outcome = self.reconcile_service(&service, &mut load_balancers).await;
            debug!(service = %service.display_name(), outcome = outcome.label(), "Service reconciled");

            summary.services.push(ServiceReport {
                service_id: service.id.clone(),
                service_name: service.display_name(),
                outcome,
            });
        }

        summary.finish();
        summary
    }

    async fn reconcile_service(
        &self,
        service: &Service,
        load_balancers: &mut [LoadBalancer],
    ) -> ServiceOutcome {
        let hostnames = service.hostnames();
        if hostnames.is_empty() {
            info!(service = %service.display_name(), "Service has no hostnames, skipping");
            return ServiceOutcome::Skipped {
                reason: "no hostnames",
            };
        }

        match self.ensure_certificate(&hostnames, load_balancers).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    service = %service.display_name(),
                    domain = %hostnames[0],
                    error = %e,
                    "Failed to reconcile certificate"
                );
                ServiceOutcome::Failed(e)
            }
        }
    }

    async fn ensure_certificate(
        &self,
        hostnames: &[String],
        load_balancers: &mut [LoadBalancer],
    ) -> Result<ServiceOutcome, ReconcileError> {
        let primary = &hostnames[0];

        match self.platform.find_certificate(primary).await? {
            Some(existing) => self.renew(existing, hostnames).await,
            None => self.provision(hostnames, load_balancers).await,
        }
    }

    async fn renew(
        &self,
        mut certificate: Certificate,
        hostnames: &[String],
    ) -> Result<ServiceOutcome, ReconcileError> {
        let not_after = certificate_not_after(&certificate.cert).map_err(|source| {
            ReconcileError::MalformedCertificate {
                name: certificate.name.clone(),
                source,
            }
        })?;

        if !self.policy.is_due(not_after, Utc::now()) {
            debug!(domain = %certificate.name, expires = %not_after, "Certificate is current");
            return Ok(ServiceOutcome::Current { expires: not_after });
        }

        info!(domain = %certificate.name, expires = %not_after, "Certificate due for renewal");

        let issued = self.issuer.issue(hostnames).await?;
        self.persist(&issued);

        certificate.cert = issued.leaf_pem();
        certificate.cert_chain = issued.intermediates_pem();
        certificate.key = Some(issued.key_pem().to_string());
        certificate.description = Some(description());

        self.platform.upsert_certificate(&certificate).await?;

        info!(
            domain = %certificate.name,
            certificate_id = ?certificate.id.as_ref().map(CertificateId::as_str),
            expires = %issued.not_after(),
            "Certificate renewed"
        );

        Ok(ServiceOutcome::Renewed {
            certificate_id: certificate.id,
            expires: issued.not_after(),
        })
    }

    async fn provision(
        &self,
        hostnames: &[String],
        load_balancers: &mut [LoadBalancer],
    ) -> Result<ServiceOutcome, ReconcileError> {
        let primary = &hostnames[0];
        info!(domain = %primary, "No certificate found, provisioning");

        let issued = self.issuer.issue(hostnames).await?;
        self.persist(&issued);

        let certificate = Certificate {
            id: None,
            name: primary.clone(),
            cert: issued.leaf_pem(),
            cert_chain: issued.intermediates_pem(),
            description: Some(description()),
            key: Some(issued.key_pem().to_string()),
        };
        self.platform.upsert_certificate(&certificate).await?;

        let certificate_id = self
            .platform
            .find_certificate(primary)
            .await?
            .and_then(|c| c.id)
            .ok_or_else(|| ReconcileError::MissingId(primary.clone()))?;

        info!(
            domain = %primary,
            certificate_id = %certificate_id,
            "Certificate created"
        );

        let load_balancers_updated = self.bind(&certificate_id, load_balancers).await?;

        Ok(ServiceOutcome::Provisioned {
            certificate_id,
            expires: issued.not_after(),
            load_balancers_updated,
        })
    }

    /// Append `certificate_id` to every load balancer that lacks it
    ///
    /// Every load balancer is attempted. `load_balancers` mirrors the
    /// platform: an append whose update fails is rolled back locally, and
    /// the failures are reported together once all updates were tried.
    async fn bind(
        &self,
        certificate_id: &CertificateId,
        load_balancers: &mut [LoadBalancer],
    ) -> Result<usize, ReconcileError> {
        let mut bound = 0;
        let mut failed = Vec::new();

        for lb in load_balancers.iter_mut() {
            if !lb.attach_certificate(certificate_id) {
                continue;
            }

            match self.platform.update_load_balancer(lb).await {
                Ok(()) => {
                    debug!(
                        load_balancer = %lb.name,
                        certificate_id = %certificate_id,
                        "Bound certificate to load balancer"
                    );
                    bound += 1;
                }
                Err(e) => {
                    warn!(
                        load_balancer = %lb.name,
                        certificate_id = %certificate_id,
                        error = %e,
                        "Failed to bind certificate to load balancer"
                    );
                    lb.lb_config
                        .certificate_ids
                        .retain(|id| id != certificate_id);
                    failed.push(lb.id.clone());
                }
            }
        }

        if !failed.is_empty() {
            return Err(ReconcileError::Binding {
                certificate_id: certificate_id.clone(),
                bound,
                failed,
            });
        }

        Ok(bound)
    }

    /// Store write failures are logged and do not block publication
    fn persist(&self, issued: &IssuedCertificate) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save_certificate(issued) {
                warn!(
                    domains = ?issued.domains(),
                    error = %e,
                    "Failed to save certificate locally"
                );
            }
        }
    }
}

fn description() -> String {
    format!("Updated by autocrypt on {}", Utc::now().to_rfc3339())
}
