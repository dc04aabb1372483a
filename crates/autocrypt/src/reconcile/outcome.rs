//! Per-service and per-cycle reconciliation results

use autocrypt_common::{CertificateId, CycleId, LoadBalancerId, ServiceId};
use autocrypt_rancher::RancherError;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};

use crate::acme::AcmeError;
use crate::renewal::CertificateParseError;

/// Why a service could not be reconciled
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("platform request failed: {0}")]
    Platform(#[from] RancherError),

    #[error("certificate issuance failed: {0}")]
    Issuance(#[from] AcmeError),

    #[error("stored certificate {name} is unreadable: {source}")]
    MalformedCertificate {
        name: String,
        #[source]
        source: CertificateParseError,
    },

    #[error("certificate {0} was created but has no id")]
    MissingId(String),

    /// The certificate exists but some load balancers were not updated
    #[error(
        "certificate {certificate_id} bound to {bound} load balancer(s), update failed for {}",
        join_ids(.failed)
    )]
    Binding {
        certificate_id: CertificateId,
        bound: usize,
        failed: Vec<LoadBalancerId>,
    },
}

fn join_ids(ids: &[LoadBalancerId]) -> String {
    ids.iter()
        .map(LoadBalancerId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

impl ReconcileError {
    /// Whether the next cycle could succeed without operator action
    pub fn is_retryable(&self) -> bool {
        match self {
            ReconcileError::Platform(e) => e.is_retryable(),
            ReconcileError::Issuance(e) => e.is_retryable(),
            ReconcileError::MalformedCertificate { .. } => false,
            ReconcileError::MissingId(_) => true,
            // later cycles take the renewal path and never rebind
            ReconcileError::Binding { .. } => false,
        }
    }
}

/// What happened to one service in a cycle
#[derive(Debug)]
pub enum ServiceOutcome {
    /// Nothing to do, e.g. no hostnames
    Skipped { reason: &'static str },
    /// Existing certificate is not due yet
    Current { expires: DateTime<Utc> },
    /// Existing certificate was replaced in place
    Renewed {
        certificate_id: Option<CertificateId>,
        expires: DateTime<Utc>,
    },
    /// A new certificate was created and bound to load balancers
    Provisioned {
        certificate_id: CertificateId,
        expires: DateTime<Utc>,
        load_balancers_updated: usize,
    },
    Failed(ReconcileError),
}

impl ServiceOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, ServiceOutcome::Failed(_))
    }

    /// Short label for log output
    pub fn label(&self) -> &'static str {
        match self {
            ServiceOutcome::Skipped { .. } => "skipped",
            ServiceOutcome::Current { .. } => "current",
            ServiceOutcome::Renewed { .. } => "renewed",
            ServiceOutcome::Provisioned { .. } => "provisioned",
            ServiceOutcome::Failed(_) => "failed",
        }
    }
}

#[derive(Debug)]
pub struct ServiceReport {
    pub service_id: ServiceId,
    pub service_name: String,
    pub outcome: ServiceOutcome,
}

/// Result of one reconciliation cycle
#[derive(Debug)]
pub struct CycleSummary {
    pub cycle_id: CycleId,
    pub started: DateTime<Utc>,
    pub finished: Option<DateTime<Utc>>,
    pub services: Vec<ServiceReport>,
    /// Set when services could not be listed; no service was processed
    pub listing_error: Option<ReconcileError>,
    /// Set when cancellation stopped the cycle between services
    pub cancelled: bool,
}

impl CycleSummary {
    pub fn new(cycle_id: CycleId) -> Self {
        Self {
            cycle_id,
            started: Utc::now(),
            finished: None,
            services: Vec::new(),
            listing_error: None,
            cancelled: false,
        }
    }

    fn count(&self, label: &str) -> usize {
        self.services
            .iter()
            .filter(|r| r.outcome.label() == label)
            .count()
    }

    pub fn provisioned(&self) -> usize {
        self.count("provisioned")
    }

    pub fn renewed(&self) -> usize {
        self.count("renewed")
    }

    pub fn current(&self) -> usize {
        self.count("current")
    }

    pub fn skipped(&self) -> usize {
        self.count("skipped")
    }

    pub fn failed(&self) -> usize {
        self.count("failed")
    }

    /// No listing error and no failed service
    pub fn is_clean(&self) -> bool {
        self.listing_error.is_none() && self.failed() == 0
    }

    /// The report for `service_id`, if it was processed
    pub fn report(&self, service_id: &ServiceId) -> Option<&ServiceReport> {
        self.services.iter().find(|r| &r.service_id == service_id)
    }

    pub(crate) fn finish(&mut self) {
        self.finished = Some(Utc::now());
    }

    /// Emit one summary line plus one line per failure
    pub fn log(&self) {
        for report in &self.services {
            if let ServiceOutcome::Failed(e) = &report.outcome {
                warn!(
                    cycle_id = %self.cycle_id,
                    service = %report.service_name,
                    retryable = e.is_retryable(),
                    error = %e,
                    "Service reconciliation failed"
                );
            }
        }

        let duration_ms = self
            .finished
            .map(|f| (f - self.started).num_milliseconds())
            .unwrap_or_default();

        info!(
            cycle_id = %self.cycle_id,
            services = self.services.len(),
            provisioned = self.provisioned(),
            renewed = self.renewed(),
            current = self.current(),
            skipped = self.skipped(),
            failed = self.failed(),
            listing_failed = self.listing_error.is_some(),
            cancelled = self.cancelled,
            duration_ms,
            "Reconciliation cycle complete"
        );
    }
}
