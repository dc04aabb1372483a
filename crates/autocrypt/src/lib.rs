//! Autocrypt Library
//!
//! Automatic Let's Encrypt certificates for services behind Rancher load
//! balancers.
//!
//! - **Issuance**: ACME v2 with HTTP-01 validation, one domain at a time
//! - **Renewal**: expiry-driven, with a configurable threshold
//! - **Reconciliation**: a periodic loop publishing certificates and
//!   load balancer bindings to the platform
//!
//! # Example
//!
//! ```ignore
//! use autocrypt::acme::{InstantAcmeDirectory, IssuanceClient, IssuanceSettings};
//! use autocrypt::reconcile::Reconciler;
//! use autocrypt_rancher::RancherClient;
//!
//! let issuer = IssuanceClient::new(
//!     InstantAcmeDirectory::new(config.letsencrypt_directory_url.clone()),
//!     IssuanceSettings::new(&config.letsencrypt_contact_email, config.challenge_addr),
//! );
//! let reconciler = Reconciler::new(platform, issuer);
//! reconciler.run(cancel).await;
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

pub mod acme;
pub mod reconcile;
pub mod renewal;
pub mod shutdown;
pub mod storage;

// ============================================================================
// Public API Re-exports
// ============================================================================

// Issuance
pub use acme::{AcmeError, CertificateIssuer, IssuanceClient, IssuanceSettings, IssuedCertificate};

// Reconciliation
pub use reconcile::{CycleSummary, ReconcileError, Reconciler, ServiceOutcome};

// Renewal
pub use renewal::{needs_renewal, RenewalPolicy};

// Storage
pub use storage::{CertificateStore, StorageError};
