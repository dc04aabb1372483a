//! ACME certificate issuance
//!
//! Obtains certificates from Let's Encrypt and compatible CAs using HTTP-01
//! domain validation.
//!
//! # Architecture
//!
//! - [`IssuanceClient`] - Runs one full issuance: account, CSR, per-domain
//!   authorization, finalization
//! - [`AcmeDirectory`] / [`AcmeAccount`] / [`AcmeOrder`] - The CA protocol seam,
//!   implemented over `instant-acme` by [`InstantAcmeDirectory`]
//! - [`ChallengeResponder`] - Short-lived HTTP server answering one challenge
//! - [`IssuedCertificate`] - The PEM encoded key and chain handed to the caller
//!
//! # Challenge Flow
//!
//! For every domain of the request, one at a time:
//!
//! 1. The authorization for the domain is fetched; already valid ones are skipped
//! 2. The `http-01` challenge is selected from the offered challenges
//! 3. [`ChallengeResponder`] binds the challenge port and serves the key
//!    authorization at `/.well-known/acme-challenge/<token>`
//! 4. The CA is told the challenge is ready and the authorization is polled
//!    until it is valid
//! 5. The responder is shut down before the next domain starts
//!
//! Once every domain is valid the order is finalized with the CSR and the
//! signed chain is downloaded. A failure on any domain aborts the whole call.

mod authorization;
mod certificate;
mod challenge;
mod client;
mod directory;
mod error;

pub use authorization::{AuthorizationPhase, AuthorizationSettings};
pub use certificate::{encode_chain, IssuedCertificate, SigningRequest};
pub use challenge::{challenge_path, ChallengeResponder, ACME_CHALLENGE_PREFIX};
pub use client::{CertificateIssuer, IssuanceClient, IssuanceSettings};
pub use directory::{
    AcmeAccount, AcmeDirectory, AcmeOrder, Authorization, AuthorizationStatus, Challenge,
    ChallengeKind, InstantAcmeDirectory,
};
pub use error::AcmeError;
