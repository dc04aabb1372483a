//! Signing requests and issued certificate material

use chrono::{DateTime, Utc};
use pem::{EncodeConfig, LineEnding, Pem};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};

use super::error::AcmeError;
use crate::renewal::not_after_from_der;

/// A certificate signing request with its freshly generated key
///
/// The first domain is the common name, every domain is a subject
/// alternative name.
pub struct SigningRequest {
    domains: Vec<String>,
    key_pair: KeyPair,
    der: Vec<u8>,
}

impl SigningRequest {
    /// Generate a key and build the DER encoded CSR for `domains`
    pub fn new(domains: &[String]) -> Result<Self, AcmeError> {
        let common_name = domains.first().ok_or(AcmeError::NoDomains)?;

        let key_pair = KeyPair::generate().map_err(|e| AcmeError::SigningRequest(e.to_string()))?;

        let mut params = CertificateParams::new(domains.to_vec())
            .map_err(|e| AcmeError::SigningRequest(e.to_string()))?;
        params.distinguished_name = DistinguishedName::new();
        params
            .distinguished_name
            .push(DnType::CommonName, common_name.as_str());

        let csr = params
            .serialize_request(&key_pair)
            .map_err(|e| AcmeError::SigningRequest(e.to_string()))?;

        Ok(Self {
            domains: domains.to_vec(),
            der: csr.der().to_vec(),
            key_pair,
        })
    }

    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    /// DER encoded CSR submitted on finalize
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Consume the request, yielding the PEM encoded private key
    pub fn into_key_pem(self) -> String {
        self.key_pair.serialize_pem()
    }
}

impl std::fmt::Debug for SigningRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningRequest")
            .field("domains", &self.domains)
            .field("der_len", &self.der.len())
            .finish_non_exhaustive()
    }
}

/// Encode DER certificates as concatenated `CERTIFICATE` PEM blocks, in order
pub fn encode_chain<B: AsRef<[u8]>>(chain: &[B]) -> String {
    let blocks: Vec<Pem> = chain
        .iter()
        .map(|der| Pem::new("CERTIFICATE", der.as_ref().to_vec()))
        .collect();
    pem::encode_many_config(&blocks, EncodeConfig::new().set_line_ending(LineEnding::LF))
}

/// Key and chain produced by a successful issuance
#[derive(Clone)]
pub struct IssuedCertificate {
    domains: Vec<String>,
    key_pem: String,
    chain: Vec<Vec<u8>>,
    not_after: DateTime<Utc>,
}

impl IssuedCertificate {
    /// Build from the downloaded DER chain, leaf first
    pub fn from_der_chain(
        domains: Vec<String>,
        key_pem: String,
        chain: Vec<Vec<u8>>,
    ) -> Result<Self, AcmeError> {
        let leaf = chain
            .first()
            .ok_or_else(|| AcmeError::Chain("empty certificate chain".to_string()))?;
        let not_after = not_after_from_der(leaf).map_err(|e| AcmeError::Chain(e.to_string()))?;

        Ok(Self {
            domains,
            key_pem,
            chain,
            not_after,
        })
    }

    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    /// PEM encoded private key
    pub fn key_pem(&self) -> &str {
        &self.key_pem
    }

    /// Full chain, leaf first
    pub fn chain_pem(&self) -> String {
        encode_chain(&self.chain)
    }

    /// Leaf certificate only
    pub fn leaf_pem(&self) -> String {
        encode_chain(&self.chain[..1])
    }

    /// Everything after the leaf
    pub fn intermediates_pem(&self) -> String {
        encode_chain(&self.chain[1..])
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }
}

impl std::fmt::Debug for IssuedCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedCertificate")
            .field("domains", &self.domains)
            .field("chain_len", &self.chain.len())
            .field("not_after", &self.not_after)
            .finish_non_exhaustive()
    }
}
