//! On-disk certificate store
//!
//! Keeps a copy of every issued key and chain next to the platform's
//! certificate records.
//!
//! # Directory Structure
//!
//! ```text
//! storage/
//! └── domains/
//!     └── example.com/
//!         ├── cert.pem      # Certificate chain, leaf first
//!         ├── key.pem       # Private key (0600)
//!         └── meta.json     # Expiry, issue date and covered domains
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::acme::IssuedCertificate;

/// Certificate store errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid certificate metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("refusing to store certificate for domain {0:?}")]
    InvalidDomain(String),
}

/// Metadata stored alongside a certificate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateMeta {
    pub expires: DateTime<Utc>,
    pub issued: DateTime<Utc>,
    pub domains: Vec<String>,
}

/// Filesystem certificate store
#[derive(Debug)]
pub struct CertificateStore {
    base_path: PathBuf,
}

impl CertificateStore {
    /// Open the store at `base_path`, creating it with mode 0700 on Unix
    pub fn new(base_path: &Path) -> Result<Self, StorageError> {
        let domains_path = base_path.join("domains");
        fs::create_dir_all(&domains_path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o700);
            fs::set_permissions(base_path, perms.clone())?;
            fs::set_permissions(&domains_path, perms)?;
        }

        info!(
            storage_path = %base_path.display(),
            "Initialized certificate storage"
        );

        Ok(Self {
            base_path: base_path.to_path_buf(),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn domain_path(&self, domain: &str) -> Result<PathBuf, StorageError> {
        let usable = !domain.is_empty()
            && domain != "."
            && domain != ".."
            && !domain.contains(['/', '\\', '\0']);
        if !usable {
            return Err(StorageError::InvalidDomain(domain.to_string()));
        }
        Ok(self.base_path.join("domains").join(domain))
    }

    /// Persist `issued` under its primary domain, replacing any previous copy
    pub fn save_certificate(&self, issued: &IssuedCertificate) -> Result<PathBuf, StorageError> {
        let primary = issued
            .domains()
            .first()
            .ok_or_else(|| StorageError::InvalidDomain(String::new()))?;
        let domain_path = self.domain_path(primary)?;
        fs::create_dir_all(&domain_path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&domain_path, fs::Permissions::from_mode(0o700))?;
        }

        fs::write(domain_path.join("cert.pem"), issued.chain_pem())?;

        let key_path = domain_path.join("key.pem");
        fs::write(&key_path, issued.key_pem())?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&key_path, fs::Permissions::from_mode(0o600))?;
        }

        let meta = CertificateMeta {
            expires: issued.not_after(),
            issued: Utc::now(),
            domains: issued.domains().to_vec(),
        };
        fs::write(
            domain_path.join("meta.json"),
            serde_json::to_string_pretty(&meta)?,
        )?;

        info!(
            domain = %primary,
            expires = %meta.expires,
            "Saved certificate to storage"
        );

        Ok(domain_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_storage() -> (TempDir, CertificateStore) {
        let temp_dir = TempDir::new().unwrap();
        let storage = CertificateStore::new(&temp_dir.path().join("store")).unwrap();
        (temp_dir, storage)
    }

    fn issued(domains: &[&str]) -> IssuedCertificate {
        let names: Vec<String> = domains.iter().map(|d| d.to_string()).collect();
        let key_pair = rcgen::KeyPair::generate().unwrap();
        let params = rcgen::CertificateParams::new(names.clone()).unwrap();
        let cert = params.self_signed(&key_pair).unwrap();
        IssuedCertificate::from_der_chain(names, key_pair.serialize_pem(), vec![cert.der().to_vec()])
            .unwrap()
    }

    fn read_meta(domain_path: &Path) -> CertificateMeta {
        serde_json::from_str(&fs::read_to_string(domain_path.join("meta.json")).unwrap()).unwrap()
    }

    #[test]
    fn test_storage_creation() {
        let (_temp_dir, storage) = setup_storage();
        let domains = storage.base_path().join("domains");
        assert!(domains.is_dir());
        assert_eq!(fs::read_dir(domains).unwrap().count(), 0);
    }

    #[test]
    fn test_certificate_save() {
        let (_temp_dir, storage) = setup_storage();
        let issued = issued(&["svc.example", "www.svc.example"]);

        let domain_path = storage.save_certificate(&issued).unwrap();
        assert_eq!(domain_path, storage.base_path().join("domains").join("svc.example"));

        assert_eq!(
            fs::read_to_string(domain_path.join("cert.pem")).unwrap(),
            issued.chain_pem()
        );
        assert_eq!(
            fs::read_to_string(domain_path.join("key.pem")).unwrap(),
            issued.key_pem()
        );

        let meta = read_meta(&domain_path);
        assert_eq!(meta.expires, issued.not_after());
        assert_eq!(meta.domains, vec!["svc.example", "www.svc.example"]);
    }

    #[test]
    fn test_save_replaces_previous() {
        let (_temp_dir, storage) = setup_storage();

        storage.save_certificate(&issued(&["svc.example"])).unwrap();
        let second = issued(&["svc.example"]);
        let domain_path = storage.save_certificate(&second).unwrap();

        assert_eq!(
            fs::read_to_string(domain_path.join("key.pem")).unwrap(),
            second.key_pem()
        );
    }

    #[test]
    fn test_rejects_unusable_domains() {
        let (_temp_dir, storage) = setup_storage();
        for domain in ["", ".", "..", "../etc", "a/b", "a\\b"] {
            assert!(
                matches!(storage.domain_path(domain), Err(StorageError::InvalidDomain(_))),
                "{domain:?} accepted"
            );
        }
        assert!(storage.domain_path("svc.example").is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_key_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let (_temp_dir, storage) = setup_storage();
        let domain_path = storage.save_certificate(&issued(&["svc.example"])).unwrap();

        let mode = fs::metadata(domain_path.join("key.pem"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
