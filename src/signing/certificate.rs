use std::fmt::{self, Write as _};
use std::sync::Arc;

use chrono::NaiveDate;
use parking_lot::RwLock;
use pkcs8::der::pem;
use rsa::pkcs8::{DecodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::core::SigningError;

/// Private key plus certificate used to sign one entity's documents.
pub struct SigningCertificate {
    pub id: String,
    pub entity: String,
    key: RsaPrivateKey,
    certificate_pem: Option<String>,
    fingerprint: Option<String>,
    pub valid_from: Option<NaiveDate>,
    pub valid_until: Option<NaiveDate>,
}

impl SigningCertificate {
    /// Load from an unencrypted PKCS#8 PEM private key.
    pub fn from_pkcs8_pem(
        id: impl Into<String>,
        entity: impl Into<String>,
        key_pem: &str,
    ) -> Result<Self, SigningError> {
        let key = RsaPrivateKey::from_pkcs8_pem(key_pem)
            .map_err(|e| SigningError::InvalidKey(format!("cannot read private key: {e}")))?;
        Ok(Self::from_key(id, entity, key))
    }

    /// Load from an encrypted PKCS#8 PEM private key and its password.
    pub fn from_pkcs8_encrypted_pem(
        id: impl Into<String>,
        entity: impl Into<String>,
        key_pem: &str,
        password: &str,
    ) -> Result<Self, SigningError> {
        let key = RsaPrivateKey::from_pkcs8_encrypted_pem(key_pem, password.as_bytes())
            .map_err(|e| {
                SigningError::InvalidKey(format!("cannot decrypt private key: {e}"))
            })?;
        Ok(Self::from_key(id, entity, key))
    }

    pub fn from_key(id: impl Into<String>, entity: impl Into<String>, key: RsaPrivateKey) -> Self {
        Self {
            id: id.into(),
            entity: entity.into(),
            key,
            certificate_pem: None,
            fingerprint: None,
            valid_from: None,
            valid_until: None,
        }
    }

    /// Attach the X.509 certificate (PEM). Its SHA-256 fingerprint is kept.
    pub fn with_certificate_pem(mut self, pem: &str) -> Result<Self, SigningError> {
        let der = pem_body(pem, "CERTIFICATE")?;
        let digest = Sha256::digest(&der);
        let fingerprint = digest.iter().fold(String::with_capacity(95), |mut s, b| {
            if !s.is_empty() {
                s.push(':');
            }
            let _ = write!(s, "{b:02X}");
            s
        });
        self.certificate_pem = Some(pem.to_string());
        self.fingerprint = Some(fingerprint);
        Ok(self)
    }

    /// Validity window. `from > until` is rejected.
    pub fn with_validity(
        mut self,
        from: Option<NaiveDate>,
        until: Option<NaiveDate>,
    ) -> Result<Self, SigningError> {
        if let (Some(f), Some(u)) = (from, until) {
            if f > u {
                return Err(SigningError::InvalidKey(format!(
                    "certificate {}: valid_from {f} is after valid_until {u}",
                    self.id
                )));
            }
        }
        self.valid_from = from;
        self.valid_until = until;
        Ok(self)
    }

    pub fn is_valid_on(&self, date: NaiveDate) -> bool {
        self.valid_from.is_none_or(|f| date >= f) && self.valid_until.is_none_or(|u| date <= u)
    }

    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.key
    }

    pub fn public_key(&self) -> RsaPublicKey {
        self.key.to_public_key()
    }

    pub fn public_key_pem(&self) -> Result<String, SigningError> {
        self.public_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| SigningError::InvalidKey(e.to_string()))
    }

    pub fn certificate_pem(&self) -> Option<&str> {
        self.certificate_pem.as_deref()
    }

    /// Colon-separated SHA-256 fingerprint of the certificate DER.
    pub fn fingerprint(&self) -> Option<&str> {
        self.fingerprint.as_deref()
    }
}

impl fmt::Debug for SigningCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningCertificate")
            .field("id", &self.id)
            .field("entity", &self.entity)
            .field("fingerprint", &self.fingerprint)
            .field("valid_from", &self.valid_from)
            .field("valid_until", &self.valid_until)
            .finish_non_exhaustive()
    }
}

/// DER contents of a single PEM block, which must carry `label`.
fn pem_body(pem: &str, label: &str) -> Result<Vec<u8>, SigningError> {
    let (found, der) = pem::decode_vec(pem.trim().as_bytes())
        .map_err(|e| SigningError::InvalidKey(format!("invalid {label} PEM: {e}")))?;
    if found != label {
        return Err(SigningError::InvalidKey(format!(
            "expected a {label} PEM block, found {found}"
        )));
    }
    Ok(der)
}

struct StoredCertificate {
    cert: Arc<SigningCertificate>,
    active: bool,
}

/// Signing certificates, at most one active per entity.
#[derive(Default)]
pub struct CertificateStore {
    certs: RwLock<Vec<StoredCertificate>>,
}

impl CertificateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a certificate. With `activate`, every other certificate of the
    /// same entity is deactivated under the same write lock.
    pub fn add(&self, cert: SigningCertificate, activate: bool) -> Result<(), SigningError> {
        let mut certs = self.certs.write();
        if certs.iter().any(|c| c.cert.id == cert.id) {
            return Err(SigningError::InvalidKey(format!(
                "certificate {} already exists",
                cert.id
            )));
        }
        if activate {
            for c in certs.iter_mut().filter(|c| c.cert.entity == cert.entity) {
                c.active = false;
            }
        }
        tracing::info!(certificate = %cert.id, entity = %cert.entity, active = activate, "signing certificate added");
        certs.push(StoredCertificate {
            cert: Arc::new(cert),
            active: activate,
        });
        Ok(())
    }

    /// Make `id` the active certificate of its entity.
    pub fn activate(&self, id: &str) -> Result<(), SigningError> {
        let mut certs = self.certs.write();
        let entity = certs
            .iter()
            .find(|c| c.cert.id == id)
            .map(|c| c.cert.entity.clone())
            .ok_or_else(|| SigningError::InvalidKey(format!("unknown certificate {id}")))?;
        for c in certs.iter_mut().filter(|c| c.cert.entity == entity) {
            c.active = c.cert.id == id;
        }
        tracing::info!(certificate = %id, entity = %entity, "signing certificate activated");
        Ok(())
    }

    pub fn deactivate(&self, id: &str) {
        let mut certs = self.certs.write();
        if let Some(c) = certs.iter_mut().find(|c| c.cert.id == id) {
            c.active = false;
        }
    }

    pub fn active_certificate(&self, entity: &str) -> Result<Arc<SigningCertificate>, SigningError> {
        self.certs
            .read()
            .iter()
            .find(|c| c.active && c.cert.entity == entity)
            .map(|c| c.cert.clone())
            .ok_or_else(|| SigningError::NoActiveCertificate(entity.to_string()))
    }

    pub fn active_count(&self, entity: &str) -> usize {
        self.certs
            .read()
            .iter()
            .filter(|c| c.active && c.cert.entity == entity)
            .count()
    }
}

impl fmt::Debug for CertificateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateStore")
            .field("certificates", &self.certs.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = include_str!("../../tests/data/signing_key.pem");
    const KEY_ENCRYPTED: &str = include_str!("../../tests/data/signing_key_encrypted.pem");
    const CERT: &str = include_str!("../../tests/data/signing_cert.pem");

    fn cert(id: &str, entity: &str) -> SigningCertificate {
        SigningCertificate::from_pkcs8_pem(id, entity, KEY).unwrap()
    }

    #[test]
    fn encrypted_key_needs_password() {
        assert!(SigningCertificate::from_pkcs8_encrypted_pem("c", "e", KEY_ENCRYPTED, "fatura-test").is_ok());
        assert!(matches!(
            SigningCertificate::from_pkcs8_encrypted_pem("c", "e", KEY_ENCRYPTED, "wrong"),
            Err(SigningError::InvalidKey(_))
        ));
    }

    #[test]
    fn encrypted_and_plain_keys_match() {
        let plain = cert("a", "e");
        let decrypted =
            SigningCertificate::from_pkcs8_encrypted_pem("b", "e", KEY_ENCRYPTED, "fatura-test").unwrap();
        assert_eq!(plain.public_key(), decrypted.public_key());
    }

    #[test]
    fn certificate_fingerprint() {
        let c = cert("a", "e").with_certificate_pem(CERT).unwrap();
        let fp = c.fingerprint().unwrap();
        assert_eq!(fp.len(), 95);
        assert!(c.certificate_pem().is_some());
        assert!(cert("b", "e").with_certificate_pem("garbage").is_err());
        assert!(matches!(
            cert("c", "e").with_certificate_pem(KEY),
            Err(SigningError::InvalidKey(ref m)) if m.contains("found PRIVATE KEY")
        ));
    }

    #[test]
    fn inverted_validity_rejected() {
        let from = NaiveDate::from_ymd_opt(2025, 1, 1);
        let until = NaiveDate::from_ymd_opt(2024, 1, 1);
        assert!(cert("a", "e").with_validity(from, until).is_err());

        let c = cert("a", "e").with_validity(until, from).unwrap();
        assert!(c.is_valid_on(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()));
        assert!(!c.is_valid_on(NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()));
    }

    #[test]
    fn one_active_per_entity() {
        let store = CertificateStore::new();
        store.add(cert("c1", "Exemplo Lda"), true).unwrap();
        store.add(cert("c2", "Exemplo Lda"), true).unwrap();
        store.add(cert("c3", "Outra SA"), true).unwrap();

        assert_eq!(store.active_count("Exemplo Lda"), 1);
        assert_eq!(store.active_certificate("Exemplo Lda").unwrap().id, "c2");
        assert_eq!(store.active_certificate("Outra SA").unwrap().id, "c3");

        store.activate("c1").unwrap();
        assert_eq!(store.active_certificate("Exemplo Lda").unwrap().id, "c1");
        assert_eq!(store.active_count("Exemplo Lda"), 1);
        assert_eq!(store.active_certificate("Outra SA").unwrap().id, "c3");
    }

    #[test]
    fn no_active_certificate() {
        let store = CertificateStore::new();
        store.add(cert("c1", "Exemplo Lda"), false).unwrap();
        assert_eq!(
            store.active_certificate("Exemplo Lda").unwrap_err(),
            SigningError::NoActiveCertificate("Exemplo Lda".into())
        );
    }
}
