use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rsa::{Pkcs1v15Sign, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::core::{ChainEntry, FiscalDocument, SigningError};

use super::certificate::{CertificateStore, SigningCertificate};
use super::chain::{SEED_HASH, document_hash, hash_fragment, signature_payload};
use super::ledger::DocumentLedger;

/// Compute the chain entry for a numbered document given its predecessor hash.
///
/// Pure apart from the RSA operation; nothing is written to `doc`.
pub fn compute_chain_entry(
    doc: &FiscalDocument,
    previous_hash: &str,
    cert: &SigningCertificate,
) -> Result<ChainEntry, SigningError> {
    if doc.is_signed() {
        return Err(SigningError::AlreadySigned(doc.display_name().to_string()));
    }
    let numbering = doc
        .numbering
        .as_ref()
        .filter(|n| !n.number.is_empty() && !n.atcud.is_empty())
        .ok_or_else(|| SigningError::MissingSequenceData(doc.id.clone()))?;
    if cert.entity != doc.entity {
        return Err(SigningError::NoActiveCertificate(doc.entity.clone()));
    }
    if !cert.is_valid_on(doc.posting_date) {
        return Err(SigningError::InvalidKey(format!(
            "certificate {} is not valid on {}",
            cert.id, doc.posting_date
        )));
    }

    let payload = signature_payload(
        doc.posting_date,
        doc.posting_time,
        &numbering.number,
        doc.totals.gross_total,
        previous_hash,
    );

    Ok(ChainEntry {
        previous_hash: previous_hash.to_string(),
        current_hash: document_hash(&payload),
        signature: sign_payload(cert, &payload)?,
        fragment: hash_fragment(&payload),
    })
}

/// RSA PKCS#1 v1.5 / SHA-256 signature of the payload, base64 encoded.
pub fn sign_payload(cert: &SigningCertificate, payload: &str) -> Result<String, SigningError> {
    let digest = Sha256::digest(payload.as_bytes());
    let signature = cert
        .private_key()
        .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
        .map_err(|e| SigningError::Crypto(e.to_string()))?;
    Ok(STANDARD.encode(signature))
}

/// Check a base64 PKCS#1 v1.5 / SHA-256 signature over the payload.
pub fn verify_signature(
    public_key: &RsaPublicKey,
    payload: &str,
    signature_b64: &str,
) -> Result<(), SigningError> {
    let signature = STANDARD
        .decode(signature_b64)
        .map_err(|e| SigningError::Crypto(format!("signature is not base64: {e}")))?;
    let digest = Sha256::digest(payload.as_bytes());
    public_key
        .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, &signature)
        .map_err(|e| SigningError::Crypto(format!("signature verification failed: {e}")))
}

/// Verify a series in chain order: links, hashes, fragments and signatures.
pub fn verify_chain(docs: &[FiscalDocument], public_key: &RsaPublicKey) -> Result<(), SigningError> {
    let mut expected_prev = SEED_HASH.to_string();
    for doc in docs {
        let broken = |reason: String| SigningError::ChainBroken {
            document: doc.display_name().to_string(),
            reason,
        };
        let chain = doc
            .chain
            .as_ref()
            .ok_or_else(|| broken("document is not signed".into()))?;
        let number = doc
            .number()
            .ok_or_else(|| broken("document has no number".into()))?;

        if chain.previous_hash != expected_prev {
            return Err(broken(format!(
                "previous hash {} does not match predecessor {}",
                chain.previous_hash, expected_prev
            )));
        }

        let payload = signature_payload(
            doc.posting_date,
            doc.posting_time,
            number,
            doc.totals.gross_total,
            &chain.previous_hash,
        );
        if document_hash(&payload) != chain.current_hash {
            return Err(broken("stored hash does not match document data".into()));
        }
        if hash_fragment(&payload) != chain.fragment {
            return Err(broken("fragment does not match document data".into()));
        }
        verify_signature(public_key, &payload, &chain.signature)
            .map_err(|e| broken(e.to_string()))?;

        expected_prev = chain.current_hash.clone();
    }
    Ok(())
}

/// Signs documents against the ledger's stored chain using the entity's
/// active certificate.
#[derive(Clone)]
pub struct HashChainSigner {
    certificates: Arc<CertificateStore>,
    ledger: Arc<dyn DocumentLedger>,
}

impl HashChainSigner {
    pub fn new(certificates: Arc<CertificateStore>, ledger: Arc<dyn DocumentLedger>) -> Self {
        Self {
            certificates,
            ledger,
        }
    }

    /// Predecessor hash for `doc` from the ledger.
    pub fn previous_hash(&self, doc: &FiscalDocument) -> String {
        self.ledger
            .previous_hash(&doc.series, doc.posting_date, doc.sequence().unwrap_or(0))
    }

    /// Sign `doc` in place. On error `doc` is left untouched.
    ///
    /// The caller must hold the series lock so that the predecessor read
    /// here is still the latest when the document is committed.
    pub fn sign(&self, doc: &mut FiscalDocument) -> Result<ChainEntry, SigningError> {
        if doc.is_signed() {
            return Err(SigningError::AlreadySigned(doc.display_name().to_string()));
        }
        let cert = self.certificates.active_certificate(&doc.entity)?;
        let previous_hash = self.previous_hash(doc);
        let entry = compute_chain_entry(doc, &previous_hash, &cert)?;

        tracing::info!(
            document = %doc.display_name(),
            certificate = %cert.id,
            previous = %entry.previous_hash,
            hash = %entry.current_hash,
            "document signed"
        );
        doc.chain = Some(entry.clone());
        Ok(entry)
    }
}

impl std::fmt::Debug for HashChainSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashChainSigner")
            .field("certificates", &self.certificates)
            .finish_non_exhaustive()
    }
}
