//! Request authentication: ECDSA P-256 over SHA-256, keys from PEM files.
//!
//! Keys are reloaded from disk on every call; nothing is retained between calls.
//! Callers that want to cache keep the loaded key and use the `_with` variants.

use std::fmt;
use std::path::Path;

use log::warn;
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::pkcs8::{DecodePrivateKey, DecodePublicKey};
use sha2::{Digest, Sha256};

/// Key material could not be loaded, or signing failed.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("cannot read key file {path}: {source}")]
    KeyRead {
        path: String,
        source: std::io::Error,
    },
    #[error("malformed key file {path}: {reason}")]
    KeyParse { path: String, reason: String },
    #[error("signing failed")]
    Sign,
}

fn read_pem(path: &Path) -> Result<String, AuthError> {
    std::fs::read_to_string(path).map_err(|source| AuthError::KeyRead {
        path: path.display().to_string(),
        source,
    })
}

/// Load a private key: SEC1 (`EC PRIVATE KEY`) or PKCS#8 (`PRIVATE KEY`) PEM.
pub fn load_signing_key(path: &Path) -> Result<SigningKey, AuthError> {
    let pem = read_pem(path)?;
    let parsed = if pem.contains("BEGIN EC PRIVATE KEY") {
        p256::SecretKey::from_sec1_pem(&pem)
            .map(SigningKey::from)
            .map_err(|e| e.to_string())
    } else {
        SigningKey::from_pkcs8_pem(&pem).map_err(|e| e.to_string())
    };
    parsed.map_err(|reason| AuthError::KeyParse {
        path: path.display().to_string(),
        reason,
    })
}

/// Load a public key from SPKI (`PUBLIC KEY`) PEM.
pub fn load_verifying_key(path: &Path) -> Result<VerifyingKey, AuthError> {
    let pem = read_pem(path)?;
    VerifyingKey::from_public_key_pem(&pem).map_err(|e| AuthError::KeyParse {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Sign `payload` with the private key at `private_key`. Returns a DER signature.
pub fn sign(private_key: &Path, payload: &[u8]) -> Result<Vec<u8>, AuthError> {
    let key = load_signing_key(private_key)?;
    sign_with(&key, payload)
}

pub fn sign_with(key: &SigningKey, payload: &[u8]) -> Result<Vec<u8>, AuthError> {
    let sig: Signature = key.try_sign(payload).map_err(|_| AuthError::Sign)?;
    Ok(sig.to_der().as_bytes().to_vec())
}

/// Check a DER signature over `payload` against the public key at `public_key`.
/// Fails closed: any problem is logged and reported as `false`.
pub fn verify(public_key: &Path, payload: &[u8], signature: &[u8]) -> bool {
    match load_verifying_key(public_key) {
        Ok(key) => verify_with(&key, payload, signature),
        Err(e) => {
            warn!("signature check failed: {}", e);
            false
        }
    }
}

pub fn verify_with(key: &VerifyingKey, payload: &[u8], signature: &[u8]) -> bool {
    let sig = match Signature::from_der(signature) {
        Ok(sig) => sig,
        Err(_) => {
            warn!("malformed signature ({} bytes)", signature.len());
            return false;
        }
    };
    match key.verify(payload, &sig) {
        Ok(()) => true,
        Err(_) => {
            warn!("signature does not match payload");
            false
        }
    }
}

/// Short key identifier: first 8 bytes of SHA-256 over the compressed public point.
/// Logged by both ends so operators can tell whether a keypair matches.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct KeyFingerprint([u8; 8]);

impl KeyFingerprint {
    pub fn of(key: &VerifyingKey) -> Self {
        let point = key.to_encoded_point(true);
        let mut hasher = Sha256::new();
        hasher.update(point.as_bytes());
        let digest = hasher.finalize();
        let mut id = [0u8; 8];
        id.copy_from_slice(&digest[..8]);
        KeyFingerprint(id)
    }
}

impl fmt::Display for KeyFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}
