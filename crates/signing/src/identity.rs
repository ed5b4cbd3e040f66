//! Lazily created, file-backed signing identity

use apkforge_errors::{Result, SigningError};
use pem::Pem;
use pkcs8::{EncryptedPrivateKeyInfo, PrivateKeyInfo};
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use time::OffsetDateTime;

const KEY_BITS: usize = 2048;
const ORGANIZATION: &str = "apkforge";
/// Keystore entries are encrypted under a fixed in-process password; the
/// file's confidentiality relies on filesystem permissions, the password
/// only keeps the PKCS#8 entry in its protected form.
const KEYSTORE_PASSWORD: &[u8] = b"apkforge-keystore";
/// Back-dated to tolerate device clock skew.
const VALIDITY_BACKDATE_DAYS: i64 = 30;
const VALIDITY_YEARS: i64 = 30;

const TAG_CERTIFICATE: &str = "CERTIFICATE";
const TAG_ENCRYPTED_KEY: &str = "ENCRYPTED PRIVATE KEY";

/// A self-signed certificate plus its RSA private key.
#[derive(Clone)]
pub struct SigningIdentity {
    certificate_der: Vec<u8>,
    private_key: RsaPrivateKey,
}

impl SigningIdentity {
    #[must_use]
    pub fn certificate_der(&self) -> &[u8] {
        &self.certificate_der
    }

    #[must_use]
    pub fn private_key(&self) -> &RsaPrivateKey {
        &self.private_key
    }

    /// DER-encoded SubjectPublicKeyInfo for the signer record.
    ///
    /// # Errors
    ///
    /// Fails if the public key cannot be DER-encoded.
    pub fn public_key_der(&self) -> Result<Vec<u8>> {
        RsaPublicKey::from(&self.private_key)
            .to_public_key_der()
            .map(|der| der.as_ref().to_vec())
            .map_err(|e| {
                SigningError::Signing {
                    message: format!("public key encoding: {e}"),
                }
                .into()
            })
    }
}

impl std::fmt::Debug for SigningIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningIdentity")
            .field("certificate_der_len", &self.certificate_der.len())
            .finish_non_exhaustive()
    }
}

/// Process-wide holder of the signing identity.
///
/// The first access creates the keystore file (or loads an existing one);
/// later accesses reuse the in-memory identity. The keystore is never
/// rotated automatically.
#[derive(Debug)]
pub struct SigningIdentityStore {
    path: PathBuf,
    slot: Mutex<Option<Arc<SigningIdentity>>>,
}

impl SigningIdentityStore {
    #[must_use]
    pub fn new(keystore_path: impl Into<PathBuf>) -> Self {
        Self {
            path: keystore_path.into(),
            slot: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn keystore_path(&self) -> &Path {
        &self.path
    }

    /// Get the signing identity, creating and persisting it on first use.
    ///
    /// # Errors
    ///
    /// Fails with [`SigningError::KeystoreCreation`] if generation or
    /// persistence fails (any partially written keystore file is deleted
    /// first), or [`SigningError::KeystoreCorrupt`] if an existing file
    /// cannot be parsed.
    pub fn get_or_create(&self) -> Result<Arc<SigningIdentity>> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(identity) = &*slot {
            return Ok(identity.clone());
        }

        let identity = if self.path.exists() {
            Arc::new(load_keystore(&self.path)?)
        } else {
            let identity = generate_identity().map_err(|e| keystore_creation(&e))?;
            if let Err(e) = persist_keystore(&self.path, &identity) {
                // Key material must never be left partially persisted.
                let _ = fs::remove_file(&self.path);
                return Err(keystore_creation(&e));
            }
            Arc::new(identity)
        };

        *slot = Some(identity.clone());
        Ok(identity)
    }
}

fn keystore_creation(message: &impl std::fmt::Display) -> apkforge_errors::Error {
    SigningError::KeystoreCreation {
        message: message.to_string(),
    }
    .into()
}

fn corrupt(message: impl Into<String>) -> apkforge_errors::Error {
    SigningError::KeystoreCorrupt {
        message: message.into(),
    }
    .into()
}

fn load_keystore(path: &Path) -> Result<SigningIdentity> {
    let text = fs::read_to_string(path)?;
    let blocks = pem::parse_many(&text).map_err(|e| corrupt(e.to_string()))?;

    let certificate_der = blocks
        .iter()
        .find(|block| block.tag() == TAG_CERTIFICATE)
        .map(|block| block.contents().to_vec())
        .ok_or_else(|| corrupt("no certificate entry"))?;

    let encrypted = blocks
        .iter()
        .find(|block| block.tag() == TAG_ENCRYPTED_KEY)
        .ok_or_else(|| corrupt("no private key entry"))?;

    let decrypted = EncryptedPrivateKeyInfo::try_from(encrypted.contents())
        .and_then(|info| info.decrypt(KEYSTORE_PASSWORD))
        .map_err(|e| corrupt(format!("key entry: {e}")))?;
    let private_key = RsaPrivateKey::from_pkcs8_der(decrypted.as_bytes())
        .map_err(|e| corrupt(format!("key entry: {e}")))?;

    Ok(SigningIdentity {
        certificate_der,
        private_key,
    })
}

fn generate_identity() -> std::result::Result<SigningIdentity, String> {
    let mut rng = rand::rngs::OsRng;
    let private_key =
        RsaPrivateKey::new(&mut rng, KEY_BITS).map_err(|e| format!("key generation: {e}"))?;

    let pkcs8_pem = private_key
        .to_pkcs8_pem(rsa::pkcs8::LineEnding::LF)
        .map_err(|e| format!("key encoding: {e}"))?;
    let key_pair =
        rcgen::KeyPair::from_pem(&pkcs8_pem).map_err(|e| format!("certificate key: {e}"))?;

    let mut params = rcgen::CertificateParams::default();
    let mut dn = rcgen::DistinguishedName::new();
    dn.push(rcgen::DnType::OrganizationName, ORGANIZATION);
    params.distinguished_name = dn;
    // Random non-negative serial.
    params.serial_number = Some((rand::random::<u64>() >> 1).into());
    let now = OffsetDateTime::now_utc();
    params.not_before = now - time::Duration::days(VALIDITY_BACKDATE_DAYS);
    params.not_after = now + time::Duration::days(VALIDITY_YEARS * 365);

    let certificate = params
        .self_signed(&key_pair)
        .map_err(|e| format!("certificate generation: {e}"))?;

    Ok(SigningIdentity {
        certificate_der: certificate.der().to_vec(),
        private_key,
    })
}

fn persist_keystore(
    path: &Path,
    identity: &SigningIdentity,
) -> std::result::Result<(), String> {
    let pkcs8 = identity
        .private_key
        .to_pkcs8_der()
        .map_err(|e| format!("key encoding: {e}"))?;
    let encrypted = PrivateKeyInfo::try_from(pkcs8.as_bytes())
        .and_then(|info| info.encrypt(&mut rand::rngs::OsRng, KEYSTORE_PASSWORD))
        .map_err(|e| format!("key encryption: {e}"))?;

    let blocks = vec![
        Pem::new(TAG_CERTIFICATE, identity.certificate_der.clone()),
        Pem::new(TAG_ENCRYPTED_KEY, encrypted.as_bytes().to_vec()),
    ];

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| format!("keystore dir: {e}"))?;
    }
    fs::write(path, pem::encode_many(&blocks)).map_err(|e| format!("keystore write: {e}"))
}
