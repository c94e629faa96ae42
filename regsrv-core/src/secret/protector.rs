//! Machine-scoped data protection.

use std::fmt;

use argon2::{Algorithm, Argon2, Params, Version};
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::hmac;
use zeroize::Zeroizing;

use crate::error::{CryptoError, CryptoResult};

/// Platform seam for protecting secret bytes at rest
pub trait DataProtector: Send + Sync + fmt::Debug {
    /// Protects `plaintext`, returning opaque bytes
    ///
    /// # Errors
    ///
    /// Returns a `CryptoError`; transient failures may be retried.
    fn protect(&self, plaintext: &[u8]) -> CryptoResult<Vec<u8>>;

    /// Recovers the plaintext from bytes produced by [`DataProtector::protect`]
    ///
    /// # Errors
    ///
    /// Returns a `CryptoError`; transient failures may be retried.
    fn unprotect(&self, protected: &[u8]) -> CryptoResult<Zeroizing<Vec<u8>>>;
}

/// Format version prefixed to every protected blob
const FORMAT_VERSION: u8 = 1;

/// Fixed salt binding derived keys to this application
const KEY_SALT: &[u8] = b"regsrv.machine-scope.v1";

/// Argon2id cost: 8 MiB, 2 passes, single lane
const KDF_MEMORY_KIB: u32 = 8 * 1024;
const KDF_ITERATIONS: u32 = 2;
const KDF_PARALLELISM: u32 = 1;

/// AES-256-GCM protector keyed to the local machine
///
/// The key is derived once with Argon2id from a machine identity. Nonces are
/// synthetic (HMAC-SHA256 of the plaintext under a second derived key), so a
/// given plaintext always protects to the same bytes on the same machine.
pub struct MachineProtector {
    key: LessSafeKey,
    nonce_key: hmac::Key,
}

impl fmt::Debug for MachineProtector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MachineProtector").finish_non_exhaustive()
    }
}

impl MachineProtector {
    /// Creates a protector keyed to this machine
    ///
    /// # Errors
    ///
    /// Returns an error if key derivation fails.
    pub fn new() -> CryptoResult<Self> {
        Self::with_secret(&machine_identity())
    }

    /// Creates a protector keyed to an explicit secret
    ///
    /// # Errors
    ///
    /// Returns an error if key derivation fails.
    pub fn with_secret(secret: &[u8]) -> CryptoResult<Self> {
        let material = derive_key_material(secret)?;
        let (cipher_key, mac_key) = material.split_at(32);
        let unbound = UnboundKey::new(&AES_256_GCM, cipher_key)
            .map_err(|_| CryptoError::Terminal("invalid cipher key".to_string()))?;
        Ok(Self {
            key: LessSafeKey::new(unbound),
            nonce_key: hmac::Key::new(hmac::HMAC_SHA256, mac_key),
        })
    }

    fn synthetic_nonce(&self, plaintext: &[u8]) -> [u8; NONCE_LEN] {
        let tag = hmac::sign(&self.nonce_key, plaintext);
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&tag.as_ref()[..NONCE_LEN]);
        nonce
    }
}

impl DataProtector for MachineProtector {
    fn protect(&self, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        let nonce = self.synthetic_nonce(plaintext);
        let mut in_out = plaintext.to_vec();
        self.key
            .seal_in_place_append_tag(Nonce::assume_unique_for_key(nonce), Aad::empty(), &mut in_out)
            .map_err(|_| CryptoError::Terminal("sealing failed".to_string()))?;

        let mut output = Vec::with_capacity(1 + NONCE_LEN + in_out.len());
        output.push(FORMAT_VERSION);
        output.extend_from_slice(&nonce);
        output.extend_from_slice(&in_out);
        Ok(output)
    }

    fn unprotect(&self, protected: &[u8]) -> CryptoResult<Zeroizing<Vec<u8>>> {
        let (&version, rest) = protected
            .split_first()
            .ok_or_else(|| CryptoError::Encoding("empty protected data".to_string()))?;
        if version != FORMAT_VERSION {
            return Err(CryptoError::Encoding(format!(
                "unsupported format version {version}"
            )));
        }
        if rest.len() < NONCE_LEN + AES_256_GCM.tag_len() {
            return Err(CryptoError::Encoding("protected data is truncated".to_string()));
        }

        let (nonce_bytes, sealed) = rest.split_at(NONCE_LEN);
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(nonce_bytes);

        let mut in_out = Zeroizing::new(sealed.to_vec());
        let plaintext_len = self
            .key
            .open_in_place(Nonce::assume_unique_for_key(nonce), Aad::empty(), &mut in_out)
            .map_err(|_| {
                CryptoError::Terminal("data was protected under a different key".to_string())
            })?
            .len();
        in_out.truncate(plaintext_len);
        Ok(in_out)
    }
}

fn derive_key_material(secret: &[u8]) -> CryptoResult<Zeroizing<[u8; 64]>> {
    let params = Params::new(KDF_MEMORY_KIB, KDF_ITERATIONS, KDF_PARALLELISM, Some(64))
        .map_err(|e| CryptoError::Terminal(format!("invalid key derivation parameters: {e}")))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut material = Zeroizing::new([0u8; 64]);
    argon2
        .hash_password_into(secret, KEY_SALT, &mut *material)
        .map_err(|e| CryptoError::Terminal(format!("key derivation failed: {e}")))?;
    Ok(material)
}

/// Gets a machine-specific identity for key derivation
/// Uses machine-id or falls back to hostname and user
fn machine_identity() -> Zeroizing<Vec<u8>> {
    if let Ok(machine_id) = std::fs::read_to_string("/etc/machine-id") {
        let machine_id = machine_id.trim();
        if !machine_id.is_empty() {
            return Zeroizing::new(machine_id.as_bytes().to_vec());
        }
    }
    let hostname = hostname::get().map_or_else(
        |_| "localhost".to_string(),
        |h| h.to_string_lossy().to_string(),
    );
    let username = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "user".to_string());
    Zeroizing::new(format!("{hostname}-{username}-regsrv").into_bytes())
}
