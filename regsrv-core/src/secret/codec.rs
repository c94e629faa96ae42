//! Credential codec: text-level protection with bounded retry.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use super::protector::{DataProtector, MachineProtector};
use crate::error::{CryptoError, CryptoResult};

/// Maximum number of attempts for a protect or unprotect call
pub const MAX_PROTECT_ATTEMPTS: u32 = 10;

/// Protects and unprotects password text
///
/// Protected text is the base64 form of the protector's output. Transient
/// and out-of-memory failures are retried up to [`MAX_PROTECT_ATTEMPTS`]
/// times in total; any other failure is returned immediately.
#[derive(Debug, Clone)]
pub struct CredentialCodec {
    protector: Arc<dyn DataProtector>,
}

impl CredentialCodec {
    /// Creates a codec over the given protector
    #[must_use]
    pub fn new(protector: Arc<dyn DataProtector>) -> Self {
        Self { protector }
    }

    /// Creates a codec keyed to the local machine
    ///
    /// # Errors
    ///
    /// Returns an error if the machine key cannot be derived.
    pub fn machine() -> CryptoResult<Self> {
        Ok(Self::new(Arc::new(MachineProtector::new()?)))
    }

    /// Protects `plaintext`, returning base64 text
    ///
    /// # Errors
    ///
    /// Returns the last failure once the retry budget is spent, or the first
    /// non-retryable failure.
    pub fn protect(&self, plaintext: &str) -> CryptoResult<String> {
        let protected = with_retry("protect", || self.protector.protect(plaintext.as_bytes()))?;
        Ok(STANDARD.encode(protected))
    }

    /// Recovers plaintext from base64 text produced by [`CredentialCodec::protect`]
    ///
    /// # Errors
    ///
    /// Returns `Encoding` for text that is not base64 or not UTF-8 once
    /// unprotected; otherwise as for [`CredentialCodec::protect`].
    pub fn unprotect(&self, protected: &str) -> CryptoResult<String> {
        let bytes = STANDARD
            .decode(protected.trim())
            .map_err(|e| CryptoError::Encoding(e.to_string()))?;
        let plain = with_retry("unprotect", || self.protector.unprotect(&bytes))?;
        String::from_utf8(plain.to_vec()).map_err(|e| CryptoError::Encoding(e.to_string()))
    }
}

fn with_retry<T>(
    operation: &str,
    mut attempt: impl FnMut() -> CryptoResult<T>,
) -> CryptoResult<T> {
    let mut tries = 0;
    loop {
        tries += 1;
        match attempt() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && tries < MAX_PROTECT_ATTEMPTS => {
                tracing::debug!("Credential {operation} attempt {tries} failed, retrying: {e}");
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::warn!(
                        "Credential {operation} failed after {MAX_PROTECT_ATTEMPTS} attempts: {e}"
                    );
                }
                return Err(e);
            }
        }
    }
}
