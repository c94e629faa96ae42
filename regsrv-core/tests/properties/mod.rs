//! Property-based tests for the registered servers core library

mod credential_tests;
mod document_tests;
mod tree_tests;

use std::sync::{Arc, OnceLock};

use regsrv_core::secret::{CredentialCodec, MachineProtector};

/// Codec shared by all cases; deriving the machine key is slow
pub fn test_codec() -> CredentialCodec {
    static CODEC: OnceLock<CredentialCodec> = OnceLock::new();
    CODEC
        .get_or_init(|| {
            CredentialCodec::new(Arc::new(
                MachineProtector::with_secret(b"property-tests").expect("derive test key"),
            ))
        })
        .clone()
}
