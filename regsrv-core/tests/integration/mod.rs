//! End-to-end scenarios over local files and in-memory catalogs

pub mod roundtrip_tests;
pub mod scenario_tests;

use std::sync::{Arc, OnceLock};

use regsrv_core::secret::{CredentialCodec, MachineProtector};

pub fn test_codec() -> CredentialCodec {
    static CODEC: OnceLock<CredentialCodec> = OnceLock::new();
    CODEC
        .get_or_init(|| {
            CredentialCodec::new(Arc::new(
                MachineProtector::with_secret(b"integration-tests").expect("derive test key"),
            ))
        })
        .clone()
}
