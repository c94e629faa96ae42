//! Credential protection
//!
//! This module protects password material at rest:
//! - `DataProtector` is the platform seam (bytes in, opaque bytes out)
//! - `MachineProtector` implements it with AES-256-GCM under a machine-derived key
//! - `CredentialCodec` adds the text encoding and the bounded retry policy

mod codec;
mod protector;

pub use codec::{CredentialCodec, MAX_PROTECT_ATTEMPTS};
pub use protector::{DataProtector, MachineProtector};
