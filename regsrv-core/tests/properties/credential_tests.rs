//! Property-based tests for credential protection and persistence policies

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use proptest::prelude::*;
use regsrv_core::connection_string::{apply_persistence, reveal_password, ConnectionStringBuilder};
use regsrv_core::error::{CryptoError, CryptoResult};
use regsrv_core::models::{CredentialPersistenceType, RegisteredServer};
use regsrv_core::secret::{CredentialCodec, DataProtector, MAX_PROTECT_ATTEMPTS};
use zeroize::Zeroizing;

use super::test_codec;

fn arb_policy() -> impl Strategy<Value = CredentialPersistenceType> {
    prop_oneof![
        Just(CredentialPersistenceType::None),
        Just(CredentialPersistenceType::PersistLoginName),
        Just(CredentialPersistenceType::PersistLoginNameAndPassword),
    ]
}

// Passwords include separators and quotes that force quoting
fn arb_password() -> impl Strategy<Value = String> {
    "[A-Za-z0-9!@#$%^&*()_+=;'\" ]{1,20}".prop_filter("non-blank", |p| !p.trim().is_empty())
}

fn arb_login() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,12}"
}

fn connection_string(login: &str, password: &str) -> String {
    let mut builder = ConnectionStringBuilder::new();
    builder.set("server", "db1");
    builder.set("user id", login);
    builder.set("password", password);
    builder.to_string()
}

/// Fails transiently a fixed number of times before succeeding
#[derive(Debug)]
struct FlakyProtector {
    calls: AtomicU32,
    failures: u32,
}

impl FlakyProtector {
    fn attempt(&self) -> CryptoResult<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(CryptoError::Transient("device busy".to_string()));
        }
        Ok(())
    }
}

impl DataProtector for FlakyProtector {
    fn protect(&self, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        self.attempt()?;
        Ok(plaintext.to_vec())
    }

    fn unprotect(&self, protected: &[u8]) -> CryptoResult<Zeroizing<Vec<u8>>> {
        self.attempt()?;
        Ok(Zeroizing::new(protected.to_vec()))
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Unprotecting protected text yields the original password.
    #[test]
    fn protect_round_trip(password in "[ -~]{0,40}") {
        let codec = test_codec();
        let protected = codec.protect(&password).expect("protect");
        prop_assert_eq!(codec.unprotect(&protected).expect("unprotect"), password);
    }

    /// Each policy keeps exactly the credentials it names, and a kept
    /// password is protected and recoverable.
    #[test]
    fn persistence_policy_keeps_only_allowed_credentials(
        policy in arb_policy(),
        login in arb_login(),
        password in arb_password(),
    ) {
        let codec = test_codec();
        let persisted = apply_persistence(&connection_string(&login, &password), policy, &codec)
            .expect("apply policy");
        let builder = ConnectionStringBuilder::parse(&persisted).expect("parse persisted");

        prop_assert_eq!(builder.server_name(), Some("db1"));
        prop_assert_eq!(builder.get("user id").is_some(), policy.keeps_login_name());
        prop_assert_eq!(builder.has_password(), policy.keeps_password());
        if policy.keeps_password() {
            prop_assert_ne!(builder.get("password"), Some(password.as_str()));
            let revealed = ConnectionStringBuilder::parse(&reveal_password(&persisted, &codec).expect("reveal"))
                .expect("parse revealed");
            prop_assert_eq!(revealed.get("password"), Some(password.as_str()));
        }
    }

    /// Projecting an unchanged server twice produces the same persisted text.
    #[test]
    fn projection_is_idempotent(
        policy in arb_policy(),
        login in arb_login(),
        password in arb_password(),
    ) {
        let codec = test_codec();
        let mut server = RegisteredServer::new("S1")
            .with_connection_string(&connection_string(&login, &password))
            .with_credential_persistence_type(policy);
        server.refresh_projection(&codec).expect("first projection");
        let first = server.connection_string_with_encrypted_password().map(str::to_string);
        server.refresh_projection(&codec).expect("second projection");
        let again = server.project(policy, &codec).expect("explicit projection");

        prop_assert_eq!(server.connection_string_with_encrypted_password().map(str::to_string), first.clone());
        prop_assert_eq!(again, first);
    }

    /// Export never upgrades a login-only server to keep its password.
    #[test]
    fn export_policy_never_upgrades_login_only(own in arb_policy(), requested in arb_policy()) {
        let effective = CredentialPersistenceType::effective_for_export(own, requested);
        if own == CredentialPersistenceType::PersistLoginName {
            prop_assert!(!effective.keeps_password());
        } else {
            prop_assert_eq!(effective, requested);
        }
    }

    /// Transient failures are retried until the attempt budget is spent.
    #[test]
    fn retry_is_bounded(failures in 0u32..20) {
        let flaky = Arc::new(FlakyProtector { calls: AtomicU32::new(0), failures });
        let codec = CredentialCodec::new(flaky.clone());
        let result = codec.protect("secret");

        prop_assert_eq!(result.is_ok(), failures < MAX_PROTECT_ATTEMPTS);
        prop_assert_eq!(
            flaky.calls.load(Ordering::SeqCst),
            (failures + 1).min(MAX_PROTECT_ATTEMPTS)
        );
    }
}
