//! Process-wide access to the local store.
//!
//! `StoreContext` loads the local store on first use and hands out the same
//! shared instance until `reload` forgets it. Loading and reloading are
//! serialized by one lock.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::StorePaths;
use crate::error::{RegistryError, RegistryResult};
use crate::secret::CredentialCodec;
use crate::store::RegisteredServersStore;

/// Shared handle to a loaded store
pub type SharedStore = Arc<Mutex<RegisteredServersStore>>;

/// Callback invoked after the cached store is forgotten
pub type ReloadListener = Box<dyn Fn() + Send + Sync>;

/// Decides whether a load failure is replaced by an empty store
///
/// Returning `true` substitutes an empty store; `false` propagates the error.
pub type DeserializeHandler = Box<dyn Fn(&RegistryError) -> bool + Send + Sync>;

/// Owner of the cached local store
pub struct StoreContext {
    paths: StorePaths,
    codec: CredentialCodec,
    cached: Mutex<Option<SharedStore>>,
    deserialize_handler: Option<DeserializeHandler>,
    reload_listeners: Mutex<Vec<ReloadListener>>,
}

impl fmt::Debug for StoreContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreContext")
            .field("paths", &self.paths)
            .field("loaded", &self.is_loaded())
            .field("deserialize_handler", &self.deserialize_handler.is_some())
            .finish_non_exhaustive()
    }
}

impl StoreContext {
    /// Creates a context that loads the store from `paths` on first use
    #[must_use]
    pub fn new(paths: StorePaths, codec: CredentialCodec) -> Self {
        Self {
            paths,
            codec,
            cached: Mutex::new(None),
            deserialize_handler: None,
            reload_listeners: Mutex::new(Vec::new()),
        }
    }

    /// Sets the handler consulted when the store file cannot be loaded
    #[must_use]
    pub fn with_deserialize_handler(
        mut self,
        handler: impl Fn(&RegistryError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.deserialize_handler = Some(Box::new(handler));
        self
    }

    /// Returns the store file locations
    #[must_use]
    pub const fn paths(&self) -> &StorePaths {
        &self.paths
    }

    /// Returns true if the store has been loaded and not forgotten since
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.cached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Returns the local store, loading it on first use
    ///
    /// When the current file is missing, an older file is promoted first.
    ///
    /// # Errors
    ///
    /// Returns `Deserialize` if the file cannot be loaded and the handler
    /// (if any) declines to substitute an empty store.
    pub fn local_store(&self) -> RegistryResult<SharedStore> {
        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(store) = cached.as_ref() {
            return Ok(Arc::clone(store));
        }
        let store = Arc::new(Mutex::new(self.load()?));
        *cached = Some(Arc::clone(&store));
        Ok(store)
    }

    fn load(&self) -> RegistryResult<RegisteredServersStore> {
        self.paths.promote_legacy_file();
        let path = self.paths.current();
        match RegisteredServersStore::open_local(path, self.codec.clone()) {
            Ok(store) => Ok(store),
            Err(e) => match &self.deserialize_handler {
                Some(handler) if handler(&e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Using an empty store in place of an unreadable file");
                    Ok(RegisteredServersStore::new_local(path, self.codec.clone()))
                }
                _ => Err(e),
            },
        }
    }

    /// Forgets the cached store and notifies reload listeners
    ///
    /// Holders of the previous handle keep a working but detached store; the
    /// next `local_store` call reads the file again.
    pub fn reload(&self) {
        self.cached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        tracing::debug!(path = %self.paths.current().display(), "Local store cache cleared");

        let listeners = self
            .reload_listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for listener in listeners.iter() {
            listener();
        }
    }

    /// Registers a callback run after each `reload`
    pub fn subscribe_reload(&self, listener: impl Fn() + Send + Sync + 'static) {
        self.reload_listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(listener));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GroupParent, ServerGroup};
    use crate::secret::MachineProtector;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use tempfile::TempDir;

    fn test_codec() -> CredentialCodec {
        CredentialCodec::new(Arc::new(MachineProtector::with_secret(b"context-tests").unwrap()))
    }

    fn create_test_context() -> (StoreContext, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let paths = StorePaths::with_file(temp_dir.path().join("RegSrvr.xml"));
        (StoreContext::new(paths, test_codec()), temp_dir)
    }

    #[test]
    fn test_concurrent_first_access_shares_one_store() {
        let (context, _temp) = create_test_context();
        let context = Arc::new(context);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let context = Arc::clone(&context);
                thread::spawn(move || context.local_store().unwrap())
            })
            .collect();
        let stores: Vec<SharedStore> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(stores.iter().all(|s| Arc::ptr_eq(s, &stores[0])));
    }

    #[test]
    fn test_reload_notifies_and_rereads() {
        let (context, _temp) = create_test_context();
        let notified = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&notified);
        context.subscribe_reload(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let first = context.local_store().unwrap();
        {
            let mut store = first.lock().unwrap();
            let engine = store.database_engine_server_group().unwrap();
            store
                .create_group(GroupParent::Group(engine), ServerGroup::new("G1"))
                .unwrap();
        }

        context.reload();
        assert_eq!(notified.load(Ordering::SeqCst), 1);
        assert!(!context.is_loaded());

        let second = context.local_store().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        let store = second.lock().unwrap();
        assert!(store
            .resolve_group_path("DatabaseEngineServerGroup/G1")
            .is_some());
    }

    #[test]
    fn test_unreadable_file_without_handler_fails() {
        let (context, temp) = create_test_context();
        fs::write(temp.path().join("RegSrvr.xml"), "<broken").unwrap();
        assert!(matches!(
            context.local_store(),
            Err(RegistryError::Deserialize { .. })
        ));
        assert!(!context.is_loaded());
    }

    #[test]
    fn test_handler_substitutes_empty_store() {
        let (context, temp) = create_test_context();
        fs::write(temp.path().join("RegSrvr.xml"), "<broken").unwrap();
        let context = context.with_deserialize_handler(|e| matches!(e, RegistryError::Deserialize { .. }));
        let store = context.local_store().unwrap();
        assert_eq!(store.lock().unwrap().group_count(), 0);
    }
}
