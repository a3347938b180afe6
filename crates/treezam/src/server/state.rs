//! Shared request state.

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::auth::AuthPolicy;
use crate::classifier::SpeciesClassifier;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::game::GameRules;
use crate::storage::Storage;

/// State handed to every handler.
///
/// Cloning is cheap; all clones share one storage connection.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    storage: Arc<Mutex<Storage>>,
    classifier: Arc<dyn SpeciesClassifier>,
    rules: GameRules,
    auth: AuthPolicy,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("rules", &self.rules)
            .field("auth", &self.auth)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Build the state from loaded configuration and an open storage.
    #[must_use]
    pub fn new(config: Config, storage: Storage, classifier: Arc<dyn SpeciesClassifier>) -> Self {
        Self {
            rules: GameRules::from(&config.game),
            auth: AuthPolicy::from(&config),
            config: Arc::new(config),
            storage: Arc::new(Mutex::new(storage)),
            classifier,
        }
    }

    /// The loaded configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Experience and progress rules.
    #[must_use]
    pub fn rules(&self) -> &GameRules {
        &self.rules
    }

    /// Session and password rules.
    #[must_use]
    pub fn auth_policy(&self) -> &AuthPolicy {
        &self.auth
    }

    /// The species classifier.
    #[must_use]
    pub fn classifier(&self) -> &dyn SpeciesClassifier {
        self.classifier.as_ref()
    }

    /// Directory uploads are written to and served from.
    #[must_use]
    pub fn upload_dir(&self) -> PathBuf {
        self.config.upload_dir()
    }

    /// Run CPU-heavy work such as password hashing on the blocking pool,
    /// without taking the storage lock.
    ///
    /// # Errors
    ///
    /// Returns the error produced by `f`, or [`Error::Internal`] if the task
    /// panicked.
    pub async fn compute<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|e| Error::internal(format!("blocking task failed: {e}")))?
    }

    /// Run `f` against the storage on the blocking thread pool.
    ///
    /// # Errors
    ///
    /// Returns the error produced by `f`, or [`Error::Internal`] if the
    /// storage lock is poisoned or the task panicked.
    pub async fn with_storage<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Storage) -> Result<T> + Send + 'static,
    {
        let storage = Arc::clone(&self.storage);
        self.compute(move || {
            let guard = storage
                .lock()
                .map_err(|_| Error::internal("storage lock poisoned"))?;
            f(&guard)
        })
        .await
    }
}
