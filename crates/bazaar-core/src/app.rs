//! Process root.
//!
//! `App` owns the session writer, the single top-level bootstrap task, and
//! the controller. Screens get a `SessionReader` from `session()` and never
//! run resolution themselves.

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info};

use crate::api::{AccountApi, ApiClient};
use crate::auth::{
    Bootstrap, CredentialStore, FileCredentialStore, KeyringCredentialStore,
    MemoryCredentialStore, MountPoint, SessionController, SessionReader, SessionState,
    SessionStore,
};
use crate::config::{Config, CredentialBackend};

/// Name of the root mount point in logs
const ROOT_MOUNT: &str = "root";

pub struct App {
    config: Config,
    store: Arc<SessionStore>,
    bootstrap: Bootstrap,
    controller: SessionController,
    root: MountPoint,
}

impl App {
    /// Build the app from configuration: credential backend, HTTP client,
    /// and an unresolved session.
    pub fn new(config: Config) -> Result<Self> {
        let credentials = Self::credential_store(&config)?;
        let api = ApiClient::new(&config.api_base_url, config.request_timeout())?;
        debug!(base_url = %api.base_url(), backend = ?config.credential_backend, "App configured");
        Ok(Self::with_parts(config, credentials, Arc::new(api)))
    }

    /// Build the app around caller-supplied collaborators
    pub fn with_parts(
        config: Config,
        credentials: Arc<dyn CredentialStore>,
        api: Arc<dyn AccountApi>,
    ) -> Self {
        let store = Arc::new(SessionStore::new());
        let bootstrap = Bootstrap::new(store.clone(), credentials.clone(), api.clone());
        let controller = SessionController::new(store.clone(), credentials, api);
        let root = MountPoint::new(ROOT_MOUNT, bootstrap.clone());

        Self {
            config,
            store,
            bootstrap,
            controller,
            root,
        }
    }

    fn credential_store(config: &Config) -> Result<Arc<dyn CredentialStore>> {
        Ok(match config.credential_backend {
            CredentialBackend::Keyring => Arc::new(KeyringCredentialStore::new()),
            CredentialBackend::File => Arc::new(FileCredentialStore::new(config.cache_dir()?)),
            CredentialBackend::Memory => Arc::new(MemoryCredentialStore::new()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Dispatch session resolution. Safe to call on every render; only the
    /// first call starts a task.
    pub fn start(&mut self) -> bool {
        let dispatched = self.root.activate();
        if dispatched {
            info!("Session bootstrap started");
        }
        dispatched
    }

    /// Read-only view of the session for screens
    pub fn session(&self) -> SessionReader {
        self.store.reader()
    }

    pub fn controller(&self) -> &SessionController {
        &self.controller
    }

    /// An additional, independently bootstrapping mount point sharing this
    /// app's session. Prefer `session()`; this exists for hosts that still
    /// mount groups independently.
    pub fn mount_point(&self, name: &str) -> MountPoint {
        MountPoint::new(name, self.bootstrap.clone())
    }

    /// Wait for the session to leave `unknown`/`resolving`.
    pub async fn resolved(&self) -> Option<SessionState> {
        self.session().resolved().await
    }

    /// Abort the root bootstrap if it is still running.
    pub fn shutdown(&mut self) {
        self.root.cancel();
    }
}
