//! Session bootstrap: turn a stored credential into a resolved session.
//!
//! A run reads the credential, fetches the profile, and commits exactly one
//! terminal state to the `SessionStore`. Each run holds the loading flag for
//! its duration through a drop guard, so it is released on every exit path
//! including panics and an aborted task. A rejected credential is cleared
//! only if it is still the stored one.
//!
//! `MountPoint` owns the per-mount "already dispatched" check and the task
//! handle. A mount point that is torn down before its run finishes commits
//! nothing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{AccountApi, FetchError};

use super::credentials::CredentialStore;
use super::session::{Resolution, ResolutionError, SessionStatus, SessionStore};

/// Liveness of the mount point a bootstrap run belongs to.
#[derive(Clone, Debug)]
pub struct MountToken(Arc<AtomicBool>);

impl MountToken {
    fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    /// A token for callers that run bootstrap outside any mount point
    pub fn detached() -> Self {
        Self::new()
    }

    pub fn is_mounted(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn unmount(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// One in-flight resolution. Raises the loading flag on creation and lowers
/// it on drop. If dropped without settling (panic or abort) while still
/// mounted, the session fails closed to unauthenticated.
struct InFlight<'a> {
    store: &'a SessionStore,
    mount: &'a MountToken,
    settled: bool,
}

impl<'a> InFlight<'a> {
    fn begin(store: &'a SessionStore, mount: &'a MountToken) -> Self {
        store.begin_loading();
        Self {
            store,
            mount,
            settled: false,
        }
    }

    fn settle(mut self, resolution: Resolution) -> bool {
        self.settled = true;
        if !self.mount.is_mounted() {
            debug!("Mount point torn down before commit, discarding resolution");
            return false;
        }
        self.store.resolve(resolution)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.settled && self.mount.is_mounted() {
            warn!("Bootstrap ended without a result, failing closed");
            self.store
                .resolve(Resolution::Unauthenticated(Some(ResolutionError::Unknown)));
        }
        self.store.end_loading();
    }
}

/// The bootstrap routine and its collaborators. Cheap to clone.
#[derive(Clone)]
pub struct Bootstrap {
    store: Arc<SessionStore>,
    credentials: Arc<dyn CredentialStore>,
    api: Arc<dyn AccountApi>,
}

impl Bootstrap {
    pub fn new(
        store: Arc<SessionStore>,
        credentials: Arc<dyn CredentialStore>,
        api: Arc<dyn AccountApi>,
    ) -> Self {
        Self {
            store,
            credentials,
            api,
        }
    }

    /// Run one resolution on behalf of `mount` and return the status the
    /// store holds afterwards.
    pub async fn run(&self, mount: &MountToken) -> SessionStatus {
        if let Err(e) = self.store.set_resolving() {
            debug!(error = %e, "Skipping bootstrap");
            return self.store.snapshot().status();
        }

        let in_flight = InFlight::begin(&self.store, mount);
        let resolution = self.resolve().await;
        in_flight.settle(resolution);

        self.store.snapshot().status()
    }

    async fn resolve(&self) -> Resolution {
        let Some(credential) = self.credentials.get().await else {
            debug!("No stored credential");
            return Resolution::Unauthenticated(None);
        };

        match self.api.fetch_current_profile(&credential).await {
            Ok(profile) => Resolution::Authenticated(profile),
            Err(err) => {
                let kind = ResolutionError::classify(&err);
                match err {
                    FetchError::InvalidCredential => match self.credentials.clear_if(&credential).await {
                        Ok(true) => info!("Stored credential rejected, cleared it"),
                        Ok(false) => debug!("Rejected credential already replaced, keeping the new one"),
                        Err(e) => warn!(error = %e, "Failed to clear rejected credential"),
                    },
                    FetchError::TransportFailure(e) => {
                        warn!(error = %e, "Profile fetch failed, keeping credential for retry");
                    }
                }
                Resolution::Unauthenticated(Some(kind))
            }
        }
    }
}

/// A top-level component that may trigger bootstrap when it becomes active.
///
/// `activate` dispatches at most one run per mount point; re-renders call it
/// freely. Dropping the mount point unmounts it.
pub struct MountPoint {
    name: String,
    bootstrap: Bootstrap,
    token: MountToken,
    dispatched: bool,
    task: Option<JoinHandle<SessionStatus>>,
}

impl MountPoint {
    pub fn new(name: impl Into<String>, bootstrap: Bootstrap) -> Self {
        Self {
            name: name.into(),
            bootstrap,
            token: MountToken::new(),
            dispatched: false,
            task: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dispatch the bootstrap task unless this mount point already has.
    /// Returns whether a task was dispatched. Must be called from within a
    /// tokio runtime.
    pub fn activate(&mut self) -> bool {
        if self.dispatched {
            debug!(mount = %self.name, "Bootstrap already dispatched");
            return false;
        }
        if !self.token.is_mounted() {
            debug!(mount = %self.name, "Not activating an unmounted mount point");
            return false;
        }

        debug!(mount = %self.name, "Dispatching bootstrap");
        let bootstrap = self.bootstrap.clone();
        let token = self.token.clone();
        self.dispatched = true;
        self.task = Some(tokio::spawn(async move { bootstrap.run(&token).await }));
        true
    }

    pub fn is_dispatched(&self) -> bool {
        self.dispatched
    }

    pub fn is_mounted(&self) -> bool {
        self.token.is_mounted()
    }

    /// Tear down: an in-flight run keeps going but will not commit.
    pub fn unmount(&mut self) {
        debug!(mount = %self.name, "Unmounted");
        self.token.unmount();
    }

    /// Abort the in-flight run (process shutdown). The loading flag is still
    /// released.
    pub fn cancel(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }

    /// Wait for the dispatched run. `None` if nothing was dispatched, the run
    /// was already joined, or the task was aborted or panicked.
    pub async fn join(&mut self) -> Option<SessionStatus> {
        let task = self.task.take()?;
        match task.await {
            Ok(status) => Some(status),
            Err(e) => {
                warn!(mount = %self.name, error = %e, "Bootstrap task did not complete");
                None
            }
        }
    }
}

impl Drop for MountPoint {
    fn drop(&mut self) {
        self.token.unmount();
    }
}
