//! Durable storage for the single bearer credential.
//!
//! Reads never fail into the caller: an unreadable store is reported as an
//! absent credential so the session resolves to signed-out.

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keyring::Entry;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

/// Keychain service name
const SERVICE_NAME: &str = "bazaar";

/// Keychain account under which the bearer token is stored
const ACCOUNT_NAME: &str = "session-token";

/// Credential file name in cache directory
const CREDENTIAL_FILE: &str = "credential.json";

/// Opaque bearer token. The core never looks inside it.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token, for the `Authorization` header only
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Keychain error: {0}")]
    Keychain(#[from] keyring::Error),

    #[error("Credential file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt credential file: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("Credential store unavailable: {0}")]
    Unavailable(String),
}

/// Storage for one bearer credential.
///
/// Implementors provide the fallible `load`/`set`/`clear`; callers on the
/// bootstrap path use `get`, which folds every failure into `None`.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self) -> Result<Option<Credential>, CredentialError>;

    async fn set(&self, credential: &Credential) -> Result<(), CredentialError>;

    /// Remove the credential. Clearing an empty store succeeds.
    async fn clear(&self) -> Result<(), CredentialError>;

    /// Remove the credential only if it is still `credential`. Returns
    /// whether it was removed; a different or missing credential is left
    /// alone.
    ///
    /// The default is a plain read then clear. Backends override it so a
    /// concurrent `set` cannot land between the two.
    async fn clear_if(&self, credential: &Credential) -> Result<bool, CredentialError> {
        if self.load().await?.as_ref() != Some(credential) {
            return Ok(false);
        }
        self.clear().await?;
        Ok(true)
    }

    /// Read the credential, treating any storage failure as absent
    async fn get(&self) -> Option<Credential> {
        match self.load().await {
            Ok(credential) => credential,
            Err(e) => {
                warn!(error = %e, "Credential read failed, treating as signed out");
                None
            }
        }
    }
}

// ============================================================================
// OS keychain
// ============================================================================

/// Credential held in the OS keychain (default backend).
pub struct KeyringCredentialStore {
    service: String,
    account: String,
    write_lock: AsyncMutex<()>,
}

impl KeyringCredentialStore {
    pub fn new() -> Self {
        Self::with_names(SERVICE_NAME, ACCOUNT_NAME)
    }

    pub fn with_names(service: &str, account: &str) -> Self {
        Self {
            service: service.to_string(),
            account: account.to_string(),
            write_lock: AsyncMutex::new(()),
        }
    }

    /// Run a keychain operation off the async executor; keychains may block on
    /// an unlock prompt.
    async fn with_entry<T, F>(&self, op: F) -> Result<T, CredentialError>
    where
        T: Send + 'static,
        F: FnOnce(Entry) -> Result<T, keyring::Error> + Send + 'static,
    {
        let service = self.service.clone();
        let account = self.account.clone();
        tokio::task::spawn_blocking(move || {
            let entry = Entry::new(&service, &account)?;
            op(entry)
        })
        .await
        .map_err(|e| CredentialError::Unavailable(e.to_string()))?
        .map_err(CredentialError::from)
    }
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialStore for KeyringCredentialStore {
    async fn load(&self) -> Result<Option<Credential>, CredentialError> {
        self.with_entry(|entry| match entry.get_password() {
            Ok(token) => Ok(Some(Credential::new(token))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e),
        })
        .await
    }

    async fn set(&self, credential: &Credential) -> Result<(), CredentialError> {
        let _write = self.write_lock.lock().await;
        let token = credential.expose().to_string();
        self.with_entry(move |entry| entry.set_password(&token)).await
    }

    async fn clear(&self) -> Result<(), CredentialError> {
        let _write = self.write_lock.lock().await;
        self.with_entry(|entry| match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e),
        })
        .await
    }

    async fn clear_if(&self, credential: &Credential) -> Result<bool, CredentialError> {
        let _write = self.write_lock.lock().await;
        let token = credential.expose().to_string();
        self.with_entry(move |entry| match entry.get_password() {
            Ok(stored) if stored == token => entry.delete_credential().map(|()| true),
            Ok(_) | Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(e),
        })
        .await
    }
}

// ============================================================================
// JSON file
// ============================================================================

#[derive(Serialize, Deserialize)]
struct StoredCredential {
    token: String,
    stored_at: DateTime<Utc>,
}

/// Credential persisted as JSON in the cache directory, for hosts without a
/// usable keychain.
pub struct FileCredentialStore {
    cache_dir: PathBuf,
    write_lock: AsyncMutex<()>,
}

impl FileCredentialStore {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            write_lock: AsyncMutex::new(()),
        }
    }

    fn credential_path(&self) -> PathBuf {
        self.cache_dir.join(CREDENTIAL_FILE)
    }

    fn remove(&self) -> Result<(), CredentialError> {
        let path = self.credential_path();
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

/// Write the credential file readable by the owner only.
fn write_private(path: &Path, contents: &str) -> std::io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    // mode() only applies on creation; tighten a file left by an older write
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(contents.as_bytes())?;
    file.sync_all()
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self) -> Result<Option<Credential>, CredentialError> {
        let path = self.credential_path();
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)?;
        let stored: StoredCredential = serde_json::from_str(&contents)?;
        debug!(stored_at = %stored.stored_at, "Credential loaded from file");
        Ok(Some(Credential::new(stored.token)))
    }

    async fn set(&self, credential: &Credential) -> Result<(), CredentialError> {
        let _write = self.write_lock.lock().await;
        let path = self.credential_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let stored = StoredCredential {
            token: credential.expose().to_string(),
            stored_at: Utc::now(),
        };
        write_private(&path, &serde_json::to_string_pretty(&stored)?)?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), CredentialError> {
        let _write = self.write_lock.lock().await;
        self.remove()
    }

    async fn clear_if(&self, credential: &Credential) -> Result<bool, CredentialError> {
        let _write = self.write_lock.lock().await;
        if self.load().await?.as_ref() != Some(credential) {
            return Ok(false);
        }
        self.remove()?;
        Ok(true)
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Process-local store; nothing survives a restart.
#[derive(Default)]
pub struct MemoryCredentialStore {
    slot: Mutex<Option<Credential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(credential: Credential) -> Self {
        Self {
            slot: Mutex::new(Some(credential)),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Option<Credential>>, CredentialError> {
        self.slot
            .lock()
            .map_err(|_| CredentialError::Unavailable("credential slot poisoned".to_string()))
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self) -> Result<Option<Credential>, CredentialError> {
        Ok(self.lock()?.clone())
    }

    async fn set(&self, credential: &Credential) -> Result<(), CredentialError> {
        *self.lock()? = Some(credential.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), CredentialError> {
        *self.lock()? = None;
        Ok(())
    }

    async fn clear_if(&self, credential: &Credential) -> Result<bool, CredentialError> {
        let mut slot = self.lock()?;
        if slot.as_ref() != Some(credential) {
            return Ok(false);
        }
        *slot = None;
        Ok(true)
    }
}
