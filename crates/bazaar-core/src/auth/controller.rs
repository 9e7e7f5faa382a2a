//! Explicit session changes: login, logout, and invalidation after the
//! backend rejects the credential on any authenticated call.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::api::{AccountApi, ApiError, FetchError};
use crate::models::{LoginRequest, Profile};

use super::credentials::{Credential, CredentialError, CredentialStore};
use super::session::{SessionStatus, SessionStore};

#[derive(Error, Debug)]
pub enum LoginError {
    #[error("Email and password required")]
    MissingCredentials,

    #[error("Invalid email or password")]
    Rejected,

    #[error(transparent)]
    Api(ApiError),

    #[error("Could not save credential: {0}")]
    Storage(#[from] CredentialError),
}

impl From<ApiError> for LoginError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Unauthorized => LoginError::Rejected,
            other => LoginError::Api(other),
        }
    }
}

impl LoginError {
    /// Short message for the login form
    pub fn user_message(&self) -> String {
        match self {
            LoginError::MissingCredentials | LoginError::Rejected => self.to_string(),
            LoginError::Api(ApiError::NetworkError(e)) if e.is_timeout() => {
                "Connection timed out. Please try again.".to_string()
            }
            LoginError::Api(ApiError::NetworkError(_)) => {
                "Unable to connect to server. Check your internet connection.".to_string()
            }
            LoginError::Api(ApiError::RateLimited) => {
                "Server is busy. Please wait a moment and try again.".to_string()
            }
            LoginError::Api(e) => format!("Login failed: {}", e),
            LoginError::Storage(_) => "Signed in, but the session could not be saved on this device.".to_string(),
        }
    }
}

/// Writer for every session change that is not bootstrap.
#[derive(Clone)]
pub struct SessionController {
    store: Arc<SessionStore>,
    credentials: Arc<dyn CredentialStore>,
    api: Arc<dyn AccountApi>,
}

impl SessionController {
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

    /// Exchange email and password for a session. On success the credential
    /// is stored and the session goes straight to authenticated. On failure
    /// the session is left as it was.
    pub async fn login(&self, email: &str, password: &str) -> Result<Profile, LoginError> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            return Err(LoginError::MissingCredentials);
        }

        let request = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };

        let response = match self.api.login(&request).await {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, "Login failed");
                return Err(e.into());
            }
        };

        // Without a stored credential the next launch would sign the user
        // out again, so a failed write fails the login.
        self.credentials.set(&response.credential).await?;
        self.store.set_authenticated(response.profile.clone());
        info!(user_id = %response.profile.id, "Login successful");
        Ok(response.profile)
    }

    /// Clear the credential and sign out. Returns whether the stored
    /// credential was cleared; the session is signed out either way.
    pub async fn logout(&self) -> bool {
        let cleared = match self.credentials.clear().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Failed to clear credential on logout");
                false
            }
        };
        self.store.set_unauthenticated();
        info!("Logged out");
        cleared
    }

    /// The backend rejected `credential`: drop it and sign out. Ignored when
    /// the stored credential is no longer the rejected one, since a login
    /// has replaced it (or a logout removed it) since the call was made.
    /// Returns whether the session was signed out.
    pub async fn invalidate(&self, credential: &Credential) -> bool {
        match self.credentials.clear_if(credential).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("Rejected credential is no longer stored, ignoring");
                return false;
            }
            Err(e) => warn!(error = %e, "Failed to clear rejected credential"),
        }
        warn!("Credential rejected by server, signing out");
        self.store.set_unauthenticated();
        true
    }

    /// Feed the result of any authenticated call through here, together with
    /// the credential the call was made with; a 401 invalidates the session.
    pub async fn observe<T>(&self, credential: &Credential, result: &Result<T, ApiError>) -> bool {
        match result {
            Err(e) if e.is_unauthorized() => self.invalidate(credential).await,
            _ => false,
        }
    }

    /// Re-check an authenticated session against the backend. A rejected
    /// credential signs out; a transport failure changes nothing.
    pub async fn revalidate(&self) -> SessionStatus {
        if self.store.snapshot().status() != SessionStatus::Authenticated {
            return self.store.snapshot().status();
        }

        let Some(credential) = self.credentials.get().await else {
            warn!("Authenticated without a readable credential, signing out");
            self.store.set_unauthenticated();
            return SessionStatus::Unauthenticated;
        };

        match self.api.fetch_current_profile(&credential).await {
            Ok(profile) => {
                self.store.refresh_profile(profile);
            }
            Err(FetchError::InvalidCredential) => {
                self.invalidate(&credential).await;
            }
            Err(FetchError::TransportFailure(e)) => {
                warn!(error = %e, "Revalidation failed, keeping session");
            }
        }
        self.store.snapshot().status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use crate::auth::credentials::MemoryCredentialStore;
    use crate::auth::session::Resolution;
    use crate::models::LoginResponse;

    fn profile(name: &str) -> Profile {
        user("u_9", name)
    }

    fn user(id: &str, name: &str) -> Profile {
        Profile {
            id: id.to_string(),
            email: "mo@example.com".to_string(),
            role: "buyer".to_string(),
            name: name.to_string(),
            avatar_url: None,
            bio: None,
            location: Some("Braga".to_string()),
        }
    }

    /// Backend double whose next replies can be swapped between calls.
    struct ScriptedApi {
        login: Mutex<Option<Result<LoginResponse, ApiError>>>,
        fetch: Mutex<Option<Result<Profile, FetchError>>>,
        fetch_gate: Mutex<Option<Arc<Notify>>>,
    }

    impl ScriptedApi {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                login: Mutex::new(None),
                fetch: Mutex::new(None),
                fetch_gate: Mutex::new(None),
            })
        }

        fn next_login(&self, reply: Result<LoginResponse, ApiError>) {
            *self.login.lock().unwrap() = Some(reply);
        }

        fn next_fetch(&self, reply: Result<Profile, FetchError>) {
            *self.fetch.lock().unwrap() = Some(reply);
        }

        /// Hold profile fetches until the gate is notified
        fn hold_fetches(&self, gate: Arc<Notify>) {
            *self.fetch_gate.lock().unwrap() = Some(gate);
        }

        fn fetch_started(&self) -> bool {
            self.fetch.lock().unwrap().is_none()
        }
    }

    #[async_trait]
    impl AccountApi for ScriptedApi {
        async fn fetch_current_profile(&self, _credential: &Credential) -> Result<Profile, FetchError> {
            let reply = self.fetch.lock().unwrap().take().expect("unexpected profile fetch");
            let gate = self.fetch_gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            reply
        }

        async fn login(&self, _request: &LoginRequest) -> Result<LoginResponse, ApiError> {
            self.login.lock().unwrap().take().expect("unexpected login")
        }
    }

    fn setup() -> (Arc<SessionStore>, Arc<MemoryCredentialStore>, Arc<ScriptedApi>, SessionController) {
        let store = Arc::new(SessionStore::new());
        let credentials = Arc::new(MemoryCredentialStore::new());
        let api = ScriptedApi::new();
        let controller = SessionController::new(store.clone(), credentials.clone(), api.clone());
        (store, credentials, api, controller)
    }

    fn signed_out(store: &SessionStore) {
        store.set_resolving().unwrap();
        store.resolve(Resolution::Unauthenticated(None));
    }

    #[tokio::test]
    async fn test_login_stores_credential_and_authenticates() {
        let (store, credentials, api, controller) = setup();
        signed_out(&store);
        api.next_login(Ok(LoginResponse {
            credential: Credential::new("fresh"),
            profile: profile("Mo"),
        }));

        let result = controller.login(" mo@example.com ", "hunter2").await.unwrap();
        assert_eq!(result.name, "Mo");
        assert_eq!(store.snapshot().status(), SessionStatus::Authenticated);
        assert_eq!(credentials.get().await, Some(Credential::new("fresh")));
    }

    #[tokio::test]
    async fn test_login_rejected_leaves_session() {
        let (store, credentials, api, controller) = setup();
        signed_out(&store);
        api.next_login(Err(ApiError::Unauthorized));

        let err = controller.login("mo@example.com", "wrong").await.unwrap_err();
        assert!(matches!(err, LoginError::Rejected));
        assert_eq!(err.user_message(), "Invalid email or password");
        assert_eq!(store.snapshot().status(), SessionStatus::Unauthenticated);
        assert_eq!(credentials.get().await, None);
    }

    #[tokio::test]
    async fn test_login_requires_fields() {
        let (_store, _credentials, _api, controller) = setup();
        assert!(matches!(
            controller.login("  ", "pw").await,
            Err(LoginError::MissingCredentials)
        ));
        assert!(matches!(
            controller.login("a@example.com", "").await,
            Err(LoginError::MissingCredentials)
        ));
    }

    #[tokio::test]
    async fn test_logout_clears_everything() {
        let (store, credentials, _api, controller) = setup();
        credentials.set(&Credential::new("tok")).await.unwrap();
        store.set_authenticated(profile("Mo"));

        assert!(controller.logout().await);
        assert_eq!(store.snapshot().status(), SessionStatus::Unauthenticated);
        assert!(store.snapshot().profile().is_none());
        assert_eq!(credentials.get().await, None);
    }

    #[tokio::test]
    async fn test_observe_401_invalidates() {
        let (store, credentials, _api, controller) = setup();
        credentials.set(&Credential::new("tok")).await.unwrap();
        store.set_authenticated(profile("Mo"));

        let used = Credential::new("tok");
        let ok: Result<(), ApiError> = Ok(());
        assert!(!controller.observe(&used, &ok).await);
        let not_found: Result<(), ApiError> = Err(ApiError::NotFound("listing".to_string()));
        assert!(!controller.observe(&used, &not_found).await);
        assert_eq!(store.snapshot().status(), SessionStatus::Authenticated);

        let unauthorized: Result<(), ApiError> = Err(ApiError::Unauthorized);
        assert!(controller.observe(&used, &unauthorized).await);
        assert_eq!(store.snapshot().status(), SessionStatus::Unauthenticated);
        assert_eq!(credentials.get().await, None);
    }

    #[tokio::test]
    async fn test_late_401_for_replaced_credential_is_ignored() {
        let (store, credentials, api, controller) = setup();
        credentials.set(&Credential::new("old")).await.unwrap();
        store.set_authenticated(profile("Mo"));

        // The user signs in again before a call made with "old" comes back
        api.next_login(Ok(LoginResponse {
            credential: Credential::new("new"),
            profile: profile("Mo"),
        }));
        controller.login("mo@example.com", "hunter2").await.unwrap();

        let unauthorized: Result<(), ApiError> = Err(ApiError::Unauthorized);
        assert!(!controller.observe(&Credential::new("old"), &unauthorized).await);
        assert_eq!(store.snapshot().status(), SessionStatus::Authenticated);
        assert_eq!(credentials.get().await, Some(Credential::new("new")));
    }

    #[tokio::test]
    async fn test_revalidate_outcomes() {
        let (store, credentials, api, controller) = setup();
        credentials.set(&Credential::new("tok")).await.unwrap();
        store.set_authenticated(profile("Mo"));

        api.next_fetch(Ok(profile("Mo Renamed")));
        assert_eq!(controller.revalidate().await, SessionStatus::Authenticated);
        assert_eq!(store.snapshot().profile().map(|p| p.name.as_str()), Some("Mo Renamed"));

        api.next_fetch(Err(FetchError::TransportFailure(ApiError::RateLimited)));
        assert_eq!(controller.revalidate().await, SessionStatus::Authenticated);
        assert_eq!(credentials.get().await, Some(Credential::new("tok")));

        api.next_fetch(Err(FetchError::InvalidCredential));
        assert_eq!(controller.revalidate().await, SessionStatus::Unauthenticated);
        assert_eq!(credentials.get().await, None);

        // Signed out: nothing to revalidate, no fetch issued
        assert_eq!(controller.revalidate().await, SessionStatus::Unauthenticated);
    }

    #[tokio::test]
    async fn test_slow_revalidation_does_not_replace_next_user() {
        let (store, credentials, api, controller) = setup();
        credentials.set(&Credential::new("tok-a")).await.unwrap();
        store.set_authenticated(user("user_a", "Ana"));

        let gate = Arc::new(Notify::new());
        api.hold_fetches(gate.clone());
        api.next_fetch(Ok(user("user_a", "Ana Updated")));
        let revalidating = controller.clone();
        let task = tokio::spawn(async move { revalidating.revalidate().await });
        while !api.fetch_started() {
            tokio::task::yield_now().await;
        }

        controller.logout().await;
        api.next_login(Ok(LoginResponse {
            credential: Credential::new("tok-b"),
            profile: user("user_b", "Bo"),
        }));
        controller.login("bo@example.com", "pw").await.unwrap();

        gate.notify_one();
        assert_eq!(task.await.unwrap(), SessionStatus::Authenticated);
        assert_eq!(store.snapshot().profile().map(|p| p.id.as_str()), Some("user_b"));
        assert_eq!(credentials.get().await, Some(Credential::new("tok-b")));
    }

    #[tokio::test]
    async fn test_slow_revalidation_401_keeps_next_login() {
        let (store, credentials, api, controller) = setup();
        credentials.set(&Credential::new("tok-a")).await.unwrap();
        store.set_authenticated(user("user_a", "Ana"));

        let gate = Arc::new(Notify::new());
        api.hold_fetches(gate.clone());
        api.next_fetch(Err(FetchError::InvalidCredential));
        let revalidating = controller.clone();
        let task = tokio::spawn(async move { revalidating.revalidate().await });
        while !api.fetch_started() {
            tokio::task::yield_now().await;
        }

        api.next_login(Ok(LoginResponse {
            credential: Credential::new("tok-b"),
            profile: user("user_b", "Bo"),
        }));
        controller.login("bo@example.com", "pw").await.unwrap();

        gate.notify_one();
        assert_eq!(task.await.unwrap(), SessionStatus::Authenticated);
        assert_eq!(store.snapshot().profile().map(|p| p.id.as_str()), Some("user_b"));
        assert_eq!(credentials.get().await, Some(Credential::new("tok-b")));
    }
}
