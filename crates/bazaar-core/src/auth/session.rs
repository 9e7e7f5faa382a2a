//! Process-wide session state.
//!
//! `SessionStore` is the only writer; every screen holds a cloneable
//! `SessionReader`. Each write replaces the whole `SessionState` in one step,
//! and the profile lives inside `Session::Authenticated`, so a profile without
//! an authenticated status (or the reverse) cannot be represented.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::api::{ApiError, FetchError};
use crate::models::Profile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Unknown,
    Resolving,
    Authenticated,
    Unauthenticated,
}

/// Why the last resolution ended signed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "snake_case")]
pub enum ResolutionError {
    InvalidCredential,
    Network,
    Unknown,
}

impl ResolutionError {
    pub fn classify(err: &FetchError) -> Self {
        match err {
            FetchError::InvalidCredential => ResolutionError::InvalidCredential,
            FetchError::TransportFailure(ApiError::InvalidResponse(_)) => ResolutionError::Unknown,
            FetchError::TransportFailure(_) => ResolutionError::Network,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Session {
    Unknown,
    Resolving,
    Authenticated(Profile),
    Unauthenticated,
}

impl Session {
    pub fn status(&self) -> SessionStatus {
        match self {
            Session::Unknown => SessionStatus::Unknown,
            Session::Resolving => SessionStatus::Resolving,
            Session::Authenticated(_) => SessionStatus::Authenticated,
            Session::Unauthenticated => SessionStatus::Unauthenticated,
        }
    }

    pub fn profile(&self) -> Option<&Profile> {
        match self {
            Session::Authenticated(profile) => Some(profile),
            _ => None,
        }
    }

    /// True once resolution has produced an answer
    pub fn is_terminal(&self) -> bool {
        matches!(self, Session::Authenticated(_) | Session::Unauthenticated)
    }
}

/// Snapshot published to subscribers on every transition.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    session: Session,
    error: Option<ResolutionError>,
    in_flight: u32,
    resolved_at: Option<DateTime<Utc>>,
}

impl SessionState {
    fn initial() -> Self {
        Self {
            session: Session::Unknown,
            error: None,
            in_flight: 0,
            resolved_at: None,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn status(&self) -> SessionStatus {
        self.session.status()
    }

    pub fn profile(&self) -> Option<&Profile> {
        self.session.profile()
    }

    /// Set only by the transition that ended a failed resolution
    pub fn error(&self) -> Option<ResolutionError> {
        self.error
    }

    /// True while at least one resolution is in flight
    pub fn is_loading(&self) -> bool {
        self.in_flight > 0
    }

    pub fn resolved_at(&self) -> Option<DateTime<Utc>> {
        self.resolved_at
    }

    /// Replace session and error together; the loading flag is independent.
    fn transition(&mut self, session: Session, error: Option<ResolutionError>) {
        if session.is_terminal() {
            self.resolved_at = Some(Utc::now());
        }
        self.session = session;
        self.error = error;
    }
}

/// Terminal result of one bootstrap run.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Authenticated(Profile),
    Unauthenticated(Option<ResolutionError>),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Session already resolved ({0:?}); resolution cannot restart")]
    AlreadyResolved(SessionStatus),
}

/// Writable session state. Not `Clone`: share it as `Arc<SessionStore>`
/// between the components allowed to write, and hand everyone else a
/// `SessionReader`.
pub struct SessionStore {
    tx: watch::Sender<SessionState>,
}

impl SessionStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionState::initial());
        Self { tx }
    }

    pub fn reader(&self) -> SessionReader {
        SessionReader {
            rx: self.tx.subscribe(),
        }
    }

    pub fn snapshot(&self) -> SessionState {
        self.tx.borrow().clone()
    }

    /// `unknown -> resolving`. Repeating it while resolving is a no-op;
    /// once a terminal state has been reached it is refused.
    pub fn set_resolving(&self) -> Result<(), TransitionError> {
        let mut refused = None;
        self.tx.send_if_modified(|state| match state.session {
            Session::Unknown => {
                state.transition(Session::Resolving, None);
                true
            }
            Session::Resolving => false,
            _ => {
                refused = Some(state.status());
                false
            }
        });

        match refused {
            Some(status) => Err(TransitionError::AlreadyResolved(status)),
            None => Ok(()),
        }
    }

    /// Explicit login; applies from any state and skips `resolving`.
    pub fn set_authenticated(&self, profile: Profile) {
        info!(user_id = %profile.id, "Session authenticated");
        self.tx.send_modify(|state| state.transition(Session::Authenticated(profile), None));
    }

    /// Replace the profile of an authenticated session with fresher data for
    /// the same user. Ignored when signed out or when another user has signed
    /// in since the refresh started.
    pub fn refresh_profile(&self, profile: Profile) -> bool {
        self.tx.send_if_modified(|state| {
            let changed = matches!(
                &state.session,
                Session::Authenticated(current) if current.id == profile.id && *current != profile
            );
            if changed {
                state.session = Session::Authenticated(profile);
            }
            changed
        })
    }

    /// Explicit logout or invalidation; applies from any state.
    pub fn set_unauthenticated(&self) {
        self.tx.send_if_modified(|state| {
            if state.session == Session::Unauthenticated && state.error.is_none() {
                return false;
            }
            info!(from = ?state.status(), "Session unauthenticated");
            state.transition(Session::Unauthenticated, None);
            true
        });
    }

    /// Commit a bootstrap result. Applies only while the store is still
    /// `resolving`, so a late run never overwrites a state another mount
    /// point, a login, or a logout already established. Returns whether the
    /// result was applied.
    pub fn resolve(&self, resolution: Resolution) -> bool {
        self.tx.send_if_modified(|state| {
            if state.session != Session::Resolving {
                debug!(current = ?state.status(), "Dropping stale resolution");
                return false;
            }
            match resolution {
                Resolution::Authenticated(profile) => {
                    info!(user_id = %profile.id, "Session resolved: authenticated");
                    state.transition(Session::Authenticated(profile), None);
                }
                Resolution::Unauthenticated(error) => {
                    info!(?error, "Session resolved: unauthenticated");
                    state.transition(Session::Unauthenticated, error);
                }
            }
            true
        })
    }

    /// A resolution started. Loading stays raised until every started
    /// resolution has ended.
    pub fn begin_loading(&self) {
        self.tx.send_modify(|state| state.in_flight += 1);
    }

    pub fn end_loading(&self) {
        self.tx.send_if_modified(|state| {
            if state.in_flight == 0 {
                return false;
            }
            state.in_flight -= 1;
            true
        });
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only subscription to the session.
#[derive(Clone)]
pub struct SessionReader {
    rx: watch::Receiver<SessionState>,
}

impl SessionReader {
    pub fn current(&self) -> SessionState {
        self.rx.borrow().clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.rx.borrow().status()
    }

    /// Wait for the next transition and return the new state.
    /// Returns `None` once the store has been dropped.
    pub async fn changed(&mut self) -> Option<SessionState> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Wait until the session is authenticated or unauthenticated.
    pub async fn resolved(&mut self) -> Option<SessionState> {
        self.rx
            .wait_for(|state| state.session.is_terminal())
            .await
            .ok()
            .map(|state| state.clone())
    }
}
