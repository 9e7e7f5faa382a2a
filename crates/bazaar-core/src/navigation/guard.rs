//! Redirect the visitor to the screen group that matches their session.
//!
//! `redirect` is the pure decision; `NavigationGuard` tracks which group is
//! showing and only issues a command when the target differs, so repeated
//! evaluations never re-navigate.

use serde::Serialize;
use tracing::debug;

use crate::auth::{SessionReader, SessionStatus};

/// Top-level screen groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "snake_case")]
pub enum ScreenGroup {
    /// Sign-in and sign-up screens
    Auth,
    /// Feed, listings, profile, and the rest of the app
    Main,
}

/// Host router. Replaces whatever group is showing with `group`.
pub trait Navigator: Send + Sync {
    fn replace_group(&self, group: ScreenGroup);
}

/// Group the session belongs in; `None` while unresolved (hold the splash).
pub fn target_group(status: SessionStatus) -> Option<ScreenGroup> {
    match status {
        SessionStatus::Unknown | SessionStatus::Resolving => None,
        SessionStatus::Authenticated => Some(ScreenGroup::Main),
        SessionStatus::Unauthenticated => Some(ScreenGroup::Auth),
    }
}

/// The group to navigate to, or `None` if no navigation is needed.
pub fn redirect(status: SessionStatus, current: Option<ScreenGroup>) -> Option<ScreenGroup> {
    let target = target_group(status)?;
    if current == Some(target) {
        None
    } else {
        Some(target)
    }
}

pub struct NavigationGuard<N: Navigator> {
    navigator: N,
    current: Option<ScreenGroup>,
}

impl<N: Navigator> NavigationGuard<N> {
    /// `current` is the group already on screen, if any (`None` = splash).
    pub fn new(navigator: N, current: Option<ScreenGroup>) -> Self {
        Self { navigator, current }
    }

    pub fn current(&self) -> Option<ScreenGroup> {
        self.current
    }

    pub fn navigator(&self) -> &N {
        &self.navigator
    }

    /// The host moved between groups on its own (deep link, back stack).
    pub fn set_current(&mut self, group: ScreenGroup) {
        self.current = Some(group);
    }

    /// Evaluate one session status, issuing at most one command.
    pub fn evaluate(&mut self, status: SessionStatus) -> Option<ScreenGroup> {
        let group = redirect(status, self.current)?;
        debug!(?status, from = ?self.current, to = ?group, "Redirecting");
        self.navigator.replace_group(group);
        self.current = Some(group);
        Some(group)
    }

    /// Evaluate the current state, then every change until the store goes
    /// away. Returns the guard so the host can inspect where it ended up.
    pub async fn run(mut self, mut reader: SessionReader) -> Self {
        self.evaluate(reader.status());
        while let Some(state) = reader.changed().await {
            self.evaluate(state.status());
        }
        self
    }
}
