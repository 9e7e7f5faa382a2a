//! Authentication module: credential storage and the session state machine.
//!
//! This module provides:
//! - `CredentialStore`: durable storage for the bearer credential (keychain,
//!   file, or memory)
//! - `SessionStore` / `SessionReader`: the resolved session, written by a
//!   few components and read by every screen
//! - `Bootstrap` / `MountPoint`: startup resolution of the session
//! - `SessionController`: login, logout, and 401 invalidation

pub mod bootstrap;
pub mod controller;
pub mod credentials;
pub mod session;

pub use bootstrap::{Bootstrap, MountPoint, MountToken};
pub use controller::{LoginError, SessionController};
pub use credentials::{
    Credential, CredentialError, CredentialStore, FileCredentialStore, KeyringCredentialStore,
    MemoryCredentialStore,
};
pub use session::{
    Resolution, ResolutionError, Session, SessionReader, SessionState, SessionStatus,
    SessionStore, TransitionError,
};
