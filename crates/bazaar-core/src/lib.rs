//! Core library for the bazaar marketplace client.
//!
//! Resolves who the visitor is at startup and keeps every screen in step with
//! that answer:
//!
//! - `auth`: credential storage, the session state machine, bootstrap, and
//!   login/logout
//! - `api`: the account endpoints of the REST backend
//! - `navigation`: the guard that picks the sign-in or main screen group
//! - `app`: the process root wiring them together

pub mod api;
pub mod app;
pub mod auth;
pub mod config;
pub mod models;
pub mod navigation;

pub use app::App;
pub use config::Config;
