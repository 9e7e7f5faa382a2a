//! REST API client module for the marketplace backend.
//!
//! This module provides the `ApiClient` for the account endpoints the session
//! core depends on, and the `AccountApi` trait it implements so the bootstrap
//! routine can be driven by a test double.
//!
//! The API uses bearer credential authentication obtained from the login
//! endpoint.

pub mod client;
pub mod error;

pub use client::{AccountApi, ApiClient, DEFAULT_REQUEST_TIMEOUT_SECS};
pub use error::{ApiError, FetchError};
