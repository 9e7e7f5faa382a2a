//! Data models shared between the API client and the session core.
//!
//! - `Profile`: the signed-in visitor as returned by the backend
//! - `LoginResponse`: credential and profile issued together on login

pub mod profile;

pub use profile::{LoginRequest, LoginResponse, Profile};
