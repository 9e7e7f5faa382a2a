//! Top-level navigation between the sign-in screens and the main app.

pub mod guard;

pub use guard::{redirect, target_group, NavigationGuard, Navigator, ScreenGroup};
