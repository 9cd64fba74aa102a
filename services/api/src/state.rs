//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the shared
//! practice engine handed to every handler.

use rehearsal_core::SessionManager;
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SessionManager>,
}
