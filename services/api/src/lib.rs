//! Rehearsal API Library Crate
//!
//! The web service around the practice engine: configuration, PostgreSQL
//! repositories, API handlers and routing. The binaries are thin wrappers
//! around this library.

pub mod config;
pub mod db;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
