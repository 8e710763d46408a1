//! TurnTalks API Library Crate
//!
//! Application state, configuration, the PostgreSQL store, HTTP handlers and
//! routing for the TurnTalks web service. The `api` binary is a thin wrapper
//! around this library.

pub mod config;
pub mod db;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
