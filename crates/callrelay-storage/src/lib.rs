//! Callrelay storage crate - SQLite persistence for undelivered events.
//!
//! Provides a WAL-mode SQLite database with migrations and the durable
//! pending-event queue used by the dispatch engine.

pub mod db;
pub mod migrations;
pub mod queue;

pub use db::Database;
pub use queue::EventQueue;
