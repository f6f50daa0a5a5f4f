//! # mockup-store
//!
//! SQLite persistence for the mockup service: user profiles (credit
//! balance and tier), projects, chat transcripts and frames.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for every domain
//! model. Callers in async code keep it behind a mutex.

pub mod database;
pub mod frames;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod profiles;
pub mod projects;

mod convert;
mod error;

pub use database::Database;
pub use error::StoreError;
pub use frames::ReplaceOutcome;
pub use models::*;
