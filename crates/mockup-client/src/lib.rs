//! # mockup-client
//!
//! Library for front ends of the mockup service: a typed HTTP client and an
//! editor session that renders frames from the live generation stream,
//! keeps undo/redo history and tracks the credit balance.

pub mod api;
pub mod editor;
pub mod error;
pub mod history;
pub mod stream;

pub use api::{Backend, StudioClient};
pub use editor::{EditorConfig, EditorSession, Entry, Outcome};
pub use error::ClientError;
