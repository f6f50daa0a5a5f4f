//! # mockup-shared
//!
//! Pure logic shared by the server and the editor client: stream markers,
//! the incremental fenced-block scanner, the per-generation frame splitter,
//! credit cost, and the wire types. Nothing here performs I/O.

pub mod constants;
pub mod cost;
pub mod error;
pub mod markers;
pub mod protocol;
pub mod scanner;
pub mod splitter;
pub mod types;

pub use error::SharedError;
