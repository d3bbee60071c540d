//! Durable storage for an Erbe world record.
//!
//! One world lives in one JSON document inside a data directory. Every write
//! goes through a temp file and an atomic rename, so a reader sees either
//! the previous document or the new one, never a torn write. Loading never
//! fails the caller: a damaged document is salvaged when possible, and moved
//! aside and replaced by a fresh default otherwise.
//!
//! # Layout
//!
//! ```text
//! <data_dir>/
//!     <name>.json                     canonical document
//!     <name>_backup.json              copy of the latest save
//!     <name>_YYYYMMDD_HHMMSS.json     archive written on every save
//!     <name>.corrupt                  first unreadable document moved aside
//!     <name>.YYYYMMDD-HHMMSS.corrupt  later ones
//! ```
//!
//! # Modules
//!
//! - [`file_store`] -- [`WorldStore`], its configuration, and the locked
//!   session used across a tick
//! - [`layout`] -- File naming inside the data directory
//! - [`salvage`] -- Recovering a document from a damaged file
//! - [`error`] -- Shared error types

pub mod error;
pub mod file_store;
pub mod layout;
pub mod salvage;

// Re-export primary types for convenience.
pub use error::StoreError;
pub use file_store::{LoadReport, LoadSource, StoreConfig, StoreSession, WorldStore};
pub use layout::StoreLayout;
pub use salvage::{Parsed, parse_document};
