//! # repospec core
//!
//! Runtime-independent logic for repospec: repository reference parsing,
//! the error taxonomy, spec data models, the streaming protocol events, and
//! the spec cache/share store abstraction.
//!
//! This crate contains no tokio, sqlx, or HTTP dependencies. The native
//! shell (the `repospec` crate) supplies the GitHub client, the text
//! generation backends, the SQLite store, and the HTTP server.

pub mod cache;
pub mod error;
pub mod events;
pub mod models;
pub mod reference;
pub mod store;

pub use cache::{FreshnessPolicy, SpecCache};
pub use error::{ErrorKind, PipelineError};
pub use events::{ProgressStep, ProtocolEvent};
pub use reference::{parse_reference, RepoReference};
