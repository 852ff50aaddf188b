//! # repospec
//!
//! Turns a public GitHub repository into a generated technical
//! specification, streamed to the caller as it is written and stored
//! under a short share id.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌───────────┐   ┌───────────┐   ┌───────────┐
//! │ Reference │──▶│ Validator │──▶│ Analyzer  │──▶│ Generator │
//! │  parser   │   │ (GitHub)  │   │ (GitHub)  │   │   (LLM)   │
//! └───────────┘   └───────────┘   └───────────┘   └─────┬─────┘
//!                                                       │
//!                    ┌────────────────┬─────────────────┤
//!                    ▼                ▼                 ▼
//!              ┌──────────┐    ┌────────────┐    ┌────────────┐
//!              │   CLI    │    │ HTTP + SSE │    │ Spec cache │
//!              │          │    │   server   │    │  (SQLite)  │
//!              └──────────┘    └────────────┘    └────────────┘
//! ```
//!
//! Runtime-independent pieces (reference parsing, errors, models, stream
//! events, the cache policy and store trait) live in `repospec-core`.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`traits`] | `RepoHost` and `TextGenerator` capability traits |
//! | [`github`] | GitHub REST implementation of `RepoHost` |
//! | [`llm`] | Anthropic / OpenAI-compatible `TextGenerator` backends |
//! | [`validator`] | Repository existence check |
//! | [`analyzer`] | Staged repository inspection |
//! | [`progress`] | Analysis progress observer and its CLI reporter |
//! | [`detect`] | Framework, database and infrastructure detection |
//! | [`sections`] | Static spec section registry |
//! | [`prompt`] | Prompt construction |
//! | [`generator`] | Batch and streaming spec generation |
//! | [`stream`] | Streaming controller and protocol events |
//! | [`pipeline`] | Stage wiring and the batch run |
//! | [`server`] | HTTP server |
//! | [`cli`] | `repospec` subcommand implementations |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite spec store |

pub mod analyzer;
pub mod cli;
pub mod config;
pub mod db;
pub mod detect;
pub mod generator;
pub mod github;
pub mod llm;
pub mod migrate;
pub mod pipeline;
pub mod progress;
pub mod prompt;
pub mod sections;
pub mod server;
pub mod sqlite_store;
pub mod stream;
pub mod traits;
pub mod validator;

#[cfg(test)]
pub(crate) mod testing;
