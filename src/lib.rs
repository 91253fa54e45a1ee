//! # IntelliClaim
//!
//! Answers natural-language insurance coverage questions against a single
//! policy document.
//!
//! The policy is chunked and embedded once into a SQLite index. Each query
//! then runs through three sequential stages: a language model turns the
//! question into a search phrase, the index returns the closest policy
//! passages, and a second completion produces an APPROVED / DENIED /
//! CONDITIONAL decision grounded in those passages. Stage progress is
//! pushed to listeners as server-sent events.
//!
//! ## Architecture
//!
//! ```text
//!  policy document
//!        │ extract + chunk + embed
//!        ▼
//! ┌──────────────┐        ┌────────────────────────────────────────────┐
//! │ SQLite index │◀──────│ Pipeline: analyze → retrieve → synthesize  │
//! └──────────────┘        └───────────────┬────────────────────────────┘
//!                                          │ progress events
//!                      ┌───────────────────┤
//!                      ▼                   ▼
//!                 ┌──────────┐       ┌───────────┐
//!                 │   CLI    │       │ HTTP+SSE  │
//!                 └──────────┘       └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! intelliclaim seed policy.txt
//! intelliclaim index --document policy.txt
//! intelliclaim ask "Is knee surgery covered if I've had the policy for 3 months?"
//! intelliclaim serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Pipeline error taxonomy |
//! | [`models`] | Core data types |
//! | [`extract`] | Policy document loading |
//! | [`chunk`] | Overlapping text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`db`] | Database connection |
//! | [`migrate`] | Index schema |
//! | [`store`] | Persisted retrieval index |
//! | [`index`] | The indexing step |
//! | [`llm`] | Language-model client |
//! | [`agents`] | Query Analyzer and Synthesizer |
//! | [`retrieve`] | Vector and keyword retrievers |
//! | [`notify`] | Progress notification |
//! | [`pipeline`] | Pipeline controller |
//! | [`server`] | HTTP + SSE server |
//! | [`commands`] | CLI command implementations |

pub mod agents;
pub mod chunk;
pub mod commands;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod index;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod notify;
pub mod pipeline;
pub mod retrieve;
pub mod server;
pub mod store;
