//! # leadvault
//!
//! Bulk contact ingestion into a column store, and quota-gated, cached
//! contact search on top of it.
//!
//! Operators upload delimited files; each file is streamed into the
//! analytical store (ClickHouse) in large batches while its progress is
//! tracked in a SQLite control plane. End users search the stored contacts
//! with structured filters; each non-cached search is charged against a
//! per-user daily quota and written to an audit log.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌──────────────────┐
//! │  Upload  │──▶│    Ingest    │──▶│ Analytical store │
//! │ (file)   │   │ batch+track  │   │ ClickHouse / mem │
//! └──────────┘   └──────┬───────┘   └────────┬─────────┘
//!                       │                    │
//!                       ▼                    ▼
//!                ┌─────────────┐     ┌──────────────┐
//!                │   SQLite    │◀────│    Search    │
//!                │ uploads,    │     │ cache→quota→ │
//!                │ quota, logs │     │ rows ∥ count │
//!                └─────────────┘     └──────┬───────┘
//!                                           │
//!                              ┌────────────┴─────────┐
//!                              ▼                      ▼
//!                         ┌─────────┐           ┌──────────┐
//!                         │   CLI   │           │   HTTP   │
//!                         │ (lvault)│           │  (axum)  │
//!                         └─────────┘           └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! lvault init                          # create both schemas
//! lvault ingest ./leads\ \(3\).csv     # load a file
//! lvault search --user u1 --company acme
//! lvault serve                         # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Typed search and lifecycle errors |
//! | [`analytics`] | Analytical store traits, ClickHouse and in-memory backends |
//! | [`upload`] | Upload lifecycle persistence |
//! | [`ingest`] | File → batched writes pipeline |
//! | [`filter`] | Search input and normalized key |
//! | [`predicate`] | Filter → parameterized predicate |
//! | [`executor`] | Concurrent row + count read |
//! | [`cache`] | Last search per device |
//! | [`quota`] | Daily search quota |
//! | [`audit`] | Search log and history |
//! | [`search`] | Search engine |
//! | [`server`] | HTTP server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod analytics;
pub mod audit;
pub mod cache;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod executor;
pub mod filter;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod predicate;
pub mod quota;
pub mod search;
pub mod server;
pub mod upload;
