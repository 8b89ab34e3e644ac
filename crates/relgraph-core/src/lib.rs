//! relgraph-core library.
//!
//! Customer-relationship records kept as event-sourced aggregates and
//! projected into an embedded property graph.
//!
//! # Conventions
//!
//! - **Errors**: every fallible operation returns [`Result`] with the crate
//!   [`Error`]; callers inspect [`Error::code`] and [`Error::status`].
//! - **Logging**: `tracing` macros, with one span per repository, command
//!   and projector operation.
//! - **Context**: every graph and event store call takes a [`Ctx`] and
//!   fails fast once it is cancelled or past its deadline.

pub mod aggregate;
pub mod command;
pub mod config;
pub mod context;
pub mod error;
pub mod eventstore;
pub mod filter;
pub mod graph;
pub mod model;
pub mod projection;
pub mod repository;
pub mod scheduler;

pub use config::RelgraphConfig;
pub use context::Ctx;
pub use error::{Error, ErrorCode, OptionExt, Result, StatusCode};
