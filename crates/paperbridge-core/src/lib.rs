//! paperbridge-core library.
//!
//! # Conventions
//!
//! - **Errors**: each module owns a `thiserror` enum that maps to an
//!   [`error::ErrorCode`]; configuration uses `anyhow::Result`.
//! - **Logging**: use `tracing` macros with structured fields.

pub mod config;
pub mod credential;
pub mod dataset;
pub mod delivery;
pub mod directory;
pub mod error;
pub mod event;
pub mod github;
pub mod ledger;
pub mod lock;
pub mod model;
pub mod remote;
pub mod render;
pub mod retry;
pub mod router;
pub mod sync;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;
