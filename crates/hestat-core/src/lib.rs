//! Core types and trait definitions for the higher-education statistics
//! store.
//!
//! This crate has no spreadsheet or database dependencies.
//! The sheet parser, the SQLite store and the CLI all depend on it.

pub mod error;
pub mod fact;
pub mod field;
pub mod institution;
pub mod report;
pub mod resolve;
pub mod source;
pub mod stats;
pub mod store;

pub use error::{Error, Result};
