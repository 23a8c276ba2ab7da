//! SQLite backend for the higher-education statistics store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated
//! thread without blocking the async runtime. Each workbook loads inside one
//! transaction; analytics are plain queries over the normalized tables.

mod analytics;
mod encode;
mod loader;
mod resolver;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use loader::LoadOptions;
pub use resolver::InstitutionResolver;
pub use store::SqliteStore;

#[cfg(test)]
mod tests;
