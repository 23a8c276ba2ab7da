//! Error type for `hestat-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] hestat_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A text column held a value no enum variant spells.
  #[error("unknown {column} value in store: {value:?}")]
  UnknownValue { column: &'static str, value: String },
}

impl Error {
  /// Whether this is the loader's fatal per-file failure.
  pub fn is_integrity_violation(&self) -> bool {
    matches!(self, Self::Core(hestat_core::Error::IntegrityViolation(_)))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
