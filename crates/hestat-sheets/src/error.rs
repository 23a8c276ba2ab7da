//! Error types for the hestat-sheets reader.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("cannot open workbook {path:?}: {source}")]
  Open {
    path:   PathBuf,
    #[source]
    source: calamine::Error,
  },

  #[error("cannot read sheet {sheet:?}: {source}")]
  Sheet {
    sheet:  String,
    #[source]
    source: calamine::Error,
  },

  #[error(transparent)]
  Core(#[from] hestat_core::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
