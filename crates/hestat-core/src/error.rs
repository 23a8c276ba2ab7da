//! Error taxonomy shared by the classifier, parser, resolver and loader.

use thiserror::Error;

use crate::institution::InstitutionId;

#[derive(Debug, Error)]
pub enum Error {
  /// No known marker pattern matched the file name or content.
  #[error("unclassifiable file {file:?}: {reason}")]
  UnclassifiableFile { file: String, reason: String },

  /// A name carried no code and matched no known alias.
  #[error("unresolved institution: {0:?}")]
  UnresolvedInstitution(String),

  /// A value cell that should hold a number or year did not.
  #[error("malformed row {row} in sheet {sheet:?}: {reason}")]
  MalformedRow {
    sheet:  String,
    row:    usize,
    reason: String,
  },

  /// A write would break a foreign key or uniqueness rule. Aborts the file.
  #[error("integrity violation: {0}")]
  IntegrityViolation(String),

  #[error("alias {alias:?} already maps to institution {existing}")]
  AliasConflict {
    alias:    String,
    existing: InstitutionId,
  },

  #[error("unknown {kind} value: {value:?}")]
  UnknownVariant { kind: &'static str, value: String },

  /// Failure inside a resolver's persistence layer.
  #[error("resolver backend error: {0}")]
  Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  /// Whether the parser may drop the offending row and carry on.
  pub fn is_row_recoverable(&self) -> bool {
    matches!(self, Self::UnresolvedInstitution(_) | Self::MalformedRow { .. })
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
