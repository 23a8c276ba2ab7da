//! Conversions between domain types and the plain-text columns stored in
//! SQLite.
//!
//! Enum columns hold the `snake_case` strum spelling of the variant.
//! Timestamps are RFC 3339 strings.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use hestat_core::{
  institution::{Institution, InstitutionId},
  source::{IngestionRecord, Section, Variant},
};

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Enum columns ────────────────────────────────────────────────────────────

/// Parse a strum-spelled enum column.
pub fn decode_enum<T: FromStr>(column: &'static str, s: &str) -> Result<T> {
  s.parse().map_err(|_| Error::UnknownValue { column, value: s.to_owned() })
}

pub fn encode_bool(b: bool) -> i64 { i64::from(b) }

// ─── Row types ───────────────────────────────────────────────────────────────

pub const INSTITUTION_COLUMNS: &str = "id, code, name, state, provider_type";

/// Read an `institutions` row selected with [`INSTITUTION_COLUMNS`].
pub fn institution_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Institution> {
  Ok(Institution {
    id:            InstitutionId(row.get(0)?),
    code:          row.get(1)?,
    name:          row.get(2)?,
    state:         row.get(3)?,
    provider_type: row.get(4)?,
  })
}

/// Raw strings read directly from an `ingested_files` row.
pub struct RawIngestion {
  pub filename:       String,
  pub file_path:      Option<String>,
  pub section:        String,
  pub variant:        String,
  pub data_year:      Option<i32>,
  pub row_count:      i64,
  pub content_sha256: Option<String>,
  pub ingested_at:    String,
}

impl RawIngestion {
  pub const COLUMNS: &'static str = "filename, file_path, section, variant, data_year, \
                                     row_count, content_sha256, ingested_at";

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      filename:       row.get(0)?,
      file_path:      row.get(1)?,
      section:        row.get(2)?,
      variant:        row.get(3)?,
      data_year:      row.get(4)?,
      row_count:      row.get(5)?,
      content_sha256: row.get(6)?,
      ingested_at:    row.get(7)?,
    })
  }

  pub fn into_record(self) -> Result<IngestionRecord> {
    Ok(IngestionRecord {
      filename:    self.filename,
      file_path:   self.file_path,
      section:     decode_enum::<Section>("section", &self.section)?,
      variant:     decode_enum::<Variant>("variant", &self.variant)?,
      data_year:   self.data_year,
      row_count:   u64::try_from(self.row_count).unwrap_or_default(),
      digest:      self.content_sha256,
      ingested_at: decode_dt(&self.ingested_at)?,
    })
  }
}
