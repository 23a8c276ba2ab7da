//! Source files, their classification, and ingestion provenance.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

// ─── Classification ──────────────────────────────────────────────────────────

/// The publication section a file belongs to.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
  EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Section {
  AttritionRetention,
  CompletionRates,
  Enrolments,
  Completions,
  Equity,
  StaffRatios,
}

impl Section {
  /// Position within one publication year's release order.
  pub fn release_rank(self) -> u8 {
    match self {
      Self::Enrolments => 0,
      Self::Completions => 1,
      Self::AttritionRetention => 2,
      Self::Equity => 3,
      Self::CompletionRates => 4,
      Self::StaffRatios => 5,
    }
  }
}

/// Structurally different publications of the same section.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
  EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Variant {
  /// The standard multi-table section workbook.
  Consolidated,
  /// A standalone cohort-analysis workbook (one sheet per duration).
  Cohort,
  /// All-students enrolment tables.
  AllStudents,
  /// Commencing-students enrolment tables.
  Commencing,
  /// Perturbed pivot-table extracts with a `Pivot_BFOE` sheet.
  Pivot,
  /// Pivot extracts reporting student load (EFTSL) rather than headcount.
  Load,
}

impl Variant {
  pub fn release_rank(self) -> u8 {
    match self {
      Self::Consolidated | Self::AllStudents => 0,
      Self::Commencing => 1,
      Self::Cohort => 2,
      Self::Pivot => 3,
      Self::Load => 4,
    }
  }
}

/// The tag the classifier assigns to a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Classification {
  pub section: Section,
  /// Data year printed in the file name or content, when there is one.
  pub year:    Option<i32>,
  pub variant: Variant,
}

impl Classification {
  /// Sort key defining release order: older publications first, then a
  /// fixed section and variant order within a year.
  pub fn release_key(&self) -> (i32, u8, u8) {
    (
      self.year.unwrap_or(0),
      self.section.release_rank(),
      self.variant.release_rank(),
    )
  }
}

// ─── Files ───────────────────────────────────────────────────────────────────

/// Identity of a file handed to the loader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
  /// Base file name; the `ingested_files` key.
  pub name:   String,
  pub path:   Option<PathBuf>,
  /// Lower-case hex SHA-256 of the file contents.
  pub digest: Option<String>,
}

impl SourceFile {
  pub fn named(name: impl Into<String>) -> Self {
    Self { name: name.into(), path: None, digest: None }
  }
}

/// One row of `ingested_files`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionRecord {
  pub filename:    String,
  pub file_path:   Option<String>,
  pub section:     Section,
  pub variant:     Variant,
  pub data_year:   Option<i32>,
  pub row_count:   u64,
  pub digest:      Option<String>,
  pub ingested_at: DateTime<Utc>,
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// How a fact row that already exists under the same key is treated.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum SupersedePolicy {
  /// The most recently loaded file wins.
  #[default]
  IngestionOrder,
  /// A stored value is replaced only by a file of the same or a later
  /// publication year.
  PublicationYear,
}

/// Outcome of loading one file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
  pub filename:       String,
  /// Fact rows written (inserted or replaced).
  pub rows_written:   u64,
  /// Rows the supersede policy kept at their stored value.
  pub rows_kept:      u64,
  pub rows_dropped:   u64,
  pub sheets_skipped: u64,
  pub sheets_parsed:  u64,
}
