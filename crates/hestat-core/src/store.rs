//! The `StatsStore` trait: the read interface consumers query.
//!
//! Implemented by storage backends (e.g. `hestat-store-sqlite`). The CLI and
//! any future service layer depend on this abstraction. Every method is
//! read-only; analytics are recomputed per call.

use std::future::Future;

use crate::{
  field::FieldOfEducation,
  institution::{Institution, InstitutionId},
  report::{EquityReport, FieldHeatmap, FieldSummary, InstitutionReport},
  source::IngestionRecord,
};

/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes.
pub trait StatsStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Full report card for one institution, with field context when a field
  /// is given. `None` if the institution does not exist.
  fn institution_report(
    &self,
    id: InstitutionId,
    field: Option<FieldOfEducation>,
  ) -> impl Future<Output = Result<Option<InstitutionReport>, Self::Error>> + Send + '_;

  /// Composite risk of every institution offering `field`.
  fn field_heatmap(
    &self,
    field: FieldOfEducation,
  ) -> impl Future<Output = Result<FieldHeatmap, Self::Error>> + Send + '_;

  /// Equity support analysis. `None` if the institution does not exist or
  /// has no equity data.
  fn equity_report(
    &self,
    id: InstitutionId,
  ) -> impl Future<Output = Result<Option<EquityReport>, Self::Error>> + Send + '_;

  /// All institutions, ordered by name.
  fn list_institutions(
    &self,
  ) -> impl Future<Output = Result<Vec<Institution>, Self::Error>> + Send + '_;

  fn list_fields(&self) -> impl Future<Output = Result<Vec<FieldSummary>, Self::Error>> + Send + '_;

  /// Provenance of a previously ingested file.
  fn ingestion_record(
    &self,
    filename: String,
  ) -> impl Future<Output = Result<Option<IngestionRecord>, Self::Error>> + Send + '_;
}
