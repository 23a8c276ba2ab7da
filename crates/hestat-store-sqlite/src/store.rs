//! [`SqliteStore`], the SQLite implementation of [`StatsStore`].

use std::{path::Path, sync::Arc};

use hestat_core::{
  fact::FactRow,
  field::FieldOfEducation,
  institution::{Institution, InstitutionId, NewInstitution, alias_key},
  report::{EquityReport, FieldHeatmap, FieldSummary, InstitutionReport},
  source::{Classification, IngestionRecord, LoadReport, SourceFile, SupersedePolicy},
  store::StatsStore,
};
use hestat_sheets::Workbook;
use rusqlite::{OptionalExtension as _, params, types::Value};

use crate::{
  Error, Result, analytics,
  encode::{INSTITUTION_COLUMNS, RawIngestion, institution_from_row},
  loader::{self, LoadOptions},
  resolver::{self, InstitutionResolver},
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A statistics store backed by a single SQLite file.
///
/// Cloning is cheap; the connection and the alias cache are shared.
#[derive(Clone)]
pub struct SqliteStore {
  conn:     tokio_rusqlite::Connection,
  resolver: Arc<InstitutionResolver>,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    Self::init(conn).await
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    Self::init(conn).await
  }

  async fn init(conn: tokio_rusqlite::Connection) -> Result<Self> {
    conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(Self { conn, resolver: Arc::new(InstitutionResolver::new()) })
  }

  // ── Ingestion ─────────────────────────────────────────────────────────────

  /// Parse and load one workbook inside a single transaction.
  ///
  /// On error nothing from the file is kept, including institutions and
  /// aliases it would have introduced.
  pub async fn ingest(
    &self,
    workbook: Workbook,
    source: SourceFile,
    classification: Classification,
    options: LoadOptions,
  ) -> Result<LoadReport> {
    let resolver = Arc::clone(&self.resolver);
    self
      .conn
      .call(move |conn| {
        Ok(loader::load_workbook(conn, &resolver, &workbook, &source, classification, options))
      })
      .await?
  }

  /// Load facts whose institutions are already resolved, recorded as if
  /// they came from `source`.
  pub async fn ingest_facts(
    &self,
    facts: Vec<FactRow>,
    source: SourceFile,
    classification: Classification,
    policy: SupersedePolicy,
  ) -> Result<LoadReport> {
    self
      .conn
      .call(move |conn| Ok(loader::load_facts(conn, &facts, &source, classification, policy)))
      .await?
  }

  // ── Institutions ──────────────────────────────────────────────────────────

  /// Create an institution (or return the one holding its code) and alias
  /// its name.
  pub async fn add_institution(&self, new: NewInstitution) -> Result<InstitutionId> {
    let resolver = Arc::clone(&self.resolver);
    self
      .conn
      .call(move |conn| Ok(resolver::ensure_institution(conn, &mut resolver.lock(), &new)))
      .await?
  }

  /// Map a spelling of an institution name to `id`. Re-pointing an alias
  /// that already belongs to another institution needs `override_existing`.
  pub async fn register_alias(
    &self,
    alias: String,
    id: InstitutionId,
    override_existing: bool,
  ) -> Result<()> {
    let resolver = Arc::clone(&self.resolver);
    self
      .conn
      .call(move |conn| {
        Ok(resolver::register_alias(conn, &mut resolver.lock(), &alias, id, override_existing))
      })
      .await?
  }

  /// Record that `id` now publishes under `code`.
  pub async fn reissue_code(&self, id: InstitutionId, code: String) -> Result<()> {
    let resolver = Arc::clone(&self.resolver);
    self
      .conn
      .call(move |conn| Ok(resolver::reissue_code(conn, &mut resolver.lock(), id, &code)))
      .await?
  }

  /// Look an institution up by numeric id, provider code or any known
  /// spelling of its name.
  pub async fn find_institution(&self, query: String) -> Result<Option<Institution>> {
    let found = self
      .conn
      .call(move |conn| {
        let query = query.trim();
        let by = |clause: &str, value: Value| {
          conn
            .query_row(
              &format!("SELECT {INSTITUTION_COLUMNS} FROM institutions WHERE {clause}"),
              params![value],
              institution_from_row,
            )
            .optional()
        };

        if let Ok(id) = query.parse::<i64>() {
          if let Some(found) = by("id = ?1", Value::Integer(id))? {
            return Ok(Some(found));
          }
        }
        if let Some(found) = by("code = ?1", Value::Text(query.to_owned()))? {
          return Ok(Some(found));
        }
        let alias = "id = (SELECT institution_id FROM institution_aliases WHERE alias = ?1)";
        Ok(by(alias, Value::Text(alias_key(query)))?)
      })
      .await?;
    Ok(found)
  }

  /// Every file recorded in `ingested_files`, in load order.
  pub async fn ingestion_records(&self) -> Result<Vec<IngestionRecord>> {
    let raws: Vec<RawIngestion> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {} FROM ingested_files ORDER BY ingested_at, filename",
          RawIngestion::COLUMNS
        ))?;
        let rows = stmt
          .query_map([], RawIngestion::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawIngestion::into_record).collect()
  }
}

// ─── StatsStore impl ─────────────────────────────────────────────────────────

impl StatsStore for SqliteStore {
  type Error = Error;

  async fn institution_report(
    &self,
    id: InstitutionId,
    field: Option<FieldOfEducation>,
  ) -> Result<Option<InstitutionReport>> {
    self
      .conn
      .call(move |conn| Ok(analytics::institution_report(conn, id, field)))
      .await?
  }

  async fn field_heatmap(&self, field: FieldOfEducation) -> Result<FieldHeatmap> {
    self.conn.call(move |conn| Ok(analytics::field_heatmap(conn, field))).await?
  }

  async fn equity_report(&self, id: InstitutionId) -> Result<Option<EquityReport>> {
    self.conn.call(move |conn| Ok(analytics::equity_report(conn, id))).await?
  }

  async fn list_institutions(&self) -> Result<Vec<Institution>> {
    let institutions = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {INSTITUTION_COLUMNS} FROM institutions ORDER BY name, id"
        ))?;
        let rows = stmt
          .query_map([], institution_from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    Ok(institutions)
  }

  async fn list_fields(&self) -> Result<Vec<FieldSummary>> {
    let ids: Vec<i64> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare("SELECT id FROM fields_of_education ORDER BY id")?;
        let rows = stmt.query_map([], |r| r.get(0))?.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    ids
      .into_iter()
      .map(|id| {
        FieldOfEducation::from_id(id)
          .map(FieldSummary::from)
          .ok_or_else(|| Error::UnknownValue { column: "field_id", value: id.to_string() })
      })
      .collect()
  }

  async fn ingestion_record(&self, filename: String) -> Result<Option<IngestionRecord>> {
    let raw: Option<RawIngestion> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {} FROM ingested_files WHERE filename = ?1", RawIngestion::COLUMNS),
              params![filename],
              RawIngestion::from_row,
            )
            .optional()?,
        )
      })
      .await?;
    raw.map(RawIngestion::into_record).transpose()
  }
}
