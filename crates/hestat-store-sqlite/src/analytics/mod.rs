//! Read-only analytics queries.
//!
//! Each query runs synchronously on the store's connection thread, pulls
//! the rows it needs and hands them to the pure builders in
//! [`hestat_core::report`]. Nothing is cached; "latest year" is always per
//! institution and per metric.

mod equity;
mod field;
mod institution;

pub use equity::equity_report;
pub use field::field_heatmap;
pub use institution::institution_report;

use hestat_core::{
  fact::{RateMeasure, StudentType},
  institution::{Institution, InstitutionId},
  stats,
};
use rusqlite::{Connection, OptionalExtension as _, params};

use crate::{
  Result,
  encode::{INSTITUTION_COLUMNS, institution_from_row},
};

pub fn institution(conn: &Connection, id: InstitutionId) -> Result<Option<Institution>> {
  Ok(
    conn
      .query_row(
        &format!("SELECT {INSTITUTION_COLUMNS} FROM institutions WHERE id = ?1"),
        params![id.0],
        institution_from_row,
      )
      .optional()?,
  )
}

// ── Attrition/retention/success helpers ──

/// An institution's rate series for one student type and measure, oldest
/// first.
fn rate_series(
  conn: &Connection,
  id: InstitutionId,
  student_type: StudentType,
  measure: RateMeasure,
) -> Result<Vec<(i32, f64)>> {
  let mut stmt = conn.prepare_cached(
    "SELECT year, rate FROM attrition_retention
     WHERE institution_id = ?1 AND student_type = ?2 AND measure = ?3
     ORDER BY year",
  )?;
  let rows = stmt
    .query_map(params![id.0, student_type.as_ref(), measure.as_ref()], |r| {
      Ok((r.get(0)?, r.get(1)?))
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(rows)
}

/// Every institution's rate in one year.
fn year_population(
  conn: &Connection,
  year: i32,
  student_type: StudentType,
  measure: RateMeasure,
) -> Result<Vec<f64>> {
  let mut stmt = conn.prepare_cached(
    "SELECT rate FROM attrition_retention
     WHERE year = ?1 AND student_type = ?2 AND measure = ?3",
  )?;
  let rows = stmt
    .query_map(params![year, student_type.as_ref(), measure.as_ref()], |r| r.get(0))?
    .collect::<rusqlite::Result<Vec<f64>>>()?;
  Ok(rows)
}

/// Simple national mean of a same-year population, rounded to 2 places.
fn national_avg(population: &[f64]) -> Option<f64> {
  stats::mean(population).map(|m| stats::round_to(m, 2))
}
