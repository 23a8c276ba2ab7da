use hestat_core::{
  field::FieldOfEducation,
  institution::InstitutionId,
  report::{Comparison, FieldHeatmap, FieldRow, FieldSummary, Heatmap, HeatmapInput},
};
use rusqlite::{Connection, params};

use crate::Result;

/// Per-institution continuing enrolment in a field and year, with that
/// year's completions in the same field.
const FIELD_ROWS: &str = "
  SELECT i.id AS id, i.name AS name, e.enrolled AS enrolled, COALESCE(c.graduates, 0) AS graduates
  FROM (
    SELECT institution_id, MAX(headcount) AS enrolled FROM enrolments
    WHERE field_id = ?1 AND year = ?2 AND commencing = 0 AND headcount IS NOT NULL
    GROUP BY institution_id
  ) e
  JOIN institutions i ON i.id = e.institution_id
  LEFT JOIN (
    SELECT institution_id, SUM(headcount) AS graduates FROM completions
    WHERE field_id = ?1 AND year = ?2
    GROUP BY institution_id
  ) c ON c.institution_id = e.institution_id";

pub(super) fn field_rows(
  conn: &Connection,
  field: FieldOfEducation,
  year: i32,
) -> Result<Vec<FieldRow>> {
  let mut stmt = conn.prepare_cached(FIELD_ROWS)?;
  let rows = stmt
    .query_map(params![field.id(), year], |r| {
      Ok(FieldRow {
        id:        InstitutionId(r.get(0)?),
        name:      r.get(1)?,
        enrolled:  r.get(2)?,
        graduates: r.get(3)?,
      })
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(rows)
}

/// Attrition against graduation ratio for every institution teaching
/// `field`.
///
/// Attrition comes from the latest year with all-student rates published;
/// enrolment and completions from the latest year the field has enrolment
/// data. The two years are reported separately since they need not agree.
pub fn field_heatmap(conn: &Connection, field: FieldOfEducation) -> Result<FieldHeatmap> {
  let attrition_year: Option<i32> = conn.query_row(
    "SELECT MAX(year) FROM attrition_retention
     WHERE student_type = 'all' AND measure = 'attrition'",
    [],
    |r| r.get(0),
  )?;
  let enrolment_year: Option<i32> = conn.query_row(
    "SELECT MAX(year) FROM enrolments WHERE field_id = ?1 AND headcount IS NOT NULL",
    params![field.id()],
    |r| r.get(0),
  )?;

  let heatmap = match (attrition_year, enrolment_year) {
    (Some(attrition_year), Some(enrolment_year)) => {
      Heatmap::build(heatmap_inputs(conn, field, attrition_year, enrolment_year)?)
    }
    _ => Comparison::InsufficientData { available: 0 },
  };

  Ok(FieldHeatmap { field: FieldSummary::from(field), attrition_year, enrolment_year, heatmap })
}

fn heatmap_inputs(
  conn: &Connection,
  field: FieldOfEducation,
  attrition_year: i32,
  enrolment_year: i32,
) -> Result<Vec<HeatmapInput>> {
  let mut stmt = conn.prepare_cached(&format!(
    "SELECT f.id, f.name, i.state, a.rate, f.enrolled, f.graduates
     FROM ({FIELD_ROWS}) f
     JOIN institutions i ON i.id = f.id
     JOIN attrition_retention a
       ON a.institution_id = f.id AND a.year = ?3
      AND a.student_type = 'all' AND a.measure = 'attrition'"
  ))?;
  let rows = stmt
    .query_map(params![field.id(), enrolment_year, attrition_year], |r| {
      Ok(HeatmapInput {
        institution_id:   InstitutionId(r.get(0)?),
        institution_name: r.get(1)?,
        state:            r.get(2)?,
        attrition_rate:   r.get(3)?,
        enrolled:         r.get(4)?,
        completions:      r.get(5)?,
      })
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(rows)
}
