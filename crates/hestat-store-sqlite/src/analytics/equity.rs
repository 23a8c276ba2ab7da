use std::collections::BTreeMap;

use hestat_core::{
  fact::{EquityGroup, EquityMeasure},
  institution::InstitutionId,
  report::{
    EquityGroupReport, EquityMeasures, EquityReport, EquityTrendPoint, GapRate, SupportSummary,
  },
  stats,
};
use rusqlite::{Connection, OptionalExtension as _, params};

use super::institution;
use crate::{Result, encode::decode_enum};

/// Equity-group performance against the national average of each group.
///
/// `None` when the institution is unknown or has published no equity data.
pub fn equity_report(conn: &Connection, id: InstitutionId) -> Result<Option<EquityReport>> {
  let Some(institution) = institution(conn, id)? else {
    return Ok(None);
  };
  let latest_year = latest_years(conn, id)?;
  if latest_year.is_empty() {
    return Ok(None);
  }

  let all_domestic = measures(conn, id, EquityGroup::AllDomestic, &latest_year)?;
  let mut groups = BTreeMap::new();
  for group in EquityGroup::SCORED {
    groups.insert(group, EquityGroupReport {
      label:    group.label(),
      measures: measures(conn, id, group, &latest_year)?,
      trend:    retention_trend(conn, id, group)?,
    });
  }
  let support_summary =
    SupportSummary::from_retention_gaps(groups.values().map(|g| g.measures.retention.gap));

  Ok(Some(EquityReport { institution, latest_year, groups, all_domestic, support_summary }))
}

/// Most recent year the institution published each measure.
fn latest_years(conn: &Connection, id: InstitutionId) -> Result<BTreeMap<EquityMeasure, i32>> {
  let mut stmt = conn.prepare_cached(
    "SELECT measure, MAX(year) FROM equity_performance
     WHERE institution_id = ?1 GROUP BY measure",
  )?;
  let rows = stmt
    .query_map(params![id.0], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i32>(1)?)))?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  rows
    .into_iter()
    .map(|(measure, year)| Ok((decode_enum("measure", &measure)?, year)))
    .collect()
}

fn measures(
  conn: &Connection,
  id: InstitutionId,
  group: EquityGroup,
  latest_year: &BTreeMap<EquityMeasure, i32>,
) -> Result<EquityMeasures> {
  let mut out = EquityMeasures::default();
  for (&measure, &year) in latest_year {
    let rate: Option<f64> = conn
      .query_row(
        "SELECT rate FROM equity_performance
         WHERE institution_id = ?1 AND year = ?2 AND measure = ?3 AND equity_group = ?4",
        params![id.0, year, measure.as_ref(), group.as_ref()],
        |r| r.get(0),
      )
      .optional()?;
    let avg: Option<f64> = conn.query_row(
      "SELECT AVG(rate) FROM equity_performance
       WHERE year = ?1 AND measure = ?2 AND equity_group = ?3",
      params![year, measure.as_ref(), group.as_ref()],
      |r| r.get(0),
    )?;
    *out.get_mut(measure) = GapRate::new(rate, avg);
  }
  Ok(out)
}

fn retention_trend(
  conn: &Connection,
  id: InstitutionId,
  group: EquityGroup,
) -> Result<Vec<EquityTrendPoint>> {
  let mut stmt = conn.prepare_cached(
    "SELECT year, rate FROM equity_performance
     WHERE institution_id = ?1 AND measure = 'retention' AND equity_group = ?2
     ORDER BY year DESC LIMIT ?3",
  )?;
  let mut points = stmt
    .query_map(params![id.0, group.as_ref(), stats::TREND_WINDOW as i64], |r| {
      Ok(EquityTrendPoint { year: r.get(0)?, retention: stats::round_to(r.get(1)?, 2) })
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  points.reverse();
  Ok(points)
}
