//! The per-institution report card.

use hestat_core::{
  fact::{MixMeasure, RateMeasure, StaffRatioFact, StudentType},
  field::FieldOfEducation,
  institution::InstitutionId,
  report::{
    AttritionRisk, AttritionStanding, AttritionTrend, BenchmarkedRate, CompletionProbability,
    CompletionTimeline, CourseLevelReport, FieldContext, FieldRanking, FieldSummary,
    InstitutionReport, InternationalBlock, LevelBreakdown, LevelEfficiency, LevelShares,
    StaffRatio, TimelineEntry, YearPoint, YearRate, YearValue,
  },
  stats,
};
use rusqlite::{Connection, OptionalExtension as _, params};

use super::{institution, national_avg, rate_series, year_population};
use crate::Result;

pub fn institution_report(
  conn: &Connection,
  id: InstitutionId,
  field: Option<FieldOfEducation>,
) -> Result<Option<InstitutionReport>> {
  let Some(institution) = institution(conn, id)? else {
    return Ok(None);
  };

  let domestic_attrition = rate_series(conn, id, StudentType::Domestic, RateMeasure::Attrition)?;

  Ok(Some(InstitutionReport {
    institution,
    field: field.map(FieldSummary::from),
    completion: completion_probability(conn, id)?,
    attrition: attrition_risk(conn, &domestic_attrition)?,
    retention: latest_rate(conn, id, StudentType::Domestic, RateMeasure::Retention)?,
    success: latest_rate(conn, id, StudentType::Domestic, RateMeasure::Success)?,
    trend: AttritionTrend::from_series(&domestic_attrition),
    completion_timeline: completion_timeline(conn, id)?,
    field_context: field.map(|f| field_context(conn, id, f)).transpose()?,
    international: international(conn, id)?,
    course_level: course_level(conn, id)?,
    staff_ratio: staff_ratio(conn, id)?,
  }))
}

// ─── Attrition ───────────────────────────────────────────────────────────────

fn attrition_risk(conn: &Connection, series: &[(i32, f64)]) -> Result<AttritionRisk> {
  let Some(&(year, rate)) = series.last() else {
    return Ok(AttritionRisk::default());
  };
  let population = year_population(conn, year, StudentType::Domestic, RateMeasure::Attrition)?;
  Ok(AttritionRisk {
    latest_rate:  Some(stats::round_to(rate, 2)),
    latest_year:  Some(year),
    national_avg: national_avg(&population),
    standing:     Some(AttritionStanding::compute(rate, &population)),
  })
}

fn latest_rate(
  conn: &Connection,
  id: InstitutionId,
  student_type: StudentType,
  measure: RateMeasure,
) -> Result<YearRate> {
  let latest = rate_series(conn, id, student_type, measure)?.last().copied();
  Ok(YearRate {
    rate: latest.map(|(_, r)| stats::round_to(r, 2)),
    year: latest.map(|(y, _)| y),
  })
}

fn benchmarked(
  conn: &Connection,
  id: InstitutionId,
  student_type: StudentType,
  measure: RateMeasure,
) -> Result<BenchmarkedRate> {
  let Some((year, rate)) = rate_series(conn, id, student_type, measure)?.last().copied() else {
    return Ok(BenchmarkedRate::default());
  };
  let population = year_population(conn, year, student_type, measure)?;
  Ok(BenchmarkedRate {
    rate:         Some(stats::round_to(rate, 2)),
    year:         Some(year),
    national_avg: national_avg(&population),
  })
}

/// Overseas-student rates; `None` when the institution reports none.
fn international(conn: &Connection, id: InstitutionId) -> Result<Option<InternationalBlock>> {
  let attrition = benchmarked(conn, id, StudentType::Overseas, RateMeasure::Attrition)?;
  let retention = benchmarked(conn, id, StudentType::Overseas, RateMeasure::Retention)?;
  let success = benchmarked(conn, id, StudentType::Overseas, RateMeasure::Success)?;
  if attrition.rate.is_none() && retention.rate.is_none() && success.rate.is_none() {
    return Ok(None);
  }

  let series = rate_series(conn, id, StudentType::Overseas, RateMeasure::Attrition)?;
  let trend = series[series.len().saturating_sub(stats::TREND_WINDOW)..]
    .iter()
    .map(|&(year, rate)| YearPoint { year, rate: stats::round_to(rate, 2) })
    .collect();

  Ok(Some(InternationalBlock { attrition, retention, success, trend }))
}

// ─── Completion ──────────────────────────────────────────────────────────────

struct Cohort {
  start:          i32,
  end:            i32,
  completed:      f64,
  still_enrolled: Option<f64>,
  dropped_out:    Option<f64>,
  never_returned: Option<f64>,
}

impl Cohort {
  fn period(&self) -> String { format!("{}-{}", self.start, self.end) }
}

/// The institution's most recent cohort of a duration with a completion
/// rate.
fn latest_cohort(conn: &Connection, id: InstitutionId, duration: u8) -> Result<Option<Cohort>> {
  Ok(
    conn
      .query_row(
        "SELECT cohort_start, cohort_end, completed_pct, still_enrolled_pct,
                dropped_out_pct, never_returned_pct
         FROM completion_rates
         WHERE institution_id = ?1 AND duration_years = ?2 AND completed_pct IS NOT NULL
         ORDER BY cohort_start DESC LIMIT 1",
        params![id.0, duration],
        |r| {
          Ok(Cohort {
            start:          r.get(0)?,
            end:            r.get(1)?,
            completed:      r.get(2)?,
            still_enrolled: r.get(3)?,
            dropped_out:    r.get(4)?,
            never_returned: r.get(5)?,
          })
        },
      )
      .optional()?,
  )
}

/// Mean completion rate of a duration's cohort starting in `start`, or of
/// the latest cohort nationally when `start` is `None`.
fn cohort_avg(conn: &Connection, duration: u8, start: Option<i32>) -> Result<Option<f64>> {
  let avg: Option<f64> = conn.query_row(
    "SELECT AVG(completed_pct) FROM completion_rates
     WHERE duration_years = ?1 AND completed_pct IS NOT NULL
       AND cohort_start = COALESCE(?2, (
         SELECT MAX(cohort_start) FROM completion_rates
         WHERE duration_years = ?1 AND completed_pct IS NOT NULL
       ))",
    params![duration, start],
    |r| r.get(0),
  )?;
  Ok(avg.map(|a| stats::round_to(a, 1)))
}

fn completion_probability(conn: &Connection, id: InstitutionId) -> Result<CompletionProbability> {
  let four = latest_cohort(conn, id, 4)?;
  let six = latest_cohort(conn, id, 6)?;
  let nine = latest_cohort(conn, id, 9)?;
  let pct = |c: &Option<Cohort>| c.as_ref().map(|c| stats::round_to(c.completed, 1));
  let part = |f: fn(&Cohort) -> Option<f64>| {
    four.as_ref().and_then(f).map(|v| stats::round_to(v, 1))
  };

  let national_avg_four_year = match cohort_avg(conn, 4, four.as_ref().map(|c| c.start))? {
    Some(avg) => Some(avg),
    None => cohort_avg(conn, 4, None)?,
  };

  Ok(CompletionProbability {
    four_year_pct: pct(&four),
    six_year_pct: pct(&six),
    nine_year_pct: pct(&nine),
    national_avg_four_year,
    cohort_period: four.as_ref().map(Cohort::period),
    still_enrolled_pct: part(|c| c.still_enrolled),
    dropped_out_pct: part(|c| c.dropped_out),
    never_returned_pct: part(|c| c.never_returned),
  })
}

fn completion_timeline(conn: &Connection, id: InstitutionId) -> Result<CompletionTimeline> {
  let entry = |duration: u8| -> Result<TimelineEntry> {
    Ok(match latest_cohort(conn, id, duration)? {
      Some(c) => TimelineEntry {
        pct:          Some(stats::round_to(c.completed, 1)),
        period:       Some(c.period()),
        national_avg: cohort_avg(conn, duration, None)?,
      },
      None => TimelineEntry::default(),
    })
  };
  Ok(CompletionTimeline {
    four_year: entry(4)?,
    six_year:  entry(6)?,
    nine_year: entry(9)?,
  })
}

// ─── Field context ───────────────────────────────────────────────────────────

/// Largest continuing headcount per field, summed over fields.
const TOTAL_ENROLMENT: &str = "
  SELECT SUM(hc) FROM (
    SELECT MAX(headcount) AS hc FROM enrolments
    WHERE institution_id = ?1 AND year = ?2 AND commencing = 0 AND headcount IS NOT NULL
    GROUP BY field_id
  )";

fn field_context(
  conn: &Connection,
  id: InstitutionId,
  field: FieldOfEducation,
) -> Result<FieldContext> {
  let year: Option<i32> = conn.query_row(
    "SELECT MAX(year) FROM enrolments WHERE institution_id = ?1 AND headcount IS NOT NULL",
    params![id.0],
    |r| r.get(0),
  )?;
  let Some(year) = year else {
    return Ok(FieldContext::default());
  };
  let field_id = field.id();

  let enrolment: Option<i64> = conn.query_row(
    "SELECT MAX(headcount) FROM enrolments
     WHERE institution_id = ?1 AND field_id = ?2 AND year = ?3
       AND commencing = 0 AND headcount IS NOT NULL",
    params![id.0, field_id, year],
    |r| r.get(0),
  )?;
  let total_enrolment: Option<i64> =
    conn.query_row(TOTAL_ENROLMENT, params![id.0, year], |r| r.get(0))?;
  let completions: Option<i64> = conn.query_row(
    "SELECT SUM(headcount) FROM completions
     WHERE institution_id = ?1 AND field_id = ?2 AND year = ?3",
    params![id.0, field_id, year],
    |r| r.get(0),
  )?;
  let total_completions: Option<i64> = conn.query_row(
    "SELECT SUM(headcount) FROM completions WHERE institution_id = ?1 AND year = ?2",
    params![id.0, year],
    |r| r.get(0),
  )?;

  let share = match (enrolment, total_enrolment) {
    (Some(e), Some(t)) if t > 0 => Some(stats::round_to(e as f64 / t as f64 * 100.0, 1)),
    _ => None,
  };
  let completion_ratio = enrolment
    .and_then(|e| stats::graduation_ratio(completions.unwrap_or(0), e))
    .map(|r| stats::round_to(r, 1));

  let enrolment_trend = year_values(
    conn,
    "SELECT year, MAX(headcount) FROM enrolments
     WHERE institution_id = ?1 AND field_id = ?2 AND commencing = 0 AND headcount IS NOT NULL
     GROUP BY year ORDER BY year",
    id,
    field_id,
  )?;
  let completions_trend = year_values(
    conn,
    "SELECT year, SUM(headcount) FROM completions
     WHERE institution_id = ?1 AND field_id = ?2
     GROUP BY year ORDER BY year",
    id,
    field_id,
  )?;

  let rows = super::field::field_rows(conn, field, year)?;
  Ok(FieldContext {
    year: Some(year),
    enrolment,
    total_enrolment,
    field_share_pct: share,
    completions,
    total_completions,
    completion_ratio,
    enrolment_trend,
    completions_trend,
    ranking: Some(FieldRanking::rank(rows, id)),
  })
}

fn year_values(
  conn: &Connection,
  sql: &str,
  id: InstitutionId,
  field_id: i64,
) -> Result<Vec<YearValue>> {
  let mut stmt = conn.prepare_cached(sql)?;
  let rows = stmt
    .query_map(params![id.0, field_id], |r| Ok(YearValue { year: r.get(0)?, value: r.get(1)? }))?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(rows)
}

// ─── Student-staff ratio ─────────────────────────────────────────────────────

fn staff_ratio(conn: &Connection, id: InstitutionId) -> Result<Option<StaffRatio>> {
  let mut stmt = conn.prepare_cached(
    "SELECT year, academic_ratio, non_academic_ratio, eftsl, academic_fte, non_academic_fte
     FROM student_staff_ratios
     WHERE institution_id = ?1
     ORDER BY year",
  )?;
  let series = stmt
    .query_map(params![id.0], |r| {
      Ok(StaffRatioFact {
        institution_id:     id,
        year:               r.get(0)?,
        academic_ratio:     r.get(1)?,
        non_academic_ratio: r.get(2)?,
        eftsl:              r.get(3)?,
        academic_fte:       r.get(4)?,
        non_academic_fte:   r.get(5)?,
      })
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  let Some(year) = series.iter().rev().find(|f| f.academic_ratio.is_some()).map(|f| f.year) else {
    return Ok(None);
  };

  let mut stmt = conn.prepare_cached(
    "SELECT academic_ratio, non_academic_ratio FROM student_staff_ratios
     WHERE year = ?1 AND academic_ratio IS NOT NULL",
  )?;
  let peers = stmt
    .query_map(params![year], |r| Ok((r.get(0)?, r.get(1)?)))?
    .collect::<rusqlite::Result<Vec<(f64, Option<f64>)>>>()?;
  Ok(StaffRatio::build(&series, &peers))
}

// ─── Course level mix ────────────────────────────────────────────────────────

fn latest_mix(
  conn: &Connection,
  id: InstitutionId,
  measure: MixMeasure,
) -> Result<Option<LevelBreakdown>> {
  let row = conn
    .query_row(
      "SELECT year, postgrad_research, postgrad_coursework, bachelor, sub_bachelor, total
       FROM course_level_mix
       WHERE institution_id = ?1 AND measure = ?2
       ORDER BY year DESC LIMIT 1",
      params![id.0, measure.as_ref()],
      |r| {
        Ok((
          r.get::<_, i32>(0)?,
          [r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?],
          r.get::<_, Option<i64>>(5)?,
        ))
      },
    )
    .optional()?;
  Ok(row.and_then(|(year, counts, total)| LevelBreakdown::new(year, counts, total)))
}

/// Shares of the national enrolment mix in the latest year published.
fn national_mix(conn: &Connection) -> Result<Option<LevelShares>> {
  let sums: [Option<i64>; 4] = conn.query_row(
    "SELECT SUM(postgrad_research), SUM(postgrad_coursework), SUM(bachelor), SUM(sub_bachelor)
     FROM course_level_mix
     WHERE measure = 'enrolment'
       AND year = (SELECT MAX(year) FROM course_level_mix WHERE measure = 'enrolment')",
    [],
    |r| Ok([r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?]),
  )?;
  Ok(LevelShares::from_counts(sums.map(|s| s.unwrap_or(0))))
}

fn course_level(conn: &Connection, id: InstitutionId) -> Result<Option<CourseLevelReport>> {
  let any: bool = conn.query_row(
    "SELECT EXISTS (SELECT 1 FROM course_level_mix WHERE institution_id = ?1)",
    params![id.0],
    |r| r.get(0),
  )?;
  if !any {
    return Ok(None);
  }

  let enrolment = latest_mix(conn, id, MixMeasure::Enrolment)?;
  let completion = latest_mix(conn, id, MixMeasure::Completion)?;
  let efficiency = match (&enrolment, &completion) {
    (Some(e), Some(c)) => Some(LevelEfficiency::between(e, c)),
    _ => None,
  };
  Ok(Some(CourseLevelReport {
    enrolment,
    completion,
    national_avg_enrolment: national_mix(conn)?,
    efficiency,
  }))
}
