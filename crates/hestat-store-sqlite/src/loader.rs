//! The loader: one file, one transaction.
//!
//! Facts are upserted against each table's uniqueness key. A fact whose
//! institution or field does not exist raises
//! [`IntegrityViolation`](hestat_core::Error::IntegrityViolation) and the
//! whole file rolls back; the ingestion record is written in the same
//! transaction, even when no facts were produced.

use std::collections::HashSet;

use chrono::Utc;
use hestat_core::{
  Error as CoreError,
  fact::FactRow,
  institution::InstitutionId,
  source::{Classification, LoadReport, SourceFile, SupersedePolicy},
};
use hestat_sheets::{ParseOptions, Workbook, parse_workbook};
use rusqlite::{Connection, ErrorCode, params};

use crate::{
  Error, Result,
  encode::{encode_bool, encode_dt},
  resolver::{InstitutionResolver, Staging, institution_exists},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOptions {
  pub policy: SupersedePolicy,
  pub parse:  ParseOptions,
}

// ─── Entry points ────────────────────────────────────────────────────────────

/// Parse `workbook`, resolve its institutions and write its facts.
pub fn load_workbook(
  conn: &mut Connection,
  resolver: &InstitutionResolver,
  workbook: &Workbook,
  source: &SourceFile,
  classification: Classification,
  options: LoadOptions,
) -> Result<LoadReport> {
  let mut known = resolver.lock();
  let tx = conn.transaction()?;

  let mut report = LoadReport { filename: source.name.clone(), ..LoadReport::default() };
  let mut staging = Staging::new(&tx, &known);
  {
    let mut writer = FactWriter::new(&tx, source, classification, options.policy);
    let mut facts = parse_workbook(workbook, classification, &mut staging, options.parse);
    for parsed in facts.by_ref() {
      writer.write(&parsed?.fact)?;
    }
    let stats = facts.stats();
    report.rows_dropped = stats.rows_dropped;
    report.sheets_parsed = stats.sheets_parsed;
    report.sheets_skipped = stats.sheets_skipped;
    report.rows_written = writer.written;
    report.rows_kept = writer.kept;
  }
  let created = staging.created();
  let staged = staging.into_staged();

  record_ingestion(&tx, source, classification, report.rows_written + report.rows_kept)?;
  tx.commit()?;
  known.absorb(staged);

  tracing::info!(
    file = %source.name,
    section = %classification.section,
    variant = %classification.variant,
    year = ?classification.year,
    written = report.rows_written,
    kept = report.rows_kept,
    dropped = report.rows_dropped,
    institutions_created = created,
    "loaded file",
  );
  Ok(report)
}

/// Write already-resolved facts as one file.
pub fn load_facts(
  conn: &mut Connection,
  facts: &[FactRow],
  source: &SourceFile,
  classification: Classification,
  policy: SupersedePolicy,
) -> Result<LoadReport> {
  let tx = conn.transaction()?;
  let mut report = LoadReport { filename: source.name.clone(), ..LoadReport::default() };
  {
    let mut writer = FactWriter::new(&tx, source, classification, policy);
    for fact in facts {
      writer.write(fact)?;
    }
    report.rows_written = writer.written;
    report.rows_kept = writer.kept;
  }
  record_ingestion(&tx, source, classification, report.rows_written + report.rows_kept)?;
  tx.commit()?;
  Ok(report)
}

// ─── Upserts ─────────────────────────────────────────────────────────────────

/// `DO UPDATE` guard for the publication-year policy. A row written by a
/// file of unknown year is replaced by any dated file.
fn guard(policy: SupersedePolicy, table: &str) -> String {
  match policy {
    SupersedePolicy::IngestionOrder => String::new(),
    SupersedePolicy::PublicationYear => {
      format!(" WHERE COALESCE(excluded.source_year, 0) >= COALESCE({table}.source_year, 0)")
    }
  }
}

struct Statements {
  attrition:  String,
  completion: String,
  enrolment:  String,
  completed:  String,
  mix:        String,
  equity:     String,
  staff:      String,
}

impl Statements {
  fn new(policy: SupersedePolicy) -> Self {
    Self {
      attrition:  format!(
        "INSERT INTO attrition_retention
           (institution_id, year, student_type, measure, rate, source_file, source_year)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(institution_id, year, student_type, measure) DO UPDATE SET
           rate = excluded.rate,
           source_file = excluded.source_file,
           source_year = excluded.source_year{}",
        guard(policy, "attrition_retention"),
      ),
      completion: format!(
        "INSERT INTO completion_rates
           (institution_id, cohort_start, cohort_end, duration_years, completed_pct,
            still_enrolled_pct, dropped_out_pct, never_returned_pct, source_file, source_year)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(institution_id, cohort_start, duration_years) DO UPDATE SET
           cohort_end = excluded.cohort_end,
           completed_pct = excluded.completed_pct,
           still_enrolled_pct = excluded.still_enrolled_pct,
           dropped_out_pct = excluded.dropped_out_pct,
           never_returned_pct = excluded.never_returned_pct,
           source_file = excluded.source_file,
           source_year = excluded.source_year{}",
        guard(policy, "completion_rates"),
      ),
      // Headcount and load arrive from different publications; a missing
      // measure keeps the stored one.
      enrolment:  format!(
        "INSERT INTO enrolments
           (institution_id, year, field_id, course_level, student_type, commencing,
            headcount, eftsl, source_file, source_year)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(institution_id, year, field_id, course_level, student_type, commencing)
         DO UPDATE SET
           headcount = COALESCE(excluded.headcount, enrolments.headcount),
           eftsl = COALESCE(excluded.eftsl, enrolments.eftsl),
           source_file = excluded.source_file,
           source_year = excluded.source_year{}",
        guard(policy, "enrolments"),
      ),
      completed:  format!(
        "INSERT INTO completions
           (institution_id, year, field_id, course_level, headcount, source_file, source_year)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(institution_id, year, field_id, course_level) DO UPDATE SET
           headcount = excluded.headcount,
           source_file = excluded.source_file,
           source_year = excluded.source_year{}",
        guard(policy, "completions"),
      ),
      mix:        format!(
        "INSERT INTO course_level_mix
           (institution_id, year, measure, postgrad_research, postgrad_coursework,
            bachelor, sub_bachelor, total, source_file, source_year)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(institution_id, year, measure) DO UPDATE SET
           postgrad_research = excluded.postgrad_research,
           postgrad_coursework = excluded.postgrad_coursework,
           bachelor = excluded.bachelor,
           sub_bachelor = excluded.sub_bachelor,
           total = excluded.total,
           source_file = excluded.source_file,
           source_year = excluded.source_year{}",
        guard(policy, "course_level_mix"),
      ),
      equity:     format!(
        "INSERT INTO equity_performance
           (institution_id, year, measure, equity_group, rate, source_file, source_year)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(institution_id, year, measure, equity_group) DO UPDATE SET
           rate = excluded.rate,
           source_file = excluded.source_file,
           source_year = excluded.source_year{}",
        guard(policy, "equity_performance"),
      ),
      // Ratios and counts arrive from different sheets of one workbook.
      staff:      format!(
        "INSERT INTO student_staff_ratios
           (institution_id, year, academic_ratio, non_academic_ratio, eftsl,
            academic_fte, non_academic_fte, source_file, source_year)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(institution_id, year) DO UPDATE SET
           academic_ratio =
             COALESCE(excluded.academic_ratio, student_staff_ratios.academic_ratio),
           non_academic_ratio =
             COALESCE(excluded.non_academic_ratio, student_staff_ratios.non_academic_ratio),
           eftsl = COALESCE(excluded.eftsl, student_staff_ratios.eftsl),
           academic_fte = COALESCE(excluded.academic_fte, student_staff_ratios.academic_fte),
           non_academic_fte =
             COALESCE(excluded.non_academic_fte, student_staff_ratios.non_academic_fte),
           source_file = excluded.source_file,
           source_year = excluded.source_year{}",
        guard(policy, "student_staff_ratios"),
      ),
    }
  }
}

struct FactWriter<'a> {
  conn:        &'a Connection,
  sql:         Statements,
  source_file: String,
  source_year: Option<i32>,
  /// Institutions already checked in this file.
  verified:    HashSet<InstitutionId>,
  written:     u64,
  kept:        u64,
}

impl<'a> FactWriter<'a> {
  fn new(
    conn: &'a Connection,
    source: &SourceFile,
    classification: Classification,
    policy: SupersedePolicy,
  ) -> Self {
    Self {
      conn,
      sql: Statements::new(policy),
      source_file: source.name.clone(),
      source_year: classification.year,
      verified: HashSet::new(),
      written: 0,
      kept: 0,
    }
  }

  fn check(&mut self, fact: &FactRow) -> Result<()> {
    let id = fact.institution_id();
    if !self.verified.contains(&id) {
      if !institution_exists(self.conn, id)? {
        let message = format!("{} row for unknown institution {id}", fact.table());
        return Err(CoreError::IntegrityViolation(message).into());
      }
      self.verified.insert(id);
    }
    if let Some(field) = fact.field() {
      let known: bool = self.conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM fields_of_education WHERE id = ?1)",
        params![field.id()],
        |r| r.get(0),
      )?;
      if !known {
        let message = format!("unknown field of education {}", field.id());
        return Err(CoreError::IntegrityViolation(message).into());
      }
    }
    Ok(())
  }

  fn write(&mut self, fact: &FactRow) -> Result<()> {
    self.check(fact)?;
    let file = &self.source_file;
    let year = self.source_year;

    let changed = match fact {
      FactRow::Attrition(f) => self.conn.prepare_cached(&self.sql.attrition)?.execute(params![
        f.institution_id.0,
        f.year,
        f.student_type.as_ref(),
        f.measure.as_ref(),
        f.rate,
        file,
        year,
      ]),
      FactRow::CompletionRate(f) => self.conn.prepare_cached(&self.sql.completion)?.execute(params![
        f.institution_id.0,
        f.cohort_start,
        f.cohort_end,
        f.duration_years,
        f.completed_pct,
        f.still_enrolled_pct,
        f.dropped_out_pct,
        f.never_returned_pct,
        file,
        year,
      ]),
      FactRow::Enrolment(f) => self.conn.prepare_cached(&self.sql.enrolment)?.execute(params![
        f.institution_id.0,
        f.year,
        f.field.id(),
        f.course_level.as_ref(),
        f.student_type.as_ref(),
        encode_bool(f.commencing),
        f.headcount,
        f.eftsl,
        file,
        year,
      ]),
      FactRow::Completion(f) => self.conn.prepare_cached(&self.sql.completed)?.execute(params![
        f.institution_id.0,
        f.year,
        f.field.id(),
        f.course_level.as_ref(),
        f.headcount,
        file,
        year,
      ]),
      FactRow::CourseLevelMix(f) => self.conn.prepare_cached(&self.sql.mix)?.execute(params![
        f.institution_id.0,
        f.year,
        f.measure.as_ref(),
        f.postgrad_research,
        f.postgrad_coursework,
        f.bachelor,
        f.sub_bachelor,
        f.total,
        file,
        year,
      ]),
      FactRow::Equity(f) => self.conn.prepare_cached(&self.sql.equity)?.execute(params![
        f.institution_id.0,
        f.year,
        f.measure.as_ref(),
        f.group.as_ref(),
        f.rate,
        file,
        year,
      ]),
      FactRow::StaffRatio(f) => self.conn.prepare_cached(&self.sql.staff)?.execute(params![
        f.institution_id.0,
        f.year,
        f.academic_ratio,
        f.non_academic_ratio,
        f.eftsl,
        f.academic_fte,
        f.non_academic_fte,
        file,
        year,
      ]),
    }
    .map_err(integrity)?;

    if changed == 0 {
      self.kept += 1;
    } else {
      self.written += 1;
    }
    Ok(())
  }
}

/// Constraint failures become integrity violations; anything else stays a
/// database error.
fn integrity(e: rusqlite::Error) -> Error {
  match e.sqlite_error_code() {
    Some(ErrorCode::ConstraintViolation) => CoreError::IntegrityViolation(e.to_string()).into(),
    _ => e.into(),
  }
}

fn record_ingestion(
  conn: &Connection,
  source: &SourceFile,
  classification: Classification,
  row_count: u64,
) -> Result<()> {
  let path = source.path.as_ref().map(|p| p.display().to_string());
  conn.execute(
    "INSERT INTO ingested_files
       (filename, file_path, section, variant, data_year, row_count, content_sha256, ingested_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
     ON CONFLICT(filename) DO UPDATE SET
       file_path = excluded.file_path,
       section = excluded.section,
       variant = excluded.variant,
       data_year = excluded.data_year,
       row_count = excluded.row_count,
       content_sha256 = excluded.content_sha256,
       ingested_at = excluded.ingested_at",
    params![
      source.name,
      path,
      classification.section.as_ref(),
      classification.variant.as_ref(),
      classification.year,
      i64::try_from(row_count).unwrap_or(i64::MAX),
      source.digest,
      encode_dt(Utc::now()),
    ],
  )?;
  Ok(())
}
