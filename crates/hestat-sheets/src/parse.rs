//! Sheet parsing: workbook + classification → lazy stream of facts.
//!
//! [`FactRows`] walks the workbook one sheet and one row at a time. Each
//! sheet is first planned (which table it holds, where its header is);
//! sheets without a recognisable table are skipped. Rows that cannot be
//! used (a value cell with stray text, an institution nobody can resolve)
//! are logged, counted and dropped; only errors that threaten the whole
//! file are yielded to the caller.

use std::collections::VecDeque;

use hestat_core::{
  Error, Result,
  fact::{
    AttritionFact, CompletionFact, CompletionRateFact, CourseLevel, CourseLevelMixFact,
    EnrolmentFact, EquityFact, FactRow, MixMeasure, ParsedFact, Provenance, RateMeasure,
    StaffRatioFact, StudentType,
  },
  institution::{InstitutionId, extract_code, is_aggregate_label, provider_group},
  resolve::{InstitutionHint, ResolveInstitution},
  source::{Classification, Section, Variant},
};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::{
  header::{
    self, ColumnRole, DEFAULT_SCAN_ROWS, EquityPlan, HeaderKind, HeaderPlan, PIVOT_SCAN_ROWS,
    StaffBlock, StaffPlan,
  },
  workbook::{Cell, Sheet, Workbook},
};

/// Cell texts that mean "not available".
const SUPPRESSION_MARKERS: [&str; 11] =
  ["np", "na", "n/a", "-", "..", "...", "<5", "< 5", "n.p.", "n.a.", "n.a"];

/// The row label of institution rows in equity tables.
const EQUITY_INSTITUTION_GROUP: &str = "higher education institution";

static EQUITY_SHEET_RE: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"^(16\.\d+|\d{1,2})$").expect("valid equity sheet regex"));

// ─── Options and counters ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseOptions {
  /// Rows scanned for a header row (pivot sheets scan at least
  /// [`PIVOT_SCAN_ROWS`]).
  pub header_scan_rows: usize,
}

impl Default for ParseOptions {
  fn default() -> Self { Self { header_scan_rows: DEFAULT_SCAN_ROWS } }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseStats {
  pub facts:          u64,
  pub rows_dropped:   u64,
  pub sheets_parsed:  u64,
  pub sheets_skipped: u64,
}

// ─── Cell values ─────────────────────────────────────────────────────────────

/// Numeric content of a value cell.
///
/// `Ok(None)` for empty cells and suppression markers; `Err` carries the
/// offending text.
pub fn cell_value(cell: &Cell) -> Result<Option<f64>, String> {
  match cell {
    Cell::Empty => Ok(None),
    Cell::Number(n) if n.is_finite() => Ok(Some(*n)),
    Cell::Number(n) => Err(n.to_string()),
    Cell::Text(raw) => {
      let text = raw.trim().replace(',', "");
      let lower = text.to_lowercase();
      if lower.is_empty() || SUPPRESSION_MARKERS.contains(&lower.as_str()) {
        return Ok(None);
      }
      lower.parse::<f64>().map(Some).map_err(|_| raw.trim().to_string())
    }
  }
}

/// Study duration in years from a Section 17 duration cell.
pub fn parse_duration(cell: &Cell) -> Option<u8> {
  let text = cell.display().to_lowercase();
  if text.contains("four") || text.contains('4') {
    Some(4)
  } else if text.contains("six") || text.contains('6') {
    Some(6)
  } else if text.contains("nine") || text.contains('9') {
    Some(9)
  } else {
    None
  }
}

// ─── Sheet plans ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldTarget {
  Enrolment { student_type: StudentType, commencing: bool, load: bool },
  Completion,
}

/// The two tables of a staff-ratio workbook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StaffTable {
  /// Students per staff FTE.
  Ratios,
  /// Student load and staff FTE.
  Counts,
}

#[derive(Debug, Clone, PartialEq)]
enum Plan {
  Rates { measure: RateMeasure, student_type: StudentType, header: HeaderPlan },
  Outcomes(HeaderPlan),
  Cohort { duration: u8, header: HeaderPlan },
  Fields { year: i32, target: FieldTarget, header: HeaderPlan },
  Levels { year: i32, measure: MixMeasure, header: HeaderPlan },
  Equity(EquityPlan),
  Staff { table: StaffTable, plan: StaffPlan },
}

impl Plan {
  fn data_start(&self) -> usize {
    match self {
      Self::Rates { header, .. }
      | Self::Outcomes(header)
      | Self::Cohort { header, .. }
      | Self::Fields { header, .. }
      | Self::Levels { header, .. } => header.data_start,
      Self::Equity(plan) => plan.data_start,
      Self::Staff { plan, .. } => plan.header.data_start,
    }
  }
}

fn rate_measure(title: &str) -> Option<RateMeasure> {
  [
    ("attrition", RateMeasure::Attrition),
    ("retention", RateMeasure::Retention),
    ("success", RateMeasure::Success),
  ]
  .into_iter()
  .find(|(k, _)| title.contains(k))
  .map(|(_, m)| m)
}

fn title_student_type(title: &str) -> Option<StudentType> {
  if title.contains("domestic") {
    Some(StudentType::Domestic)
  } else if title.contains("overseas") {
    Some(StudentType::Overseas)
  } else if title.contains("all ") || title.contains("all commencing") {
    Some(StudentType::All)
  } else {
    None
  }
}

/// Decide what table `sheet` holds. `Err` carries the reason it is skipped.
fn plan_sheet(
  sheet: &Sheet,
  classification: &Classification,
  options: &ParseOptions,
) -> Result<Plan, &'static str> {
  let name = sheet.name.trim();
  let lower = name.to_lowercase();
  if matches!(lower.as_str(), "contents" | "explanatory notes" | "notes") {
    return Err("front matter");
  }
  let scan = options.header_scan_rows;

  match (classification.section, classification.variant) {
    (Section::AttritionRetention, _) => {
      let title = sheet.title(3, 20).ok_or("no title")?;
      let measure = rate_measure(&title).ok_or("title names no measure")?;
      let student_type = title_student_type(&title).ok_or("title names no student type")?;
      let header = header::locate(sheet, HeaderKind::Years, scan).ok_or("no year header")?;
      Ok(Plan::Rates { measure, student_type, header })
    }

    (Section::CompletionRates, Variant::Cohort) => {
      let duration = match name {
        "T4" => 9,
        "T5" => 6,
        "T6" => 4,
        _ => return Err("not an institution cohort table"),
      };
      let header =
        header::locate(sheet, HeaderKind::Timeframes, scan).ok_or("no time-frame header")?;
      Ok(Plan::Cohort { duration, header })
    }

    (Section::CompletionRates, _) => {
      let header = header::locate(sheet, HeaderKind::Outcomes, scan).ok_or("no outcome header")?;
      Ok(Plan::Outcomes(header))
    }

    (Section::Enrolments | Section::Completions, Variant::Pivot | Variant::Load) => {
      if !lower.contains("bfoe") {
        return Err("not a field pivot");
      }
      let header = header::locate(sheet, HeaderKind::Fields, scan.max(PIVOT_SCAN_ROWS))
        .ok_or("no field header")?;
      let year = header::pivot_year(sheet, header.header_row)
        .or(classification.year)
        .ok_or("no data year")?;
      let target = match classification.section {
        Section::Completions => FieldTarget::Completion,
        _ => FieldTarget::Enrolment {
          student_type: StudentType::All,
          commencing:   false,
          load:         classification.variant == Variant::Load,
        },
      };
      Ok(Plan::Fields { year, target, header })
    }

    (Section::Enrolments | Section::Completions, _) => {
      let year = classification.year.ok_or("no data year")?;

      if sheet.head_mentions(4, "broad level of course") {
        let header = header::locate(sheet, HeaderKind::Levels, scan).ok_or("no level header")?;
        let measure = match classification.section {
          Section::Completions => MixMeasure::Completion,
          _ => MixMeasure::Enrolment,
        };
        return Ok(Plan::Levels { year, measure, header });
      }

      let named = matches!(name, "2.10" | "2.11" | "1.9" | "1.10");
      if !named && !sheet.head_mentions(3, "field of education") {
        return Err("not a field-of-education table");
      }
      let header = header::locate(sheet, HeaderKind::Fields, scan).ok_or("no field header")?;
      let target = match classification.section {
        Section::Completions => FieldTarget::Completion,
        _ => FieldTarget::Enrolment {
          student_type: match sheet.title(3, 0) {
            Some(t) if t.contains("domestic") => StudentType::Domestic,
            _ => StudentType::All,
          },
          commencing:   classification.variant == Variant::Commencing,
          load:         false,
        },
      };
      Ok(Plan::Fields { year, target, header })
    }

    (Section::Equity, _) => {
      if !EQUITY_SHEET_RE.is_match(name) {
        return Err("not a numbered equity table");
      }
      header::locate_equity(sheet).map(Plan::Equity).ok_or("no equity rate table")
    }

    (Section::StaffRatios, _) => {
      let title = sheet.title(4, 10).unwrap_or_default();
      let table = match name {
        "A2.1" => StaffTable::Ratios,
        "A2.2" => StaffTable::Counts,
        _ if title.contains("ratio") => StaffTable::Ratios,
        _ if title.contains("fte") || title.contains("eftsl") => StaffTable::Counts,
        _ => return Err("not a staff ratio table"),
      };
      let plan = header::locate_staff(sheet, scan).ok_or("no staff block header")?;
      Ok(Plan::Staff { table, plan })
    }
  }
}

// ─── Iterator ────────────────────────────────────────────────────────────────

/// State carried from one row to the next within a sheet.
#[derive(Debug, Default)]
struct Carry {
  state:    Option<String>,
  provider: Option<&'static str>,
  /// Row-group label in column 0 of equity tables.
  group:    Option<String>,
}

struct Cursor<'w> {
  sheet: &'w Sheet,
  plan:  Plan,
  row:   usize,
  carry: Carry,
}

/// Lazy iterator over the facts of one workbook.
///
/// Created by [`parse_workbook`]. Dropping it early leaves the workbook
/// untouched, so parsing can simply be restarted.
pub struct FactRows<'w, R> {
  workbook:       &'w Workbook,
  classification: Classification,
  options:        ParseOptions,
  resolver:       R,
  next_sheet:     usize,
  cursor:         Option<Cursor<'w>>,
  pending:        VecDeque<ParsedFact>,
  stats:          ParseStats,
}

/// Parse every sheet of `workbook` as a file of the given classification,
/// resolving institution cells through `resolver`.
pub fn parse_workbook<R: ResolveInstitution>(
  workbook: &Workbook,
  classification: Classification,
  resolver: R,
  options: ParseOptions,
) -> FactRows<'_, R> {
  FactRows {
    workbook,
    classification,
    options,
    resolver,
    next_sheet: 0,
    cursor: None,
    pending: VecDeque::new(),
    stats: ParseStats::default(),
  }
}

impl<R> FactRows<'_, R> {
  /// Counters so far; complete once the iterator is exhausted.
  pub fn stats(&self) -> ParseStats { self.stats }

  pub fn into_resolver(self) -> R { self.resolver }
}

impl<R: ResolveInstitution> Iterator for FactRows<'_, R> {
  type Item = Result<ParsedFact>;

  fn next(&mut self) -> Option<Self::Item> {
    loop {
      if let Some(fact) = self.pending.pop_front() {
        self.stats.facts += 1;
        return Some(Ok(fact));
      }

      if self.cursor.is_none() {
        let sheet = self.workbook.sheets.get(self.next_sheet)?;
        self.next_sheet += 1;
        match plan_sheet(sheet, &self.classification, &self.options) {
          Ok(plan) => {
            tracing::debug!(sheet = %sheet.name, ?plan, "parsing sheet");
            self.stats.sheets_parsed += 1;
            let row = plan.data_start();
            self.cursor = Some(Cursor { sheet, plan, row, carry: Carry::default() });
          }
          Err(reason) => {
            tracing::debug!(sheet = %sheet.name, reason, "skipping sheet");
            self.stats.sheets_skipped += 1;
          }
        }
        continue;
      }

      let Some(cursor) = self.cursor.as_mut() else { continue };
      if cursor.row >= cursor.sheet.height() {
        self.cursor = None;
        continue;
      }
      let row = cursor.row;
      cursor.row += 1;

      let Cursor { sheet, plan, row: next_row, carry } = cursor;
      let sheet = *sheet;
      let mut rows = RowReader {
        sheet,
        row,
        carry,
        resolver: &mut self.resolver,
        classification: &self.classification,
      };
      let result = match plan {
        Plan::Equity(plan) => rows.equity(plan, next_row),
        plan => rows.institution_row(plan),
      };

      match result {
        Ok(facts) => self.pending.extend(facts),
        Err(e) if e.is_row_recoverable() => {
          tracing::warn!(sheet = %sheet.name, row, error = %e, "dropping row");
          self.stats.rows_dropped += 1;
        }
        Err(e) => return Some(Err(e)),
      }
    }
  }
}

// ─── Rows ────────────────────────────────────────────────────────────────────

struct RowReader<'a, R> {
  sheet:          &'a Sheet,
  row:            usize,
  carry:          &'a mut Carry,
  resolver:       &'a mut R,
  classification: &'a Classification,
}

impl<'a, R: ResolveInstitution> RowReader<'a, R> {
  fn cell(&self, col: usize) -> &'a Cell { self.sheet.cell(self.row, col) }

  fn malformed(&self, reason: impl Into<String>) -> Error {
    Error::MalformedRow {
      sheet:  self.sheet.name.clone(),
      row:    self.row,
      reason: reason.into(),
    }
  }

  fn value(&self, col: usize) -> Result<Option<f64>> {
    cell_value(self.cell(col))
      .map_err(|text| self.malformed(format!("non-numeric value {text:?} in column {col}")))
  }

  fn resolve(&mut self, raw: &str) -> Result<InstitutionId> {
    let hint = InstitutionHint {
      state:             self.carry.state.as_deref(),
      provider_category: self.carry.provider,
    };
    self.resolver.resolve(raw, &hint)
  }

  fn emit(&self, facts: Vec<FactRow>) -> Vec<ParsedFact> {
    facts
      .into_iter()
      .map(|fact| ParsedFact {
        fact,
        provenance: Provenance {
          classification: *self.classification,
          sheet:          self.sheet.name.clone(),
          row:            self.row,
        },
      })
      .collect()
  }

  /// Update carried state and return the institution text of a data row.
  /// Headings, aggregates and footnotes return `None`.
  fn institution_cell(&mut self, header: &HeaderPlan) -> Option<String> {
    if let Some(col) = header.state_col.filter(|c| *c != header.institution_col) {
      if let Some(text) = self.cell(col).as_str() {
        if let Some(group) = provider_group(text) {
          self.carry.provider = Some(group);
        } else if !text.starts_with('(') && !is_aggregate_label(text) {
          self.carry.state = Some(text.to_string());
        }
      }
    }

    let text = self.cell(header.institution_col).as_str()?.to_string();
    if let Some(group) = provider_group(&text) {
      self.carry.provider = Some(group);
      return None;
    }
    let lower = text.to_lowercase();
    if text.starts_with('(')
      || lower.starts_with("note")
      || lower.starts_with("source")
      || is_aggregate_label(&text)
    {
      return None;
    }
    Some(text)
  }

  fn institution_row(&mut self, plan: &Plan) -> Result<Vec<ParsedFact>> {
    let header = match plan {
      Plan::Rates { header, .. }
      | Plan::Outcomes(header)
      | Plan::Cohort { header, .. }
      | Plan::Fields { header, .. }
      | Plan::Levels { header, .. } => header,
      Plan::Staff { plan, .. } => &plan.header,
      Plan::Equity(_) => return Ok(Vec::new()),
    };
    let Some(name) = self.institution_cell(header) else {
      return Ok(Vec::new());
    };
    let name = self.with_code(header, name);

    // Values are read before resolving so malformed rows never create
    // institutions.
    let pending = self.read_values(plan, header)?;
    if pending.is_empty() {
      return Ok(Vec::new());
    }

    let id = self.resolve(&name)?;
    let facts = pending.into_iter().map(|make| make(id)).collect();
    Ok(self.emit(facts))
  }

  /// Append the provider code from a separate code column (labelled, or the
  /// column just left of the names), so the resolver sees `"Name (3005)"`
  /// as in the other publications.
  fn with_code(&self, header: &HeaderPlan, name: String) -> String {
    let col = header
      .column(ColumnRole::Code)
      .or_else(|| header.institution_col.checked_sub(1));
    let Some(col) = col else { return name };
    let code = self.cell(col).display();
    let is_code = code.len() == 4 && code.bytes().all(|b| b.is_ascii_digit());
    if is_code && extract_code(&name).is_none() {
      format!("{name} ({code})")
    } else {
      name
    }
  }

  /// The facts of a row, each waiting for its institution id.
  fn read_values(&self, plan: &Plan, header: &HeaderPlan) -> Result<Vec<PendingFact>> {
    let mut out: Vec<PendingFact> = Vec::new();
    match *plan {
      Plan::Rates { measure, student_type, .. } => {
        for &(col, role) in &header.columns {
          let ColumnRole::Year(year) = role else { continue };
          if let Some(rate) = self.value(col)? {
            out.push(Box::new(move |institution_id| {
              FactRow::Attrition(AttritionFact {
                institution_id,
                year,
                student_type,
                measure,
                rate,
              })
            }));
          }
        }
      }

      Plan::Cohort { duration, .. } => {
        for &(col, role) in &header.columns {
          let ColumnRole::Cohort { start, end } = role else { continue };
          if let Some(pct) = self.value(col)? {
            out.push(Box::new(move |institution_id| {
              FactRow::CompletionRate(CompletionRateFact {
                institution_id,
                cohort_start: start,
                cohort_end: end,
                duration_years: duration,
                completed_pct: Some(pct),
                still_enrolled_pct: None,
                dropped_out_pct: None,
                never_returned_pct: None,
              })
            }));
          }
        }
      }

      Plan::Outcomes(_) => {
        let Some(duration_col) = header.column(ColumnRole::Duration) else { return Ok(out) };
        let Some(timeframe_col) = header.column(ColumnRole::Timeframe) else { return Ok(out) };
        let duration_cell = self.cell(duration_col);
        let timeframe_cell = self.cell(timeframe_col);
        if duration_cell.is_empty() || timeframe_cell.is_empty() {
          return Ok(out);
        }
        let duration = parse_duration(duration_cell).ok_or_else(|| {
          self.malformed(format!("unknown duration {:?}", duration_cell.display()))
        })?;
        let (start, end) = header::timeframe(&timeframe_cell.display())
          .ok_or_else(|| self.malformed(format!("bad time-frame {:?}", timeframe_cell.display())))?;

        let read = |role| match header.column(role) {
          Some(col) => self.value(col),
          None => Ok(None),
        };
        let template = CompletionRateFact {
          institution_id:     InstitutionId(0),
          cohort_start:       start,
          cohort_end:         end,
          duration_years:     duration,
          completed_pct:      read(ColumnRole::Completed)?,
          still_enrolled_pct: read(ColumnRole::StillEnrolled)?,
          dropped_out_pct:    read(ColumnRole::DroppedOut)?,
          never_returned_pct: read(ColumnRole::NeverReturned)?,
        };
        if template.completed_pct.is_none() && template.still_enrolled_pct.is_none() {
          return Ok(out);
        }
        if !template.breakdown_consistent() {
          return Err(self.malformed("outcome breakdown does not sum to 100%"));
        }
        out.push(Box::new(move |institution_id| {
          FactRow::CompletionRate(CompletionRateFact { institution_id, ..template })
        }));
      }

      Plan::Fields { year, target, .. } => {
        for &(col, role) in &header.columns {
          let ColumnRole::Field(field) = role else { continue };
          let Some(value) = self.value(col)? else { continue };
          let make: PendingFact = match target {
            FieldTarget::Enrolment { student_type, commencing, load } => {
              Box::new(move |institution_id| {
                FactRow::Enrolment(EnrolmentFact {
                  institution_id,
                  year,
                  field,
                  course_level: CourseLevel::All,
                  student_type,
                  commencing,
                  headcount: (!load).then(|| value.round() as i64),
                  eftsl: load.then_some(value),
                })
              })
            }
            FieldTarget::Completion => Box::new(move |institution_id| {
              FactRow::Completion(CompletionFact {
                institution_id,
                year,
                field,
                course_level: CourseLevel::All,
                headcount: value.round() as i64,
              })
            }),
          };
          out.push(make);
        }
      }

      Plan::Levels { year, measure, .. } => {
        let level = |lvl: CourseLevel| -> Result<Option<i64>> {
          match header.column(ColumnRole::Level(lvl)) {
            Some(col) => Ok(self.value(col)?.map(|v| v.round() as i64)),
            None => Ok(None),
          }
        };
        let counts = [
          level(CourseLevel::PostgradResearch)?,
          level(CourseLevel::PostgradCoursework)?,
          level(CourseLevel::Bachelor)?,
          level(CourseLevel::SubBachelor)?,
        ];
        let published_total = match header.last_column(|r| *r == ColumnRole::Total) {
          Some(col) => self.value(col)?.map(|v| v.round() as i64),
          None => None,
        };
        let total = published_total
          .or_else(|| counts.iter().copied().sum::<Option<i64>>());
        if counts.iter().all(Option::is_none) && total.is_none() {
          return Ok(out);
        }
        let [pr, pc, ba, sb] = counts;
        out.push(Box::new(move |institution_id| {
          FactRow::CourseLevelMix(CourseLevelMixFact {
            institution_id,
            year,
            measure,
            postgrad_research: pr,
            postgrad_coursework: pc,
            bachelor: ba,
            sub_bachelor: sb,
            total,
          })
        }));
      }

      Plan::Staff { table, plan: ref staff } => {
        let mut years: Vec<StaffRatioFact> = Vec::new();
        for column in &staff.columns {
          let Some(value) = self.value(column.col)? else { continue };
          let i = match years.iter().position(|f| f.year == column.year) {
            Some(i) => i,
            None => {
              years.push(staff_year(column.year));
              years.len() - 1
            }
          };
          let year = &mut years[i];
          let slot = match (table, column.block) {
            (StaffTable::Ratios, StaffBlock::Academic) => &mut year.academic_ratio,
            (StaffTable::Ratios, StaffBlock::NonAcademic) => &mut year.non_academic_ratio,
            (StaffTable::Ratios, StaffBlock::Load) => continue,
            (StaffTable::Counts, StaffBlock::Load) => &mut year.eftsl,
            (StaffTable::Counts, StaffBlock::Academic) => &mut year.academic_fte,
            (StaffTable::Counts, StaffBlock::NonAcademic) => &mut year.non_academic_fte,
          };
          *slot = Some(value);
        }
        for template in years.into_iter().filter(|f| !f.is_empty()) {
          out.push(Box::new(move |institution_id| {
            FactRow::StaffRatio(StaffRatioFact { institution_id, ..template })
          }));
        }
      }

      Plan::Equity(_) => {}
    }
    Ok(out)
  }

  fn equity(&mut self, plan: &EquityPlan, next_row: &mut usize) -> Result<Vec<ParsedFact>> {
    let label = self.cell(0).display().into_owned();
    if label.starts_with('(') {
      // Footnotes close the table.
      *next_row = self.sheet.height();
      return Ok(Vec::new());
    }
    if !label.is_empty() {
      self.carry.group = Some(label);
    }
    let in_institutions = self
      .carry
      .group
      .as_deref()
      .is_some_and(|g| g.eq_ignore_ascii_case(EQUITY_INSTITUTION_GROUP));
    if !in_institutions {
      return Ok(Vec::new());
    }
    let Some(name) = self.cell(1).as_str().map(str::to_string) else {
      return Ok(Vec::new());
    };

    let mut rates = Vec::new();
    for column in &plan.columns {
      // Zero means the institution did not report the group.
      match self.value(column.col)? {
        Some(rate) if rate != 0.0 => rates.push((*column, rate)),
        _ => {}
      }
    }
    if rates.is_empty() {
      return Ok(Vec::new());
    }

    let id = self.resolve(&name)?;
    let facts = rates
      .into_iter()
      .map(|(column, rate)| {
        FactRow::Equity(EquityFact {
          institution_id: id,
          year: column.year,
          measure: plan.measure,
          group: column.group,
          rate,
        })
      })
      .collect();
    Ok(self.emit(facts))
  }
}

type PendingFact = Box<dyn FnOnce(InstitutionId) -> FactRow>;

fn staff_year(year: i32) -> StaffRatioFact {
  StaffRatioFact {
    institution_id:     InstitutionId(0),
    year,
    academic_ratio:     None,
    non_academic_ratio: None,
    eftsl:              None,
    academic_fte:       None,
    non_academic_fte:   None,
  }
}

#[cfg(test)]
mod tests {
  use std::collections::HashMap;

  use hestat_core::{
    fact::{EquityGroup, EquityMeasure},
    field::FieldOfEducation,
    institution::{InstitutionId, InstitutionName},
  };

  use super::*;

  // ── Test resolver ──

  #[derive(Default)]
  struct MapResolver {
    by_code:  HashMap<String, i64>,
    by_alias: HashMap<String, i64>,
    next:     i64,
    hints:    Vec<(String, Option<String>, Option<String>)>,
  }

  impl ResolveInstitution for MapResolver {
    fn resolve(&mut self, raw: &str, hint: &InstitutionHint<'_>) -> Result<InstitutionId> {
      let name = InstitutionName::parse(raw)
        .ok_or_else(|| Error::UnresolvedInstitution(raw.to_string()))?;
      self.hints.push((
        name.display.clone(),
        hint.state.map(str::to_string),
        hint.provider_category.map(str::to_string),
      ));
      let id = match name.code {
        Some(code) => {
          let next = &mut self.next;
          *self.by_code.entry(code).or_insert_with(|| {
            *next += 1;
            *next
          })
        }
        None => *self
          .by_alias
          .get(&name.alias_key)
          .ok_or_else(|| Error::UnresolvedInstitution(raw.to_string()))?,
      };
      self.by_alias.entry(name.alias_key).or_insert(id);
      Ok(InstitutionId(id))
    }
  }

  fn t(s: &str) -> Cell { Cell::text(s) }
  fn n(v: f64) -> Cell { Cell::Number(v) }

  fn classification(section: Section, variant: Variant, year: Option<i32>) -> Classification {
    Classification { section, year, variant }
  }

  fn collect(
    wb: &Workbook,
    c: Classification,
    resolver: &mut MapResolver,
  ) -> (Vec<FactRow>, ParseStats) {
    let mut rows = parse_workbook(wb, c, resolver, ParseOptions::default());
    let facts = rows.by_ref().map(|r| r.unwrap().fact).collect();
    (facts, rows.stats())
  }

  // ── Attrition ──

  fn attrition_sheet() -> Sheet {
    Sheet::new(
      "15.1",
      vec![
        vec![t("Table 15.1: Attrition rate for domestic commencing bachelor students")],
        vec![t("State"), t("Institution"), n(2020.0), n(2021.0), n(2022.0)],
        vec![t("NSW"), t("Table A Providers")],
        vec![t(""), t("Charles Sturt University (3005)"), n(20.5), t("np"), n(18.25)],
        vec![t(""), t("Macquarie University (3035)"), n(12.0), n(11.0), t("oops")],
        vec![t("Vic."), t("Monash University (3037)"), n(9.0), n(8.5), n(8.0)],
        vec![t(""), t("Total Table A Providers"), n(14.0), n(13.0), n(12.0)],
        vec![t("(a) Excludes overseas campuses.")],
      ],
    )
  }

  #[test]
  fn attrition_rows() {
    let wb = Workbook::from_sheets(vec![
      Sheet::new("Contents", vec![vec![t("Contents")]]),
      attrition_sheet(),
    ]);
    let mut resolver = MapResolver::default();
    let c = classification(Section::AttritionRetention, Variant::Consolidated, Some(2023));
    let (facts, stats) = collect(&wb, c, &mut resolver);

    // CSU: 2 (np suppressed), Macquarie: dropped, Monash: 3.
    assert_eq!(facts.len(), 5);
    assert_eq!(stats.rows_dropped, 1);
    assert_eq!(stats.sheets_skipped, 1);
    assert_eq!(stats.sheets_parsed, 1);
    assert_eq!(stats.facts, 5);
    assert!(facts.iter().all(|f| matches!(
      f,
      FactRow::Attrition(AttritionFact {
        measure: RateMeasure::Attrition,
        student_type: StudentType::Domestic,
        ..
      })
    )));

    // Macquarie was never resolved; aggregates were never resolved.
    let names: Vec<_> = resolver.hints.iter().map(|(n, ..)| n.as_str()).collect();
    assert_eq!(names, ["Charles Sturt University", "Monash University"]);
    assert_eq!(resolver.hints[0].1.as_deref(), Some("NSW"));
    assert_eq!(resolver.hints[0].2.as_deref(), Some("Table A"));
    assert_eq!(resolver.hints[1].1.as_deref(), Some("Vic."));
  }

  #[test]
  fn unresolved_rows_are_dropped() {
    let wb = Workbook::from_sheets(vec![Sheet::new(
      "15.4",
      vec![
        vec![t("Table 15.4: Retention rate for overseas commencing bachelor students")],
        vec![t("State"), t("Institution"), n(2020.0), n(2021.0), n(2022.0)],
        vec![t("NSW"), t("University of Nowhere"), n(80.0), n(81.0), n(82.0)],
        vec![t("NSW"), t("University of Somewhere (9999)"), n(80.0), n(81.0), n(82.0)],
      ],
    )]);
    let mut resolver = MapResolver::default();
    let c = classification(Section::AttritionRetention, Variant::Consolidated, None);
    let (facts, stats) = collect(&wb, c, &mut resolver);
    assert_eq!(facts.len(), 3);
    assert_eq!(stats.rows_dropped, 1);
    assert!(matches!(
      facts[0],
      FactRow::Attrition(AttritionFact {
        measure: RateMeasure::Retention,
        student_type: StudentType::Overseas,
        ..
      })
    ));
  }

  #[test]
  fn iterator_is_lazy() {
    let wb = Workbook::from_sheets(vec![attrition_sheet()]);
    let mut resolver = MapResolver::default();
    let c = classification(Section::AttritionRetention, Variant::Consolidated, None);
    let mut rows = parse_workbook(&wb, c, &mut resolver, ParseOptions::default());
    assert!(rows.next().is_some());
    drop(rows);
    // Only the first data row has been resolved.
    assert_eq!(resolver.hints.len(), 1);
  }

  // ── Completion rates ──

  #[test]
  fn outcome_breakdown_checked() {
    let wb = Workbook::from_sheets(vec![Sheet::new(
      "17.3",
      vec![
        vec![t("Table 17.3: Completion rates of domestic bachelor students by institution")],
        vec![
          t("State"),
          t("Institution"),
          t("Duration"),
          t("Timeframe"),
          t("Completed"),
          t("Still enrolled"),
          t("Re-enrolled, dropped out"),
          t("Never came back"),
        ],
        vec![
          t("NSW"),
          t("Macquarie University (3035)"),
          t("Four year"),
          t("2017-2020"),
          n(45.0),
          n(30.0),
          n(10.0),
          n(15.0),
        ],
        vec![
          t(""),
          t("Macquarie University (3035)"),
          t("Six year"),
          t("2015-2020"),
          n(66.0),
          n(10.0),
          n(30.0),
          n(15.0),
        ],
        vec![
          t(""),
          t("Macquarie University (3035)"),
          t("Nine year"),
          t("2012-2020"),
          n(73.0),
          t("na"),
          t("na"),
          t("na"),
        ],
      ],
    )]);
    let mut resolver = MapResolver::default();
    let c = classification(Section::CompletionRates, Variant::Consolidated, Some(2021));
    let (facts, stats) = collect(&wb, c, &mut resolver);
    assert_eq!(stats.rows_dropped, 1);
    let durations: Vec<_> = facts
      .iter()
      .map(|f| match f {
        FactRow::CompletionRate(r) => (r.duration_years, r.cohort_start),
        other => panic!("unexpected {other:?}"),
      })
      .collect();
    assert_eq!(durations, [(4, 2017), (9, 2012)]);
  }

  #[test]
  fn cohort_sheets_carry_duration() {
    let wb = Workbook::from_sheets(vec![
      Sheet::new("T1", vec![vec![t("National summary")]]),
      Sheet::new(
        "T5",
        vec![
          vec![t("Table 5: Six-year completion rates by institution")],
          vec![t("State"), t("Institution"), t("2010-2015"), t("2011-2016"), t("2012-2017")],
          vec![t("Qld"), t("Griffith University (3020)"), n(61.2), n(62.0), t("n.p.")],
        ],
      ),
    ]);
    let mut resolver = MapResolver::default();
    let c = classification(Section::CompletionRates, Variant::Cohort, None);
    let (facts, _) = collect(&wb, c, &mut resolver);
    assert_eq!(facts.len(), 2);
    let FactRow::CompletionRate(first) = &facts[0] else { panic!() };
    assert_eq!((first.duration_years, first.cohort_start, first.cohort_end), (6, 2010, 2015));
    assert_eq!(first.completed_pct, Some(61.2));
    assert!(first.still_enrolled_pct.is_none());
  }

  // ── Enrolments and completions ──

  fn field_sheet(name: &str, title: &str) -> Sheet {
    Sheet::new(
      name,
      vec![
        vec![t(title)],
        vec![
          t("State"),
          t("Higher Education Institution"),
          t("Natural and Physical Sciences"),
          t("Information Technology"),
          t("Engineering and Related Technologies"),
          t("Health"),
          t("Education"),
          t("Mixed Field Programmes"),
        ],
        vec![
          t("WA"),
          t("Curtin University (3040)"),
          n(1200.0),
          n(2400.0),
          t("<5"),
          n(5300.0),
          n(800.4),
          n(3.0),
        ],
      ],
    )
  }

  #[test]
  fn commencing_enrolments_by_field() {
    let wb = Workbook::from_sheets(vec![
      field_sheet("1.9", "Table 1.9: Commencing domestic students by field of education"),
      Sheet::new("1.2", vec![vec![t("Table 1.2: Something else entirely")]]),
    ]);
    let mut resolver = MapResolver::default();
    let c = classification(Section::Enrolments, Variant::Commencing, Some(2024));
    let (facts, stats) = collect(&wb, c, &mut resolver);
    assert_eq!(facts.len(), 4);
    assert_eq!(stats.sheets_skipped, 1);
    let FactRow::Enrolment(e) = &facts[3] else { panic!() };
    assert_eq!(e.field, FieldOfEducation::Education);
    assert_eq!(e.headcount, Some(800));
    assert_eq!(e.eftsl, None);
    assert!(e.commencing);
    assert_eq!(e.student_type, StudentType::Domestic);
    assert_eq!(e.year, 2024);
  }

  #[test]
  fn completions_by_field_content_marker() {
    let wb = Workbook::from_sheets(vec![field_sheet(
      "14.4",
      "Table 14.4: Award course completions by broad field of education",
    )]);
    let mut resolver = MapResolver::default();
    let c = classification(Section::Completions, Variant::Consolidated, Some(2023));
    let (facts, _) = collect(&wb, c, &mut resolver);
    assert_eq!(facts.len(), 4);
    assert!(facts.iter().all(|f| matches!(f, FactRow::Completion(c) if c.year == 2023)));
  }

  #[test]
  fn pivot_reads_year_filter_and_load() {
    let mut rows = vec![vec![t("Year"), n(2019.0)], vec![t("Liability status"), t("(All)")]];
    rows.extend(vec![vec![]; 10]);
    rows.push(vec![
      t("State"),
      t("Institution"),
      t("Natural and Physical Sciences"),
      t("Information Technology"),
      t("Engineering and Related Technologies"),
      t("Architecture and Building"),
      t("Health"),
    ]);
    rows.push(vec![
      t("SA"),
      t("University of Adelaide (3045)"),
      n(1500.5),
      n(700.0),
      n(900.0),
      n(100.0),
      n(2000.0),
    ]);
    rows.push(vec![t(""), t("Grand Total"), n(1.0), n(1.0), n(1.0), n(1.0), n(1.0)]);
    let wb = Workbook::from_sheets(vec![Sheet::new("Pivot_BFOE", rows)]);

    let mut resolver = MapResolver::default();
    let c = classification(Section::Enrolments, Variant::Load, Some(2020));
    let (facts, _) = collect(&wb, c, &mut resolver);
    assert_eq!(facts.len(), 5);
    let FactRow::Enrolment(e) = &facts[0] else { panic!() };
    assert_eq!(e.year, 2019);
    assert_eq!(e.eftsl, Some(1500.5));
    assert_eq!(e.headcount, None);
    assert!(!e.commencing);
  }

  #[test]
  fn course_level_mix() {
    let wb = Workbook::from_sheets(vec![Sheet::new(
      "2.5",
      vec![
        vec![t(concat!(
          "Table 2.5: All students by state, higher education institution ",
          "and broad level of course",
        ))],
        vec![
          t("State"),
          t("Higher Education Institution"),
          t("Postgraduate by Research"),
          t("Postgraduate by Coursework"),
          t("Bachelor"),
          t("Sub-bachelor"),
          t("Enabling Courses"),
          t("Non-award courses"),
          t("Total"),
        ],
        vec![
          t("ACT"),
          t("Australian National University (3090)"),
          n(3000.0),
          n(9000.0),
          n(14000.0),
          n(50.0),
          n(10.0),
          n(40.0),
          n(26100.0),
        ],
      ],
    )]);
    let mut resolver = MapResolver::default();
    let c = classification(Section::Enrolments, Variant::AllStudents, Some(2024));
    let (facts, _) = collect(&wb, c, &mut resolver);
    assert_eq!(facts.len(), 1);
    let FactRow::CourseLevelMix(m) = &facts[0] else { panic!() };
    assert_eq!(m.measure, MixMeasure::Enrolment);
    assert_eq!(m.bachelor, Some(14000));
    assert_eq!(m.sub_bachelor, Some(50));
    assert_eq!(m.total, Some(26100));
  }

  // ── Equity ──

  #[test]
  fn equity_rows() {
    let wb = Workbook::from_sheets(vec![
      Sheet::new("16.9", vec![vec![t("Table 16.9: Retention ratio by equity group")]]),
      Sheet::new(
        "16.8",
        vec![
          vec![t("Table 16.8: Retention rate for domestic students by equity group")],
          vec![t(""), t(""), t("Disability"), t(""), t(""), t("Indigenous")],
          vec![t(""), t(""), n(2020.0), n(2021.0), n(2022.0), n(2020.0), n(2021.0), n(2022.0)],
          vec![t("State"), t("Total NSW"), n(80.0), n(80.0), n(80.0), n(70.0), n(70.0), n(70.0)],
          vec![
            t("Higher Education Institution"),
            t("Monash University"),
            n(85.0),
            n(0.0),
            n(86.5),
            n(72.0),
            t("np"),
            n(74.0),
          ],
          vec![
            t(""),
            t("University of Melbourne"),
            n(90.0),
            n(91.0),
            n(92.0),
            n(80.0),
            n(81.0),
            n(82.0),
          ],
          vec![t("(a) Equity group definitions changed in 2021.")],
          vec![
            t("Higher Education Institution"),
            t("Deakin University"),
            n(1.0),
            n(1.0),
            n(1.0),
            n(1.0),
            n(1.0),
            n(1.0),
          ],
        ],
      ),
    ]);
    let mut resolver = MapResolver::default();
    resolver.by_alias.insert("monash university".into(), 7);
    resolver.by_alias.insert("university of melbourne".into(), 8);
    resolver.by_alias.insert("deakin university".into(), 9);

    let c = classification(Section::Equity, Variant::Consolidated, Some(2023));
    let (facts, stats) = collect(&wb, c, &mut resolver);
    assert_eq!(stats.sheets_skipped, 1);

    let rows: Vec<_> = facts
      .iter()
      .map(|f| match f {
        FactRow::Equity(e) => (e.institution_id.0, e.group, e.year),
        other => panic!("unexpected {other:?}"),
      })
      .collect();
    // Monash: zero and np skipped (4 facts), Melbourne: 6, Deakin after footnote: none.
    assert_eq!(rows.len(), 10);
    assert!(rows.contains(&(7, EquityGroup::Disability, 2022)));
    assert!(!rows.contains(&(7, EquityGroup::Disability, 2021)));
    assert!(rows.contains(&(8, EquityGroup::FirstNations, 2020)));
    assert!(rows.iter().all(|(id, ..)| *id != 9));
    assert!(
      facts
        .iter()
        .all(|f| matches!(f, FactRow::Equity(e) if e.measure == EquityMeasure::Retention))
    );
  }

  // ── Staff ratios ──

  fn staff_workbook() -> Workbook {
    Workbook::from_sheets(vec![
      Sheet::new(
        "A2.1",
        vec![
          vec![t("Table A2.1: Student-staff ratios, Table A and B providers")],
          vec![
            t(""),
            t(""),
            t(""),
            t("Academic staff ratio"),
            t(""),
            t(""),
            t("Non-academic staff ratio"),
          ],
          vec![
            t("State"),
            t("Code"),
            t("Institution"),
            n(2020.0),
            n(2021.0),
            n(2022.0),
            n(2020.0),
            n(2021.0),
            n(2022.0),
          ],
          vec![
            t("NSW"),
            n(3005.0),
            t("Charles Sturt University"),
            n(20.1),
            n(21.0),
            n(22.5),
            n(14.0),
            t("np"),
            n(15.2),
          ],
          vec![t(""), t(""), t("Total Table A Providers"), n(18.0), n(18.0), n(18.0)],
        ],
      ),
      Sheet::new(
        "A2.2",
        vec![
          vec![t("Table A2.2: Student load (EFTSL) and staff FTE")],
          vec![
            t(""),
            t(""),
            t(""),
            t("EFTSL"),
            t(""),
            t(""),
            t("Academic FTE"),
            t(""),
            t(""),
            t("Non-academic FTE"),
          ],
          vec![
            t("State"),
            t("Code"),
            t("Institution"),
            n(2020.0),
            n(2021.0),
            n(2022.0),
            n(2020.0),
            n(2021.0),
            n(2022.0),
            n(2020.0),
            n(2021.0),
            n(2022.0),
          ],
          vec![
            t("NSW"),
            n(3005.0),
            t("Charles Sturt University"),
            n(20000.0),
            n(21000.0),
            n(22000.0),
            n(1000.0),
            n(1050.0),
            n(980.0),
            n(1500.0),
            n(1520.0),
            n(1450.0),
          ],
        ],
      ),
    ])
  }

  #[test]
  fn staff_ratio_sheets_fill_one_row_per_year() {
    let mut resolver = MapResolver::default();
    let c = classification(Section::StaffRatios, Variant::Consolidated, Some(2024));
    let (facts, stats) = collect(&staff_workbook(), c, &mut resolver);
    assert_eq!(stats.sheets_parsed, 2);
    assert_eq!(resolver.hints[0].0, "Charles Sturt University");
    assert_eq!(resolver.by_code.get("3005"), Some(&1));

    let staff: Vec<&StaffRatioFact> = facts
      .iter()
      .map(|f| match f {
        FactRow::StaffRatio(s) => s,
        other => panic!("unexpected {other:?}"),
      })
      .collect();
    // Three years from each sheet; the aggregate row is skipped.
    assert_eq!(staff.len(), 6);
    assert!(staff.iter().all(|s| s.institution_id == InstitutionId(1)));

    let ratios_2021 = staff[1];
    assert_eq!(ratios_2021.year, 2021);
    assert_eq!(ratios_2021.academic_ratio, Some(21.0));
    assert_eq!(ratios_2021.non_academic_ratio, None);
    assert_eq!(ratios_2021.eftsl, None);

    let counts_2022 = staff[5];
    assert_eq!(counts_2022.year, 2022);
    assert_eq!(counts_2022.academic_ratio, None);
    assert_eq!(counts_2022.eftsl, Some(22000.0));
    assert_eq!(counts_2022.academic_fte, Some(980.0));
    assert_eq!(counts_2022.non_academic_fte, Some(1450.0));
  }

  #[test]
  fn staff_sheets_without_block_headings_are_skipped() {
    let wb = Workbook::from_sheets(vec![Sheet::new(
      "A2.3",
      vec![
        vec![t("Table A2.3: Staff by current duties")],
        vec![t("State"), t("Institution"), n(2020.0), n(2021.0), n(2022.0)],
        vec![t("NSW"), t("Charles Sturt University (3005)"), n(1.0), n(2.0), n(3.0)],
      ],
    )]);
    let mut resolver = MapResolver::default();
    let c = classification(Section::StaffRatios, Variant::Consolidated, Some(2024));
    let (facts, stats) = collect(&wb, c, &mut resolver);
    assert!(facts.is_empty());
    assert_eq!(stats.sheets_skipped, 1);
  }

  #[test]
  fn suppression_markers() {
    for marker in ["np", "n.p.", "NA", "-", "..", "...", "<5", "< 5", " n/a "] {
      assert_eq!(cell_value(&t(marker)), Ok(None), "{marker}");
    }
    assert_eq!(cell_value(&t("1,234")), Ok(Some(1234.0)));
    assert!(cell_value(&t("see note")).is_err());
  }

  #[test]
  fn durations() {
    assert_eq!(parse_duration(&t("Four year")), Some(4));
    assert_eq!(parse_duration(&n(9.0)), Some(9));
    assert_eq!(parse_duration(&t("Twelve")), None);
  }
}
