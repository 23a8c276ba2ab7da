//! Two-pass header location.
//!
//! Pass 1 finds the header row by counting the cells that define the
//! table's shape (years, cohort time-frames, fields of education, outcome
//! labels or course levels). Pass 2 maps every cell of that row to a
//! [`ColumnRole`]; cells no synonym matches are ignored. Nothing is tied to
//! fixed coordinates because the publications move tables around between
//! releases.

use hestat_core::{
  fact::{CourseLevel, EquityGroup, EquityMeasure},
  field::FieldOfEducation,
  institution::looks_like_institution,
};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::workbook::{Cell, Sheet};

/// Default number of rows scanned for a header.
pub const DEFAULT_SCAN_ROWS: usize = 8;
/// Pivot extracts put a filter block above the table.
pub const PIVOT_SCAN_ROWS: usize = 30;

/// Rows below the header sampled when guessing the institution column.
const INSTITUTION_SAMPLE_ROWS: usize = 20;

static TIMEFRAME_RE: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"^(\d{4})\s*[-–]\s*(\d{4})").expect("valid timeframe regex"));

static LEADING_YEAR_RE: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"^(\d{4})").expect("valid leading year regex"));

static VERSIONED_YEAR_RE: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"^(\d{4})\s*\((\d{4})").expect("valid versioned year regex"));

// ─── Roles ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColumnRole {
  State,
  Institution,
  /// A separate provider-code column.
  Code,
  Year(i32),
  Cohort { start: i32, end: i32 },
  Field(FieldOfEducation),
  Level(CourseLevel),
  Total,
  Duration,
  Timeframe,
  Completed,
  StillEnrolled,
  DroppedOut,
  NeverReturned,
}

/// The shape of table a header is expected to describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderKind {
  /// Rates by year (attrition/retention/success).
  Years,
  /// Cohort completion by `yyyy-yyyy` time-frame.
  Timeframes,
  /// Counts by broad field of education.
  Fields,
  /// One row per cohort with labelled outcome columns.
  Outcomes,
  /// Counts by broad level of course.
  Levels,
}

impl HeaderKind {
  /// Pass 2: the synonym table.
  pub fn role(self, cell: &Cell, col: usize) -> Option<ColumnRole> {
    if self == Self::Years {
      if let Some(year) = year_token(cell) {
        return Some(ColumnRole::Year(year));
      }
    }

    let text = cell.as_str()?;
    let lower = text.to_lowercase();

    if self == Self::Outcomes {
      return outcome_role(&lower);
    }
    if lower == "state" || lower.starts_with("state/") || lower.starts_with("state ") {
      return Some(ColumnRole::State);
    }
    if lower == "code" || lower.ends_with(" code") {
      return Some(ColumnRole::Code);
    }
    if lower.contains("institution") || lower.contains("higher education provider") {
      return Some(ColumnRole::Institution);
    }

    match self {
      Self::Timeframes => timeframe(text).map(|(start, end)| ColumnRole::Cohort { start, end }),
      Self::Fields if col >= 2 => FieldOfEducation::match_header(text).map(ColumnRole::Field),
      Self::Levels if lower.starts_with("total") => Some(ColumnRole::Total),
      Self::Levels => CourseLevel::match_header(text).map(ColumnRole::Level),
      _ => None,
    }
  }

  /// Pass 1: whether a row's roles make it this kind of header.
  fn is_header(self, roles: &[(usize, ColumnRole)]) -> bool {
    let count = |pred: fn(&ColumnRole) -> bool| roles.iter().filter(|(_, r)| pred(r)).count();
    match self {
      Self::Years => count(|r| matches!(r, ColumnRole::Year(_))) >= 3,
      Self::Timeframes => count(|r| matches!(r, ColumnRole::Cohort { .. })) >= 3,
      Self::Fields => count(|r| matches!(r, ColumnRole::Field(_))) >= 5,
      Self::Outcomes => roles.len() >= 4,
      Self::Levels => count(|r| matches!(r, ColumnRole::Level(_))) >= 3,
    }
  }
}

fn outcome_role(lower: &str) -> Option<ColumnRole> {
  if lower.contains("state") || lower.contains("group") {
    Some(ColumnRole::State)
  } else if lower.contains("institution") {
    Some(ColumnRole::Institution)
  } else if lower.contains("duration") {
    Some(ColumnRole::Duration)
  } else if lower.contains("timeframe") || lower.contains("time frame") {
    Some(ColumnRole::Timeframe)
  } else if lower.contains("completed") {
    Some(ColumnRole::Completed)
  } else if lower.contains("still enrolled") {
    Some(ColumnRole::StillEnrolled)
  } else if lower.contains("re-enrolled") || lower.contains("dropped out") {
    Some(ColumnRole::DroppedOut)
  } else if lower.contains("never came back") {
    Some(ColumnRole::NeverReturned)
  } else {
    None
  }
}

/// A `yyyy-yyyy` cohort time-frame at the start of `text`.
pub fn timeframe(text: &str) -> Option<(i32, i32)> {
  let c = TIMEFRAME_RE.captures(text.trim())?;
  Some((c[1].parse().ok()?, c[2].parse().ok()?))
}

/// A year header cell: 1990 < y < 2030.
fn year_token(cell: &Cell) -> Option<i32> {
  let value = match cell {
    Cell::Number(n) if n.fract() == 0.0 => *n,
    Cell::Text(s) => s.trim().parse::<f64>().ok()?,
    _ => return None,
  };
  let year = value as i32;
  (f64::from(year) == value && year > 1990 && year < 2030).then_some(year)
}

// ─── Plan ────────────────────────────────────────────────────────────────────

/// Where a sheet's table lives and what its columns mean.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderPlan {
  pub header_row:      usize,
  pub columns:         Vec<(usize, ColumnRole)>,
  pub institution_col: usize,
  pub state_col:       Option<usize>,
  pub data_start:      usize,
}

impl HeaderPlan {
  /// The first column with exactly this role.
  pub fn column(&self, role: ColumnRole) -> Option<usize> {
    self.columns.iter().find(|(_, r)| *r == role).map(|(c, _)| *c)
  }

  /// The last column of a kind matched by `pred`.
  pub fn last_column(&self, pred: impl Fn(&ColumnRole) -> bool) -> Option<usize> {
    self.columns.iter().rev().find(|(_, r)| pred(r)).map(|(c, _)| *c)
  }
}

/// Locate a header of `kind` within the first `scan_rows` rows.
///
/// `None` when no row qualifies, no institution column can be found, or no
/// data row follows the header.
pub fn locate(sheet: &Sheet, kind: HeaderKind, scan_rows: usize) -> Option<HeaderPlan> {
  let (header_row, columns) = (0..scan_rows.min(sheet.height())).find_map(|r| {
    let roles: Vec<(usize, ColumnRole)> = sheet
      .row(r)
      .iter()
      .enumerate()
      .filter_map(|(c, cell)| kind.role(cell, c).map(|role| (c, role)))
      .collect();
    kind.is_header(&roles).then_some((r, roles))
  })?;

  let labelled = |role: ColumnRole| columns.iter().find(|(_, r)| *r == role).map(|(c, _)| *c);

  let institution_col = match labelled(ColumnRole::Institution) {
    Some(c) => c,
    None => guess_institution_column(sheet, header_row, &columns)?,
  };
  let state_col = labelled(ColumnRole::State).or_else(|| {
    let col0_is_value = columns.iter().any(|(c, _)| *c == 0);
    (institution_col > 0 && !col0_is_value).then_some(0)
  });

  let data_start = (header_row + 1..sheet.height())
    .find(|r| !sheet.cell(*r, institution_col).is_empty())?;

  Some(HeaderPlan { header_row, columns, institution_col, state_col, data_start })
}

/// The leftmost non-value column whose cells below the header look like
/// institution names.
fn guess_institution_column(
  sheet: &Sheet,
  header_row: usize,
  columns: &[(usize, ColumnRole)],
) -> Option<usize> {
  let first_value = columns
    .iter()
    .filter(|(_, r)| !matches!(r, ColumnRole::State | ColumnRole::Institution | ColumnRole::Code))
    .map(|(c, _)| *c)
    .min()
    .unwrap_or(usize::MAX);
  let rows = header_row + 1..(header_row + 1 + INSTITUTION_SAMPLE_ROWS).min(sheet.height());

  (0..first_value.min(sheet.width())).find(|&c| {
    rows
      .clone()
      .any(|r| sheet.cell(r, c).as_str().is_some_and(looks_like_institution))
  })
}

// ─── Pivot filter ────────────────────────────────────────────────────────────

/// The `Year` filter cell of a pivot extract, searched above `before_row`.
pub fn pivot_year(sheet: &Sheet, before_row: usize) -> Option<i32> {
  (0..before_row.min(sheet.height())).find_map(|r| {
    let label = sheet.cell(r, 0).as_str()?;
    if !label.eq_ignore_ascii_case("year") {
      return None;
    }
    let value = match sheet.cell(r, 1) {
      Cell::Number(n) => n.round() as i32,
      Cell::Text(s) => s.trim().parse().ok()?,
      Cell::Empty => return None,
    };
    (value > 2000 && value < 2030).then_some(value)
  })
}

// ─── Equity tables ───────────────────────────────────────────────────────────

/// One rate column of an equity table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EquityColumn {
  pub col:   usize,
  pub group: EquityGroup,
  pub year:  i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EquityPlan {
  pub measure:    EquityMeasure,
  pub year_row:   usize,
  pub columns:    Vec<EquityColumn>,
  pub data_start: usize,
}

/// The measure named in an equity sheet's title and the title row.
/// Ratio tables are not rates and yield `None`.
pub fn equity_title(sheet: &Sheet) -> Option<(usize, EquityMeasure)> {
  for r in 0..5.min(sheet.height()) {
    let title = sheet.cell(r, 0).display().to_lowercase();
    if title.contains("ratio") {
      return None;
    }
    if title.contains("retention") && title.contains("rate") {
      return Some((r, EquityMeasure::Retention));
    }
    if title.contains("success") && title.contains("rate") {
      return Some((r, EquityMeasure::Success));
    }
    if title.contains("attainment") {
      return Some((r, EquityMeasure::Attainment));
    }
  }
  None
}

/// Year header cell of an equity table: a plain year or a versioned label
/// such as `"2016 (2011 SEIFA)"`.
fn equity_year(cell: &Cell) -> Option<i32> {
  let year = match cell {
    Cell::Number(n) => *n as i32,
    Cell::Text(s) => LEADING_YEAR_RE.captures(s.trim())?[1].parse().ok()?,
    Cell::Empty => return None,
  };
  (2000..=2030).contains(&year).then_some(year)
}

/// Dual-version columns publish the same year under an old and a new
/// classification; only the newer one is kept.
fn is_latest_version(cell: &Cell) -> bool {
  let Cell::Text(s) = cell else { return true };
  match VERSIONED_YEAR_RE.captures(s.trim()) {
    Some(c) => {
      let parse = |i: usize| c[i].parse::<i32>().unwrap_or_default();
      parse(2) >= parse(1) - 1
    }
    None => true,
  }
}

/// Locate the year row (within four rows of the title), the group header
/// row above it and the rate columns of the groups that are tracked.
pub fn locate_equity(sheet: &Sheet) -> Option<EquityPlan> {
  let (title_row, measure) = equity_title(sheet)?;

  let year_row = (title_row + 1..(title_row + 5).min(sheet.height())).find(|&r| {
    (2..20).filter(|&c| equity_year(sheet.cell(r, c)).is_some()).count() >= 3
  })?;
  let group_row = year_row.checked_sub(1)?;

  let group_starts: Vec<(usize, &str)> = sheet
    .row(group_row)
    .iter()
    .enumerate()
    .skip(2)
    .filter_map(|(c, cell)| cell.as_str().map(|s| (c, s)))
    .collect();
  if group_starts.is_empty() {
    return None;
  }

  let columns: Vec<EquityColumn> = sheet
    .row(year_row)
    .iter()
    .enumerate()
    .skip(2)
    .filter(|(_, cell)| is_latest_version(cell))
    .filter_map(|(col, cell)| {
      let year = equity_year(cell)?;
      let (_, heading) = group_starts.iter().rev().find(|(start, _)| *start <= col)?;
      let group = EquityGroup::match_header(heading)?;
      Some(EquityColumn { col, group, year })
    })
    .collect();
  if columns.is_empty() {
    return None;
  }

  Some(EquityPlan { measure, year_row, columns, data_start: year_row + 1 })
}

// ─── Staff ratio tables ──────────────────────────────────────────────────────

/// The block of repeated year columns a staff-table column belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaffBlock {
  /// Student load (EFTSL).
  Load,
  Academic,
  NonAcademic,
}

impl StaffBlock {
  fn match_heading(heading: &str) -> Option<Self> {
    let h = heading.to_lowercase();
    if h.contains("non-academic") || h.contains("non academic") {
      Some(Self::NonAcademic)
    } else if h.contains("academic") {
      Some(Self::Academic)
    } else if h.contains("eftsl") || h.contains("student load") {
      Some(Self::Load)
    } else {
      None
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaffColumn {
  pub col:   usize,
  pub block: StaffBlock,
  pub year:  i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StaffPlan {
  pub header:  HeaderPlan,
  pub columns: Vec<StaffColumn>,
}

/// Locate a staff table: a year header whose years repeat once per block,
/// with the block headings one or two rows above it. The first column of
/// each block and year wins; blocks with other headings are ignored.
pub fn locate_staff(sheet: &Sheet, scan_rows: usize) -> Option<StaffPlan> {
  let header = locate(sheet, HeaderKind::Years, scan_rows)?;

  let headings = (1..=2)
    .filter_map(|up| header.header_row.checked_sub(up))
    .find_map(|r| {
      let starts: Vec<(usize, &str)> = sheet
        .row(r)
        .iter()
        .enumerate()
        .skip(header.institution_col + 1)
        .filter_map(|(c, cell)| cell.as_str().map(|s| (c, s)))
        .collect();
      starts
        .iter()
        .any(|(_, s)| StaffBlock::match_heading(s).is_some())
        .then_some(starts)
    })?;

  let mut columns: Vec<StaffColumn> = Vec::new();
  for &(col, role) in &header.columns {
    let ColumnRole::Year(year) = role else { continue };
    let Some((_, heading)) = headings.iter().rev().find(|(start, _)| *start <= col) else {
      continue;
    };
    let Some(block) = StaffBlock::match_heading(heading) else { continue };
    if !columns.iter().any(|c| c.block == block && c.year == year) {
      columns.push(StaffColumn { col, block, year });
    }
  }
  if columns.is_empty() {
    return None;
  }

  Some(StaffPlan { header, columns })
}
