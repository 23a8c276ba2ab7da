//! Fact rows — the normalized output of the sheet parser.
//!
//! Every fact is scoped by an institution, a year (or cohort start and
//! duration) and a small set of categorical dimensions. The dimension tuple
//! is the table's uniqueness key: loading a fact whose key already exists
//! replaces the stored value.

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::{field::FieldOfEducation, institution::InstitutionId, source::Classification};

// ─── Dimensions ──────────────────────────────────────────────────────────────

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
  AsRefStr, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StudentType {
  Domestic,
  Overseas,
  All,
}

/// Measures published in the attrition/retention/success tables.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
  AsRefStr, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RateMeasure {
  Attrition,
  Retention,
  Success,
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
  AsRefStr, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CourseLevel {
  All,
  PostgradResearch,
  PostgradCoursework,
  Bachelor,
  SubBachelor,
}

impl CourseLevel {
  /// Match a "broad level of course" column header.
  pub fn match_header(header: &str) -> Option<Self> {
    let h = header.to_lowercase();
    if h.contains("research") {
      Some(Self::PostgradResearch)
    } else if h.contains("coursework") {
      Some(Self::PostgradCoursework)
    } else if h.contains("sub-bachelor") || h.contains("sub bachelor") {
      Some(Self::SubBachelor)
    } else if h.contains("bachelor") {
      Some(Self::Bachelor)
    } else {
      None
    }
  }
}

/// Which count a course-level mix row reports.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
  AsRefStr, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MixMeasure {
  Enrolment,
  Completion,
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
  EnumString, AsRefStr, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EquityGroup {
  AllDomestic,
  LowSes,
  Regional,
  Remote,
  FirstNations,
  Disability,
  Nesb,
}

impl EquityGroup {
  /// The six groups that count towards the support score.
  pub const SCORED: [Self; 6] = [
    Self::LowSes,
    Self::Regional,
    Self::FirstNations,
    Self::Disability,
    Self::Nesb,
    Self::Remote,
  ];

  pub fn label(self) -> &'static str {
    match self {
      Self::AllDomestic => "All Domestic Students",
      Self::LowSes => "Low Socioeconomic Status",
      Self::Regional => "Regional Students",
      Self::Remote => "Remote Students",
      Self::FirstNations => "First Nations Students",
      Self::Disability => "Students with Disability",
      Self::Nesb => "Non-English Speaking Background",
    }
  }

  /// Map an equity-group heading to a group. Variants the score does not
  /// use (first-address, undergraduate-only and combined regional/remote
  /// columns) map to `None`.
  pub fn match_header(header: &str) -> Option<Self> {
    let h = header.trim();
    if ["First Address", "Undergraduate", "Regional/Remote"]
      .iter()
      .any(|skip| h.contains(skip))
    {
      return None;
    }
    const PATTERNS: [(&str, EquityGroup); 10] = [
      ("All Domestic", EquityGroup::AllDomestic),
      ("Domestic National Total", EquityGroup::AllDomestic),
      ("Non-English Speaking", EquityGroup::Nesb),
      ("Disability", EquityGroup::Disability),
      ("First Nations", EquityGroup::FirstNations),
      ("Indigenous", EquityGroup::FirstNations),
      ("Low SES by SA1", EquityGroup::LowSes),
      ("Low SES(", EquityGroup::LowSes),
      ("Regional(", EquityGroup::Regional),
      ("Remote(", EquityGroup::Remote),
    ];
    PATTERNS
      .iter()
      .find(|(pattern, _)| h.contains(pattern))
      .map(|(_, group)| *group)
  }
}

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display,
  EnumString, AsRefStr, EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EquityMeasure {
  Retention,
  Success,
  Attainment,
}

// ─── Fact payloads ───────────────────────────────────────────────────────────

/// Key: (institution, year, student type, measure).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttritionFact {
  pub institution_id: InstitutionId,
  pub year:           i32,
  pub student_type:   StudentType,
  pub measure:        RateMeasure,
  pub rate:           f64,
}

/// Key: (institution, cohort start, duration).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRateFact {
  pub institution_id:     InstitutionId,
  pub cohort_start:       i32,
  pub cohort_end:         i32,
  pub duration_years:     u8,
  pub completed_pct:      Option<f64>,
  pub still_enrolled_pct: Option<f64>,
  pub dropped_out_pct:    Option<f64>,
  pub never_returned_pct: Option<f64>,
}

/// Allowed deviation of a full outcome breakdown from 100 %.
pub const BREAKDOWN_TOLERANCE: f64 = 1.5;

impl CompletionRateFact {
  /// A complete four-way outcome breakdown must sum to 100 % within
  /// [`BREAKDOWN_TOLERANCE`]. Partial breakdowns are not checked.
  pub fn breakdown_consistent(&self) -> bool {
    match (
      self.completed_pct,
      self.still_enrolled_pct,
      self.dropped_out_pct,
      self.never_returned_pct,
    ) {
      (Some(a), Some(b), Some(c), Some(d)) => {
        ((a + b + c + d) - 100.0).abs() <= BREAKDOWN_TOLERANCE
      }
      _ => true,
    }
  }
}

/// Key: (institution, year, field, course level, student type, commencing).
///
/// Headcount and load arrive from different publications; a missing
/// measure never erases one already stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrolmentFact {
  pub institution_id: InstitutionId,
  pub year:           i32,
  pub field:          FieldOfEducation,
  pub course_level:   CourseLevel,
  pub student_type:   StudentType,
  pub commencing:     bool,
  pub headcount:      Option<i64>,
  pub eftsl:          Option<f64>,
}

/// Key: (institution, year, field, course level).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionFact {
  pub institution_id: InstitutionId,
  pub year:           i32,
  pub field:          FieldOfEducation,
  pub course_level:   CourseLevel,
  pub headcount:      i64,
}

/// Key: (institution, year, measure).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseLevelMixFact {
  pub institution_id:      InstitutionId,
  pub year:                i32,
  pub measure:             MixMeasure,
  pub postgrad_research:   Option<i64>,
  pub postgrad_coursework: Option<i64>,
  pub bachelor:            Option<i64>,
  pub sub_bachelor:        Option<i64>,
  pub total:               Option<i64>,
}

/// Key: (institution, year, measure, equity group).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityFact {
  pub institution_id: InstitutionId,
  pub year:           i32,
  pub measure:        EquityMeasure,
  pub group:          EquityGroup,
  pub rate:           f64,
}

/// Key: (institution, year).
///
/// The ratios and the raw load and staff counts come from separate tables
/// of the same workbook; a missing value never erases a stored one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaffRatioFact {
  pub institution_id:     InstitutionId,
  pub year:               i32,
  /// Student load (EFTSL) per academic staff FTE.
  pub academic_ratio:     Option<f64>,
  pub non_academic_ratio: Option<f64>,
  pub eftsl:              Option<f64>,
  pub academic_fte:       Option<f64>,
  pub non_academic_fte:   Option<f64>,
}

impl StaffRatioFact {
  pub fn is_empty(&self) -> bool {
    [
      self.academic_ratio,
      self.non_academic_ratio,
      self.eftsl,
      self.academic_fte,
      self.non_academic_fte,
    ]
    .iter()
    .all(Option::is_none)
  }
}

// ─── FactRow ─────────────────────────────────────────────────────────────────

/// A normalized fact destined for one of the fact tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "table", rename_all = "snake_case")]
pub enum FactRow {
  Attrition(AttritionFact),
  CompletionRate(CompletionRateFact),
  Enrolment(EnrolmentFact),
  Completion(CompletionFact),
  CourseLevelMix(CourseLevelMixFact),
  Equity(EquityFact),
  StaffRatio(StaffRatioFact),
}

impl FactRow {
  pub fn institution_id(&self) -> InstitutionId {
    match self {
      Self::Attrition(f) => f.institution_id,
      Self::CompletionRate(f) => f.institution_id,
      Self::Enrolment(f) => f.institution_id,
      Self::Completion(f) => f.institution_id,
      Self::CourseLevelMix(f) => f.institution_id,
      Self::Equity(f) => f.institution_id,
      Self::StaffRatio(f) => f.institution_id,
    }
  }

  /// The table this fact is written to.
  pub fn table(&self) -> &'static str {
    match self {
      Self::Attrition(_) => "attrition_retention",
      Self::CompletionRate(_) => "completion_rates",
      Self::Enrolment(_) => "enrolments",
      Self::Completion(_) => "completions",
      Self::CourseLevelMix(_) => "course_level_mix",
      Self::Equity(_) => "equity_performance",
      Self::StaffRatio(_) => "student_staff_ratios",
    }
  }

  /// The field of education referenced by this fact, if any.
  pub fn field(&self) -> Option<FieldOfEducation> {
    match self {
      Self::Enrolment(f) => Some(f.field),
      Self::Completion(f) => Some(f.field),
      _ => None,
    }
  }
}

/// Where a parsed fact came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
  pub classification: Classification,
  pub sheet:          String,
  /// Zero-based row index within the sheet.
  pub row:            usize,
}

/// A fact together with its provenance, as yielded by the parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedFact {
  pub fact:       FactRow,
  pub provenance: Provenance,
}
