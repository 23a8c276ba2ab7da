//! File classification: `(file name, content peek) → Classification`.
//!
//! File names carry most of the signal ("2024_Section15_Attrition…",
//! "Award Course Completions Pivot Table 2019"). When the name is
//! inconclusive the sheet names and titles in the peek decide.

use std::path::Path;

use hestat_core::{
  Error, Result,
  source::{Classification, Section, Variant},
};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::workbook::WorkbookPeek;

const EXTENSIONS: [&str; 4] = ["xlsx", "xlsm", "xls", "ods"];

static YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"20[0-2]\d").expect("valid year regex"));

static SECTION_RE: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"section(\d{1,2})").expect("valid section regex"));

static APPENDIX4_RE: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"appendix.?4.*attrition").expect("valid appendix regex"));

/// First `20[0-2]x` token in a file name.
pub fn year_from_name(name: &str) -> Option<i32> {
  YEAR_RE.find(name).and_then(|m| m.as_str().parse().ok())
}

/// Whether the extension is one the workbook reader opens.
pub fn is_spreadsheet(file_name: &str) -> bool {
  Path::new(file_name)
    .extension()
    .and_then(|e| e.to_str())
    .is_some_and(|e| EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

/// Classify a source file.
///
/// `peek` is optional so that obviously irrelevant files can be rejected
/// before they are opened.
pub fn classify(file_name: &str, peek: Option<&WorkbookPeek>) -> Result<Classification> {
  let reject = |reason: &str| Error::UnclassifiableFile {
    file:   file_name.to_string(),
    reason: reason.to_string(),
  };

  if !is_spreadsheet(file_name) {
    return Err(reject("not a spreadsheet"));
  }

  let lower = file_name.to_lowercase();
  if lower.contains("staff") && !lower.contains("ratio") {
    return Err(reject("only student-staff ratio tables are ingested"));
  }
  if lower.contains("first_half") || lower.contains("first half") {
    return Err(reject("first-half releases are not ingested"));
  }

  let (section, variant) = match by_name(&lower).or_else(|| peek.and_then(by_content)) {
    Some(found) => found,
    None => return Err(reject("no section marker in name or content")),
  };

  let year = year_from_name(file_name).or_else(|| peek.and_then(WorkbookPeek::year_filter));

  let needs_year = matches!(section, Section::Enrolments | Section::Completions)
    && !matches!(variant, Variant::Pivot | Variant::Load);
  if needs_year && year.is_none() {
    return Err(reject("enrolment and completion tables need a data year"));
  }

  Ok(Classification { section, year, variant })
}

fn by_name(lower: &str) -> Option<(Section, Variant)> {
  let compact: String = lower.chars().filter(|c| !matches!(c, ' ' | '_' | '-')).collect();
  let section_no: Option<u8> = SECTION_RE
    .captures(&compact)
    .and_then(|c| c[1].parse().ok());
  let has = |s: &str| lower.contains(s);

  if has("staff") && has("ratio") {
    return Some((Section::StaffRatios, Variant::Consolidated));
  }

  if section_no == Some(15)
    || (has("attrition") && (has("success") || has("retention")))
    || APPENDIX4_RE.is_match(lower)
  {
    return Some((Section::AttritionRetention, Variant::Consolidated));
  }

  if section_no == Some(17) || (has("completion rate") && !has("cohort")) {
    return Some((Section::CompletionRates, Variant::Consolidated));
  }
  if has("cohort") && has("completion") {
    return Some((Section::CompletionRates, Variant::Cohort));
  }

  if section_no == Some(16) || (has("equity") && has("performance")) {
    return Some((Section::Equity, Variant::Consolidated));
  }

  if has("pivot") {
    return if has("completion") || has("award") {
      Some((Section::Completions, Variant::Pivot))
    } else if has("enrolment") {
      Some((Section::Enrolments, Variant::Pivot))
    } else if has("load") {
      Some((Section::Enrolments, Variant::Load))
    } else {
      None
    };
  }

  if section_no == Some(14)
    || (has("award") && has("completion") && !has("cohort"))
    || compact.contains("awrdcoursecompletions")
  {
    return Some((Section::Completions, Variant::Consolidated));
  }

  if section_no == Some(2) || has("all_student") || has("all student") {
    return Some((Section::Enrolments, Variant::AllStudents));
  }

  let commencing = has("commencing_student") || has("commencing student");
  if section_no == Some(1) || (commencing && !has("load")) {
    return Some((Section::Enrolments, Variant::Commencing));
  }

  None
}

fn by_content(peek: &WorkbookPeek) -> Option<(Section, Variant)> {
  if ["T4", "T5", "T6"].iter().any(|s| peek.has_sheet(s)) {
    return Some((Section::CompletionRates, Variant::Cohort));
  }
  if peek.has_sheet_containing("bfoe") {
    return if peek.mentions("completion") || peek.mentions("award") {
      Some((Section::Completions, Variant::Pivot))
    } else if peek.mentions("load") || peek.mentions("eftsl") {
      Some((Section::Enrolments, Variant::Load))
    } else {
      Some((Section::Enrolments, Variant::Pivot))
    };
  }
  if peek.mentions("equity") && (peek.mentions("retention rate") || peek.mentions("success rate")) {
    return Some((Section::Equity, Variant::Consolidated));
  }
  if peek.mentions("student-staff ratio") || peek.mentions("student staff ratio") {
    return Some((Section::StaffRatios, Variant::Consolidated));
  }
  if peek.mentions("attrition rate") {
    return Some((Section::AttritionRetention, Variant::Consolidated));
  }
  if peek.mentions("completion rate") {
    return Some((Section::CompletionRates, Variant::Consolidated));
  }
  if peek.mentions("award course completions") {
    return Some((Section::Completions, Variant::Consolidated));
  }
  if peek.mentions("commencing students") {
    return Some((Section::Enrolments, Variant::Commencing));
  }
  if peek.mentions("all students") {
    return Some((Section::Enrolments, Variant::AllStudents));
  }
  None
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::workbook::PeekSheet;

  fn ok(name: &str) -> Classification { classify(name, None).unwrap() }

  #[test]
  fn section_names() {
    let c = ok("2024_Section15_Attrition_Retention_Success.xlsx");
    assert_eq!(
      (c.section, c.variant, c.year),
      (Section::AttritionRetention, Variant::Consolidated, Some(2024)),
    );

    assert_eq!(ok("2023 Section 17 Completion Rates.xlsx").section, Section::CompletionRates);
    assert_eq!(ok("Cohort analysis completion 2022.xlsx").variant, Variant::Cohort);
    assert_eq!(ok("2024_Section2_All_Students.xlsx").variant, Variant::AllStudents);
    assert_eq!(ok("2024_Section1_Commencing_Students.xlsx").variant, Variant::Commencing);
    assert_eq!(ok("2024_Section14_Award_Course_Completions.xlsx").section, Section::Completions);
    assert_eq!(ok("2023_Section16_Equity_Performance_Data.xlsx").section, Section::Equity);
  }

  #[test]
  fn staff_ratio_workbooks() {
    let c = ok("2024 Staff A2 Student Staff Ratios_updated.xlsx");
    assert_eq!(
      (c.section, c.variant, c.year),
      (Section::StaffRatios, Variant::Consolidated, Some(2024)),
    );

    let peek = WorkbookPeek {
      sheets: vec![PeekSheet {
        name: "A2.1".into(),
        rows: vec![vec!["Student-Staff Ratios (EFTSL / FTE)".into()]],
      }],
    };
    let c = classify("download (7).xlsx", Some(&peek)).unwrap();
    assert_eq!(c.section, Section::StaffRatios);
  }

  #[test]
  fn pivot_names() {
    let c = ok("2019 Award Course Completions Pivot Table.xlsx");
    assert_eq!((c.section, c.variant), (Section::Completions, Variant::Pivot));
    let c = ok("Student Load Pivot Table 2020.xlsm");
    assert_eq!((c.section, c.variant), (Section::Enrolments, Variant::Load));
    let c = ok("Enrolment Pivot Table.xlsx");
    assert_eq!((c.section, c.variant, c.year), (Section::Enrolments, Variant::Pivot, None));
  }

  #[test]
  fn rejects_irrelevant_files() {
    for name in [
      "2024_Section15.pdf",
      "2024_Staff_FTE.xlsx",
      "2024_First_Half_All_Students.xlsx",
      "random.xlsx",
      "Section2_All_Students.xlsx",
    ] {
      assert!(
        matches!(classify(name, None), Err(Error::UnclassifiableFile { .. })),
        "{name} should be unclassifiable",
      );
    }
  }

  #[test]
  fn content_fallback() {
    let peek = WorkbookPeek {
      sheets: vec![PeekSheet {
        name: "Table 1".into(),
        rows: vec![vec!["Attrition rate for commencing domestic students".into()]],
      }],
    };
    let c = classify("download (3).xlsx", Some(&peek)).unwrap();
    assert_eq!(c.section, Section::AttritionRetention);
    assert_eq!(c.year, None);
  }

  #[test]
  fn pivot_year_from_filter_cell() {
    let peek = WorkbookPeek {
      sheets: vec![PeekSheet {
        name: "Pivot_BFOE".into(),
        rows: vec![vec!["Year".into(), "2021".into()]],
      }],
    };
    let c = classify("Enrolment Pivot Table.xlsx", Some(&peek)).unwrap();
    assert_eq!(c.year, Some(2021));
  }
}
