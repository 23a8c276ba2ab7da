//! Institutions and the name-normalisation rules used to resolve them.
//!
//! Publications spell the same provider many ways over twenty years
//! ("University of Technology, Sydney", "University of Technology Sydney
//! (3040)", "University of Technology Sydney(1.08)"). The helpers here turn
//! any of those into an alias key, a display name and an optional
//! government code; the resolver decides what they map to.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

// ─── Identity ────────────────────────────────────────────────────────────────

/// Canonical identifier of an institution (the `institutions.id` column).
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct InstitutionId(pub i64);

impl fmt::Display for InstitutionId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

/// A canonical institution record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Institution {
  pub id:            InstitutionId,
  /// Government-assigned provider code, e.g. `"3040"`.
  pub code:          Option<String>,
  pub name:          String,
  /// State or territory as printed in the publication.
  pub state:         Option<String>,
  /// Provider category, e.g. `"Table A"`.
  pub provider_type: Option<String>,
}

/// Input for creating an institution on first sight of its code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewInstitution {
  pub code:          String,
  pub name:          String,
  pub state:         Option<String>,
  pub provider_type: Option<String>,
}

// ─── Patterns ────────────────────────────────────────────────────────────────

static CODE_RE: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"\((\d{4})\)").expect("valid code regex"));

static FOOTNOTE_RE: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"\(\d+\.\d+\)").expect("valid footnote regex"));

static WHITESPACE_RE: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace regex"));

static AGGREGATE_RE: Lazy<Regex> = Lazy::new(|| {
  Regex::new(concat!(
    r"(?i)\b(total|sub-total|subtotal|all institutions|table [abc] providers?",
    r"|non-university higher education)\b",
  ))
  .expect("valid aggregate regex")
});

static INSTITUTION_WORD_RE: Lazy<Regex> = Lazy::new(|| {
  Regex::new(concat!(
    r"(?i)\b(university|institute|college|school|academy|polytechnic",
    r"|conservatorium|divinity|seminary|tafe|campus)\b",
  ))
  .expect("valid institution regex")
});

// ─── Name parsing ────────────────────────────────────────────────────────────

/// An institution cell split into the parts the resolver needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstitutionName {
  /// Lower-case, punctuation-free, code-free key for the alias table.
  pub alias_key: String,
  /// Cleaned text in its original casing, used as the display name.
  pub display:   String,
  /// The trailing four-digit provider code, if printed.
  pub code:      Option<String>,
}

impl InstitutionName {
  /// Split a raw cell. Returns `None` when nothing but codes, footnotes and
  /// whitespace remain.
  pub fn parse(raw: &str) -> Option<Self> {
    let without_notes = FOOTNOTE_RE.replace_all(raw, " ");
    let code = CODE_RE
      .captures_iter(&without_notes)
      .last()
      .map(|c| c[1].to_string());
    let without_code = CODE_RE.replace_all(&without_notes, " ");

    let display = collapse_whitespace(&without_code)
      .trim_end_matches([',', '.', ';'])
      .trim()
      .to_string();
    if display.is_empty() {
      return None;
    }

    Some(Self {
      alias_key: alias_key(&display),
      display,
      code,
    })
  }
}

/// Normalise case, whitespace and punctuation into an alias key.
///
/// Apostrophes and full stops are dropped outright ("St Patrick's" and "St
/// Patricks" agree); any other punctuation becomes a word break.
pub fn alias_key(name: &str) -> String {
  let stripped = FOOTNOTE_RE.replace_all(name, " ");
  let stripped = CODE_RE.replace_all(&stripped, " ");
  let mapped: String = stripped
    .chars()
    .filter(|c| !matches!(c, '\'' | '\u{2019}' | '.'))
    .map(|c| if c.is_alphanumeric() { c } else { ' ' })
    .collect::<String>()
    .to_lowercase();
  collapse_whitespace(&mapped)
}

fn collapse_whitespace(s: &str) -> String {
  WHITESPACE_RE.replace_all(s.trim(), " ").into_owned()
}

/// The provider code printed in `raw`, if any.
pub fn extract_code(raw: &str) -> Option<String> {
  CODE_RE.captures_iter(raw).last().map(|c| c[1].to_string())
}

// ─── Row heuristics ──────────────────────────────────────────────────────────

/// Aggregate rows (national totals, provider-group subtotals and headings)
/// that must never be resolved to an institution.
pub fn is_aggregate_label(cell: &str) -> bool { AGGREGATE_RE.is_match(cell) }

/// The provider category introduced by a group heading row such as
/// "Table A Providers".
pub fn provider_group(cell: &str) -> Option<&'static str> {
  let lower = cell.to_lowercase();
  if lower.contains("table a provider") {
    Some("Table A")
  } else if lower.contains("table b provider") {
    Some("Table B")
  } else if lower.contains("table c provider") {
    Some("Table C")
  } else if lower.contains("non-university higher education") {
    Some("Non-University Higher Education Provider")
  } else {
    None
  }
}

/// Whether a cell plausibly names an institution: it carries a provider
/// code or a typical institution noun.
pub fn looks_like_institution(cell: &str) -> bool {
  let cell = cell.trim();
  !cell.is_empty()
    && !cell.starts_with('(')
    && !is_aggregate_label(cell)
    && (CODE_RE.is_match(cell) || INSTITUTION_WORD_RE.is_match(cell))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parse_splits_code_and_footnotes() {
    let n = InstitutionName::parse("University of Technology Sydney (3040)(1.08)").unwrap();
    assert_eq!(n.code.as_deref(), Some("3040"));
    assert_eq!(n.display, "University of Technology Sydney");
    assert_eq!(n.alias_key, "university of technology sydney");
  }

  #[test]
  fn alias_key_ignores_case_and_punctuation() {
    assert_eq!(
      alias_key("University of Technology, Sydney"),
      alias_key("university of technology sydney"),
    );
    assert_eq!(alias_key("St Patrick's  College"), "st patricks college");
  }

  #[test]
  fn parse_rejects_code_only_cells() {
    assert!(InstitutionName::parse("  (1234) ").is_none());
  }

  #[test]
  fn last_code_wins() {
    assert_eq!(extract_code("Old Name (1111) now (2222)").as_deref(), Some("2222"));
  }

  #[test]
  fn aggregate_rows_detected() {
    assert!(is_aggregate_label("National Total"));
    assert!(is_aggregate_label("Total Table A Providers"));
    assert!(is_aggregate_label("Non-University Higher Education Providers"));
    assert!(!is_aggregate_label("Federation University Australia (4004)"));
  }

  #[test]
  fn provider_group_headings() {
    assert_eq!(provider_group("Table B Providers"), Some("Table B"));
    assert_eq!(provider_group("Monash University"), None);
  }

  #[test]
  fn institution_like_cells() {
    assert!(looks_like_institution("Monash University"));
    assert!(looks_like_institution("Some Provider Pty Ltd (9001)"));
    assert!(!looks_like_institution("NSW"));
    assert!(!looks_like_institution("(a) Excludes overseas campuses"));
  }
}
