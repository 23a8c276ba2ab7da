//! The ten broad fields of education (ASCED broad fields 01–10).
//!
//! Reference data: seeded once into `fields_of_education` and never changed.
//! The remaining publication columns (food and hospitality, mixed field
//! programmes, non-award courses) are too sparse to rank and are ignored by
//! the parser.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, IntoEnumIterator as _};

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
  Serialize,
  Deserialize,
  Display,
  EnumIter,
)]
#[serde(rename_all = "snake_case")]
pub enum FieldOfEducation {
  #[strum(to_string = "Natural and Physical Sciences")]
  NaturalAndPhysicalSciences,
  #[strum(to_string = "Information Technology")]
  InformationTechnology,
  #[strum(to_string = "Engineering and Related Technologies")]
  Engineering,
  #[strum(to_string = "Architecture and Building")]
  ArchitectureAndBuilding,
  #[strum(to_string = "Agriculture, Environmental and Related Studies")]
  Agriculture,
  #[strum(to_string = "Health")]
  Health,
  #[strum(to_string = "Education")]
  Education,
  #[strum(to_string = "Management and Commerce")]
  ManagementAndCommerce,
  #[strum(to_string = "Society and Culture")]
  SocietyAndCulture,
  #[strum(to_string = "Creative Arts")]
  CreativeArts,
}

impl FieldOfEducation {
  /// The `fields_of_education.id` this field is seeded with (1–10).
  pub fn id(self) -> i64 {
    match self {
      Self::NaturalAndPhysicalSciences => 1,
      Self::InformationTechnology => 2,
      Self::Engineering => 3,
      Self::ArchitectureAndBuilding => 4,
      Self::Agriculture => 5,
      Self::Health => 6,
      Self::Education => 7,
      Self::ManagementAndCommerce => 8,
      Self::SocietyAndCulture => 9,
      Self::CreativeArts => 10,
    }
  }

  pub fn from_id(id: i64) -> Option<Self> { Self::iter().find(|f| f.id() == id) }

  /// Match a column header against the field synonyms. Exact-word fields
  /// (health, education) must match the whole header so that "Field of
  /// Education" is not mistaken for a data column.
  pub fn match_header(header: &str) -> Option<Self> {
    let h = header_text(header);
    if h.is_empty() {
      return None;
    }
    if h.starts_with("natural") || h.contains("physical science") {
      Some(Self::NaturalAndPhysicalSciences)
    } else if h.starts_with("information tech") {
      Some(Self::InformationTechnology)
    } else if h.contains("engineering") {
      Some(Self::Engineering)
    } else if h.contains("architecture") {
      Some(Self::ArchitectureAndBuilding)
    } else if h.contains("agriculture") || h.contains("environmental") {
      Some(Self::Agriculture)
    } else if h == "health" {
      Some(Self::Health)
    } else if h == "education" {
      Some(Self::Education)
    } else if h.contains("management") || h.contains("commerce") {
      Some(Self::ManagementAndCommerce)
    } else if h.contains("society") || h.contains("culture") {
      Some(Self::SocietyAndCulture)
    } else if h.contains("creative") {
      Some(Self::CreativeArts)
    } else {
      None
    }
  }
}

/// Lower-case a header and drop footnote markers like `(a)` or `(1.03)`.
fn header_text(header: &str) -> String {
  let mut out = String::with_capacity(header.len());
  let mut depth = 0usize;
  for c in header.chars() {
    match c {
      '(' => depth += 1,
      ')' => depth = depth.saturating_sub(1),
      _ if depth == 0 => out.push(c),
      _ => {}
    }
  }
  out.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

#[cfg(test)]
mod tests {
  use strum::IntoEnumIterator;

  use super::*;

  #[test]
  fn ids_roundtrip_for_all_ten() {
    let all: Vec<_> = FieldOfEducation::iter().collect();
    assert_eq!(all.len(), 10);
    for f in all {
      assert_eq!(FieldOfEducation::from_id(f.id()), Some(f));
    }
    assert_eq!(FieldOfEducation::from_id(11), None);
  }

  #[test]
  fn header_synonyms() {
    assert_eq!(
      FieldOfEducation::match_header("Agriculture, Environmental and Related Studies"),
      Some(FieldOfEducation::Agriculture),
    );
    assert_eq!(FieldOfEducation::match_header(" Health (a)"), Some(FieldOfEducation::Health));
    assert_eq!(FieldOfEducation::match_header("Field of Education"), None);
    assert_eq!(
      FieldOfEducation::match_header("Food, Hospitality and Personal Services"),
      None,
    );
    assert_eq!(FieldOfEducation::match_header("Mixed Field Programmes"), None);
  }

  #[test]
  fn display_is_publication_name() {
    assert_eq!(FieldOfEducation::Engineering.to_string(), "Engineering and Related Technologies");
  }
}
