//! In-memory workbook model.
//!
//! Workbooks are read eagerly into a small cell grid so the parser can scan
//! back and forth freely and so tests can build sheets by hand.

use std::{borrow::Cow, path::Path};

use calamine::{Data, Reader as _, open_workbook_auto};

use crate::error::{Error, Result};

// ─── Cells ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
  Empty,
  Text(String),
  Number(f64),
}

static EMPTY: Cell = Cell::Empty;

impl Cell {
  pub fn text(s: impl Into<String>) -> Self { Self::Text(s.into()) }

  pub fn is_empty(&self) -> bool {
    match self {
      Self::Empty => true,
      Self::Text(s) => s.trim().is_empty(),
      Self::Number(_) => false,
    }
  }

  /// Trimmed text content; `None` for numbers and empty cells.
  pub fn as_str(&self) -> Option<&str> {
    match self {
      Self::Text(s) => Some(s.trim()).filter(|s| !s.is_empty()),
      _ => None,
    }
  }

  pub fn as_number(&self) -> Option<f64> {
    match self {
      Self::Number(n) => Some(*n),
      _ => None,
    }
  }

  /// Display text of any cell. Integral numbers print without a fraction
  /// so a year stored as `2019.0` reads `"2019"`.
  pub fn display(&self) -> Cow<'_, str> {
    match self {
      Self::Empty => Cow::Borrowed(""),
      Self::Text(s) => Cow::Borrowed(s.trim()),
      Self::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => Cow::Owned(format!("{}", *n as i64)),
      Self::Number(n) => Cow::Owned(n.to_string()),
    }
  }
}

impl From<&Data> for Cell {
  fn from(data: &Data) -> Self {
    match data {
      Data::Int(i) => Self::Number(*i as f64),
      Data::Float(f) => Self::Number(*f),
      Data::String(s) if s.trim().is_empty() => Self::Empty,
      Data::String(s) => Self::Text(s.clone()),
      Data::DateTimeIso(s) | Data::DurationIso(s) => Self::Text(s.clone()),
      _ => Self::Empty,
    }
  }
}

// ─── Sheets ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
  pub name: String,
  /// Rows indexed from the top-left corner of the worksheet, so indices
  /// match what a person sees in a spreadsheet application (minus one).
  pub rows: Vec<Vec<Cell>>,
}

impl Sheet {
  pub fn new(name: impl Into<String>, rows: Vec<Vec<Cell>>) -> Self {
    Self { name: name.into(), rows }
  }

  pub fn height(&self) -> usize { self.rows.len() }

  pub fn width(&self) -> usize { self.rows.iter().map(Vec::len).max().unwrap_or(0) }

  pub fn row(&self, row: usize) -> &[Cell] {
    self.rows.get(row).map(Vec::as_slice).unwrap_or(&[])
  }

  /// The cell at (`row`, `col`); out-of-range positions read as empty.
  pub fn cell(&self, row: usize, col: usize) -> &Cell {
    self.rows.get(row).and_then(|r| r.get(col)).unwrap_or(&EMPTY)
  }

  /// The first text cell in column 0 of the first `within` rows longer
  /// than `min_len` characters, lower-cased. Publications put the table
  /// title there.
  pub fn title(&self, within: usize, min_len: usize) -> Option<String> {
    (0..within.min(self.height()))
      .filter_map(|r| self.cell(r, 0).as_str())
      .find(|s| s.chars().count() > min_len)
      .map(str::to_lowercase)
  }

  /// Whether any text cell in the first `within` rows contains `needle`
  /// (case-insensitive).
  pub fn head_mentions(&self, within: usize, needle: &str) -> bool {
    let needle = needle.to_lowercase();
    self.rows.iter().take(within).flatten().any(|c| {
      c.as_str()
        .is_some_and(|s| s.to_lowercase().contains(&needle))
    })
  }
}

// ─── Workbook ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Workbook {
  pub sheets: Vec<Sheet>,
}

impl Workbook {
  pub fn from_sheets(sheets: Vec<Sheet>) -> Self { Self { sheets } }

  /// Read every worksheet of an `.xlsx`, `.xlsm`, `.xls` or `.ods` file.
  pub fn open(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref();
    let mut reader = open_workbook_auto(path).map_err(|source| Error::Open {
      path: path.to_path_buf(),
      source,
    })?;

    let mut sheets = Vec::new();
    for name in reader.sheet_names() {
      let range = reader
        .worksheet_range(&name)
        .map_err(|source| Error::Sheet { sheet: name.clone(), source })?;

      // Ranges start at the first used cell; pad so indices stay absolute.
      let (row0, col0) = range.start().unwrap_or((0, 0));
      let mut rows: Vec<Vec<Cell>> = vec![Vec::new(); row0 as usize];
      for data_row in range.rows() {
        let mut row = vec![Cell::Empty; col0 as usize];
        row.extend(data_row.iter().map(Cell::from));
        rows.push(row);
      }

      tracing::trace!(sheet = %name, rows = rows.len(), "read worksheet");
      sheets.push(Sheet::new(name, rows));
    }

    Ok(Self { sheets })
  }

  pub fn sheet(&self, name: &str) -> Option<&Sheet> {
    self.sheets.iter().find(|s| s.name == name)
  }

  pub fn sheet_names(&self) -> impl Iterator<Item = &str> {
    self.sheets.iter().map(|s| s.name.as_str())
  }

  /// The sheet names and the display text of the first `rows` rows of
  /// each sheet.
  pub fn peek(&self, rows: usize) -> WorkbookPeek {
    WorkbookPeek {
      sheets: self
        .sheets
        .iter()
        .map(|s| PeekSheet {
          name: s.name.clone(),
          rows: s
            .rows
            .iter()
            .take(rows)
            .map(|r| r.iter().map(|c| c.display().into_owned()).collect())
            .collect(),
        })
        .collect(),
    }
  }
}

// ─── Peek ────────────────────────────────────────────────────────────────────

/// Just enough of a workbook to classify it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkbookPeek {
  pub sheets: Vec<PeekSheet>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeekSheet {
  pub name: String,
  pub rows: Vec<Vec<String>>,
}

impl WorkbookPeek {
  pub fn has_sheet(&self, name: &str) -> bool {
    self.sheets.iter().any(|s| s.name.trim().eq_ignore_ascii_case(name))
  }

  pub fn has_sheet_containing(&self, needle: &str) -> bool {
    self.sheets.iter().any(|s| s.name.to_lowercase().contains(needle))
  }

  /// Whether any peeked cell contains `needle` (case-insensitive).
  pub fn mentions(&self, needle: &str) -> bool {
    let needle = needle.to_lowercase();
    self
      .sheets
      .iter()
      .flat_map(|s| s.rows.iter().flatten())
      .any(|c| c.to_lowercase().contains(&needle))
  }

  /// A pivot `Year` filter cell: a row whose first cell reads "Year" and
  /// whose second holds a plausible year.
  pub fn year_filter(&self) -> Option<i32> {
    self
      .sheets
      .iter()
      .flat_map(|s| s.rows.iter())
      .find_map(|row| match row.as_slice() {
        [label, value, ..] if label.trim().eq_ignore_ascii_case("year") => {
          value.trim().parse::<i32>().ok().filter(|y| (2001..2030).contains(y))
        }
        _ => None,
      })
  }
}
