//! Spreadsheet side of the ingestion pipeline.
//!
//! Classifies higher-education statistics workbooks and turns their sheets
//! into typed facts from [`hestat_core::fact`]. Pure synchronous; no
//! database dependencies. Institution names are handed to a caller-supplied
//! [`hestat_core::resolve::ResolveInstitution`].
//!
//! # Quick start
//!
//! ```no_run
//! use hestat_sheets::{ParseOptions, Workbook, classify, parse_workbook};
//! # fn run(resolver: impl hestat_core::resolve::ResolveInstitution) -> anyhow::Result<()> {
//! let path = "2024_Section15_Attrition_Retention_Success.xlsx";
//! let workbook = Workbook::open(path)?;
//! let classification = classify(path, Some(&workbook.peek(10)))?;
//! for fact in parse_workbook(&workbook, classification, resolver, ParseOptions::default()) {
//!   println!("{:?}", fact?.fact);
//! }
//! # Ok(())
//! # }
//! ```

pub mod classify;
pub mod error;
pub mod header;
pub mod parse;
pub mod workbook;

pub use classify::{classify, is_spreadsheet};
pub use error::{Error, Result};
pub use parse::{FactRows, ParseOptions, ParseStats, cell_value, parse_workbook};
pub use workbook::{Cell, Sheet, Workbook, WorkbookPeek};
