//! The batch driver behind `hestat ingest`.
//!
//! Workbooks are read and classified on blocking threads, at most
//! `read_concurrency` at a time, then loaded one by one in release order.
//! A file whose name and content digest match an earlier ingestion is
//! skipped unless `force` is set. A bad file is logged and counted; it never
//! stops the batch.

use std::{
  collections::HashMap,
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::Context as _;
use hestat_core::source::{Classification, LoadReport, SourceFile};
use hestat_sheets::{Workbook, classify, is_spreadsheet};
use hestat_store_sqlite::{LoadOptions, SqliteStore};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::{sync::Semaphore, task::JoinSet};

/// Rows of each sheet shown to the classifier.
const PEEK_ROWS: usize = 10;

#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
  pub read_concurrency: usize,
  pub force:            bool,
  pub load:             LoadOptions,
}

#[derive(Debug, Default, Serialize)]
pub struct BatchSummary {
  pub files_seen:        usize,
  pub ingested:          usize,
  pub skipped_unchanged: usize,
  pub unclassified:      usize,
  pub failed:            usize,
  pub rows_written:      u64,
  pub rows_kept:         u64,
  pub rows_dropped:      u64,
  pub files:             Vec<LoadReport>,
}

/// A workbook read and classified, waiting for its turn to load.
#[derive(Debug)]
struct Pending {
  source:         SourceFile,
  classification: Classification,
  workbook:       Workbook,
}

#[derive(Debug)]
enum Read {
  Ready(Box<Pending>),
  Unchanged(String),
  Unclassified(String),
  Failed(String),
}

// ─── Scanning ────────────────────────────────────────────────────────────────

/// Spreadsheet files directly inside `dir`, sorted by name.
pub fn scan(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
  let entries = std::fs::read_dir(dir)
    .with_context(|| format!("cannot read data directory {}", dir.display()))?;
  let mut files = Vec::new();
  for entry in entries {
    let path = entry?.path();
    let is_sheet = path.file_name().and_then(|n| n.to_str()).is_some_and(is_spreadsheet);
    if path.is_file() && is_sheet {
      files.push(path);
    }
  }
  files.sort();
  Ok(files)
}

/// Lower-case hex SHA-256 of `bytes`.
pub fn digest(bytes: &[u8]) -> String { hex::encode(Sha256::digest(bytes)) }

// ─── Reading ─────────────────────────────────────────────────────────────────

fn read_one(path: &Path, known: &HashMap<String, Option<String>>, force: bool) -> Read {
  let name = path
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_default();

  let bytes = match std::fs::read(path) {
    Ok(bytes) => bytes,
    Err(e) => {
      tracing::warn!(file = %name, error = %e, "cannot read file");
      return Read::Failed(name);
    }
  };
  let digest = digest(&bytes);
  if !force && known.get(&name).is_some_and(|d| d.as_deref() == Some(digest.as_str())) {
    tracing::debug!(file = %name, "unchanged since last ingestion");
    return Read::Unchanged(name);
  }

  let workbook = match Workbook::open(path) {
    Ok(workbook) => workbook,
    Err(e) => {
      tracing::warn!(file = %name, error = %e, "cannot open workbook");
      return Read::Failed(name);
    }
  };
  let classification = match classify(&name, Some(&workbook.peek(PEEK_ROWS))) {
    Ok(c) => c,
    Err(e) => {
      tracing::info!(file = %name, reason = %e, "skipping file");
      return Read::Unclassified(name);
    }
  };

  Read::Ready(Box::new(Pending {
    source: SourceFile {
      name,
      path: Some(path.to_path_buf()),
      digest: Some(digest),
    },
    classification,
    workbook,
  }))
}

async fn read_all(
  paths: Vec<PathBuf>,
  known: HashMap<String, Option<String>>,
  options: BatchOptions,
) -> anyhow::Result<Vec<Read>> {
  let known = Arc::new(known);
  let permits = Arc::new(Semaphore::new(options.read_concurrency.max(1)));
  let mut tasks = JoinSet::new();

  for path in paths {
    let permit = Arc::clone(&permits).acquire_owned().await?;
    let known = Arc::clone(&known);
    tasks.spawn_blocking(move || {
      let read = read_one(&path, &known, options.force);
      drop(permit);
      read
    });
  }

  let mut reads = Vec::new();
  while let Some(read) = tasks.join_next().await {
    reads.push(read.context("workbook reader panicked")?);
  }
  Ok(reads)
}

/// Release order: older data first, then section and variant order, then
/// file name.
fn release_order(pending: &mut [Pending]) {
  pending.sort_by(|a, b| {
    a.classification
      .release_key()
      .cmp(&b.classification.release_key())
      .then_with(|| a.source.name.cmp(&b.source.name))
  });
}

// ─── Driver ──────────────────────────────────────────────────────────────────

pub async fn run(
  store: &SqliteStore,
  data_dir: &Path,
  options: BatchOptions,
) -> anyhow::Result<BatchSummary> {
  let paths = scan(data_dir)?;
  let known: HashMap<String, Option<String>> = store
    .ingestion_records()
    .await?
    .into_iter()
    .map(|r| (r.filename, r.digest))
    .collect();

  let mut summary = BatchSummary { files_seen: paths.len(), ..BatchSummary::default() };
  tracing::info!(dir = %data_dir.display(), files = paths.len(), "scanning data directory");

  let mut pending = Vec::new();
  for read in read_all(paths, known, options).await? {
    match read {
      Read::Ready(p) => pending.push(*p),
      Read::Unchanged(_) => summary.skipped_unchanged += 1,
      Read::Unclassified(_) => summary.unclassified += 1,
      Read::Failed(_) => summary.failed += 1,
    }
  }
  release_order(&mut pending);

  for Pending { source, classification, workbook } in pending {
    let name = source.name.clone();
    match store.ingest(workbook, source, classification, options.load).await {
      Ok(report) => {
        summary.ingested += 1;
        summary.rows_written += report.rows_written;
        summary.rows_kept += report.rows_kept;
        summary.rows_dropped += report.rows_dropped;
        summary.files.push(report);
      }
      Err(e) if e.is_integrity_violation() => {
        tracing::warn!(file = %name, error = %e, "file rolled back");
        summary.failed += 1;
      }
      Err(e) => {
        tracing::error!(file = %name, error = %e, "ingestion failed");
        summary.failed += 1;
      }
    }
  }

  tracing::info!(
    ingested = summary.ingested,
    unchanged = summary.skipped_unchanged,
    unclassified = summary.unclassified,
    failed = summary.failed,
    rows = summary.rows_written,
    "ingestion complete",
  );
  Ok(summary)
}
