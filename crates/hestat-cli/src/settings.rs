//! Runtime settings: an optional `hestat.toml` layered under `HESTAT_*`
//! environment variables.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use hestat_core::source::SupersedePolicy;
use hestat_sheets::ParseOptions;
use hestat_store_sqlite::LoadOptions;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
  pub store_path:       PathBuf,
  pub data_dir:         PathBuf,
  /// Workbooks read concurrently by `ingest`.
  pub read_concurrency: usize,
  pub supersede_policy: SupersedePolicy,
  pub header_scan_rows: usize,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      store_path:       PathBuf::from("hestat.db"),
      data_dir:         PathBuf::from("_downloads/files"),
      read_concurrency: 4,
      supersede_policy: SupersedePolicy::default(),
      header_scan_rows: ParseOptions::default().header_scan_rows,
    }
  }
}

impl Settings {
  /// Read `file` (when it exists) and the environment.
  pub fn load(file: &Path) -> anyhow::Result<Self> {
    let settings = config::Config::builder()
      .add_source(config::File::from(file).required(false))
      .add_source(config::Environment::with_prefix("HESTAT"))
      .build()
      .context("failed to read config file")?;

    let mut settings: Self = settings
      .try_deserialize()
      .context("failed to deserialise Settings")?;
    settings.store_path = expand_tilde(&settings.store_path);
    settings.data_dir = expand_tilde(&settings.data_dir);
    settings.read_concurrency = settings.read_concurrency.max(1);
    Ok(settings)
  }

  pub fn load_options(&self) -> LoadOptions {
    LoadOptions {
      policy: self.supersede_policy,
      parse:  ParseOptions { header_scan_rows: self.header_scan_rows },
    }
  }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/") {
    if let Ok(home) = std::env::var("HOME") {
      return PathBuf::from(home).join(rest);
    }
  }
  path.to_path_buf()
}

#[cfg(test)]
mod tests {
  use std::io::Write as _;

  use super::*;

  #[test]
  fn missing_file_gives_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings::load(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(settings.read_concurrency, 4);
    assert_eq!(settings.supersede_policy, SupersedePolicy::IngestionOrder);
    assert_eq!(settings.store_path, PathBuf::from("hestat.db"));
  }

  #[test]
  fn file_values_override_defaults() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
      file,
      "store_path = \"/var/lib/hestat/stats.db\"\n\
       read_concurrency = 0\n\
       supersede_policy = \"publication-year\"\n\
       header_scan_rows = 12"
    )
    .unwrap();

    let settings = Settings::load(file.path()).unwrap();
    assert_eq!(settings.store_path, PathBuf::from("/var/lib/hestat/stats.db"));
    assert_eq!(settings.read_concurrency, 1);
    assert_eq!(settings.data_dir, PathBuf::from("_downloads/files"));

    let options = settings.load_options();
    assert_eq!(options.policy, SupersedePolicy::PublicationYear);
    assert_eq!(options.parse.header_scan_rows, 12);
  }
}
