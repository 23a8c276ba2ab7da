//! `hestat` — ingest higher-education statistics workbooks and query them.
//!
//! Reads `hestat.toml` (or the path given with `--config`) and `HESTAT_*`
//! environment variables, opens the SQLite store and runs one subcommand.
//! Results are printed to stdout as JSON; logs go to stderr.
//!
//! ```text
//! hestat ingest --data-dir _downloads/files
//! hestat report "University of Sydney" --field 2
//! hestat heatmap 6
//! ```

mod pipeline;
mod settings;

use std::path::PathBuf;

use anyhow::{Context as _, bail};
use clap::{Parser, Subcommand};
use hestat_core::{
  field::FieldOfEducation,
  institution::Institution,
  source::SupersedePolicy,
  store::StatsStore,
};
use hestat_store_sqlite::SqliteStore;
use pipeline::BatchOptions;
use serde::Serialize;
use settings::Settings;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

// ─── CLI args ────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "hestat", version, about = "Higher-education statistics store")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "hestat.toml", global = true)]
  config: PathBuf,

  /// SQLite store path (overrides `store_path`).
  #[arg(long, env = "HESTAT_STORE", global = true)]
  store: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Load every new or changed workbook in the data directory.
  Ingest {
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Re-ingest files even when their content is unchanged.
    #[arg(long)]
    force:    bool,
    /// `ingestion-order` or `publication-year`.
    #[arg(long)]
    policy:   Option<SupersedePolicy>,
  },
  /// Report card for one institution.
  Report {
    /// Id, provider code or name.
    institution: String,
    /// Field of education id (1-10) to add field context for.
    #[arg(long)]
    field:       Option<i64>,
  },
  /// Composite risk of every institution teaching a field.
  Heatmap { field: i64 },
  /// Equity-group support analysis for one institution.
  Equity { institution: String },
  /// All known institutions.
  Institutions,
  /// The ten broad fields of education.
  Fields,
  /// Ingestion provenance, for one file or all of them.
  Ingested { filename: Option<String> },
  /// Map another spelling of a name to an institution.
  Alias {
    name:        String,
    institution: String,
    /// Re-point an alias that already belongs to another institution.
    #[arg(long = "override")]
    override_existing: bool,
  },
  /// Record a new provider code for an institution.
  ReissueCode { institution: String, code: String },
}

// ─── Entry point ─────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let mut settings = Settings::load(&cli.config)?;
  if let Some(store) = cli.store {
    settings.store_path = store;
  }

  let store = SqliteStore::open(&settings.store_path)
    .await
    .with_context(|| format!("failed to open store at {:?}", settings.store_path))?;

  match cli.command {
    Command::Ingest { data_dir, force, policy } => {
      if let Some(policy) = policy {
        settings.supersede_policy = policy;
      }
      let data_dir = data_dir.unwrap_or_else(|| settings.data_dir.clone());
      let options = BatchOptions {
        read_concurrency: settings.read_concurrency,
        force,
        load: settings.load_options(),
      };
      print_json(&pipeline::run(&store, &data_dir, options).await?)
    }
    Command::Report { institution, field } => {
      let found = lookup(&store, institution).await?;
      let field = field.map(field_by_id).transpose()?;
      print_json(&store.institution_report(found.id, field).await?)
    }
    Command::Heatmap { field } => print_json(&store.field_heatmap(field_by_id(field)?).await?),
    Command::Equity { institution } => {
      let found = lookup(&store, institution).await?;
      print_json(&store.equity_report(found.id).await?)
    }
    Command::Institutions => print_json(&store.list_institutions().await?),
    Command::Fields => print_json(&store.list_fields().await?),
    Command::Ingested { filename: Some(filename) } => {
      print_json(&store.ingestion_record(filename).await?)
    }
    Command::Ingested { filename: None } => print_json(&store.ingestion_records().await?),
    Command::Alias { name, institution, override_existing } => {
      let found = lookup(&store, institution).await?;
      store
        .register_alias(name.clone(), found.id, override_existing)
        .await
        .with_context(|| format!("cannot alias {name:?}"))?;
      print_json(&found)
    }
    Command::ReissueCode { institution, code } => {
      let found = lookup(&store, institution).await?;
      store.reissue_code(found.id, code).await?;
      print_json(&lookup(&store, found.id.to_string()).await?)
    }
  }
}

async fn lookup(store: &SqliteStore, query: String) -> anyhow::Result<Institution> {
  match store.find_institution(query.clone()).await? {
    Some(found) => Ok(found),
    None => bail!("no institution matches {query:?}"),
  }
}

fn field_by_id(id: i64) -> anyhow::Result<FieldOfEducation> {
  FieldOfEducation::from_id(id).with_context(|| format!("no field of education {id} (1-10)"))
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
  let stdout = std::io::stdout();
  serde_json::to_writer_pretty(stdout.lock(), value)?;
  println!();
  Ok(())
}
