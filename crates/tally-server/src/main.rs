//! tally-server binary.
//!
//! Reads `config.toml` (or the path given with `--config`) layered with
//! `TALLY_*` environment variables, opens the SQLite stores, and serves the
//! JSON API over HTTP.
//!
//! # Function key hash generation
//!
//! To generate the argon2 PHC string for `function_key_hash`:
//!
//! ```
//! cargo run -p tally-server -- --hash-key
//! ```

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::Context as _;
use argon2::{Argon2, PasswordHasher, password_hash::SaltString};
use clap::Parser;
use rand_core::OsRng;
use tally_core::dispatch::Dispatcher;
use tally_server::{ServerConfig, app, build_strategies, scheduler::spawn_scheduler};
use tally_store_sqlite::{SqliteAverages, SqliteRecords};
use tokio::net::TcpListener;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Tally class-average server")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "config.toml")]
  config: PathBuf,

  /// Print the argon2 hash for a function key entered on stdin and exit.
  #[arg(long)]
  hash_key: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  if cli.hash_key {
    let key = read_stdin_line()?;
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
      .hash_password(key.as_bytes(), &salt)
      .map_err(|e| anyhow::anyhow!("argon2 error: {e}"))?
      .to_string();
    println!("{hash}");
    return Ok(());
  }

  let cfg = ServerConfig::load(&cli.config).context("failed to load configuration")?;

  let records_path = expand_tilde(&cfg.records_path);
  let records = SqliteRecords::open(&records_path)
    .await
    .with_context(|| format!("failed to open record store at {records_path:?}"))?;

  let analytics_path = expand_tilde(&cfg.analytics_path);
  let averages = SqliteAverages::open(&analytics_path)
    .await
    .with_context(|| format!("failed to open analytics store at {analytics_path:?}"))?;

  let records = Arc::new(records);
  let averages = Arc::new(averages);

  let strategies = build_strategies(&cfg, records.clone(), averages.clone())
    .context("failed to build computation strategies")?;
  let dispatcher = Arc::new(Dispatcher::new(strategies));
  tracing::info!(strategies = ?dispatcher.strategies(), "dispatcher ready");

  if let Some(every) = cfg.schedule_interval() {
    tracing::info!(?every, "scheduling periodic runs");
    spawn_scheduler(dispatcher.clone(), every);
  }

  let router = app(&cfg, records, averages, dispatcher);
  let address = cfg.address();

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, router).await.context("server error")?;

  Ok(())
}

fn read_stdin_line() -> anyhow::Result<String> {
  use std::io::{self, BufRead, Write};
  print!("Function key: ");
  io::stdout().flush().ok();
  let mut line = String::new();
  io::stdin().lock().read_line(&mut line)?;
  Ok(line.trim_end_matches(['\n', '\r']).to_string())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
