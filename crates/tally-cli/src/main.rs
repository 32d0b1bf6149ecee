//! `tally`: command-line client for the Tally class-average API.
//!
//! # Usage
//!
//! ```
//! tally --url http://localhost:8080 --user h1 --role head_teacher calculate
//! tally --config ~/.config/tally/config.toml averages --subject Algebra
//! ```

mod client;

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use client::{ApiClient, ApiConfig, AveragesPage, NewRecord};
use serde::Deserialize;
use tally_core::{
  access::Role,
  aggregate::{AggregateFilter, ClassSubjectAggregate},
};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

const DEFAULT_URL: &str = "http://localhost:8080";

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "tally", about = "Command-line client for Tally class averages")]
struct Args {
  /// Path to a TOML config file (url, user_id, role).
  #[arg(short, long, value_name = "FILE")]
  config: Option<PathBuf>,

  /// Base URL of the tally server (default: http://localhost:8080).
  #[arg(long, env = "TALLY_URL")]
  url: Option<String>,

  /// Caller identity sent as `x-user-id`.
  #[arg(long, env = "TALLY_USER")]
  user: Option<String>,

  /// Caller role: `teacher` or `head_teacher`.
  #[arg(long, env = "TALLY_ROLE")]
  role: Option<Role>,

  /// Print raw JSON instead of a table.
  #[arg(long, global = true)]
  json: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Recompute class averages through the server's dispatcher.
  Calculate {
    /// Only recompute this classroom.
    #[arg(long)]
    classroom: Option<String>,
  },
  /// List stored class averages.
  Averages {
    #[command(flatten)]
    filter: FilterArgs,
    /// Compute on the fly without persisting.
    #[arg(long)]
    preview: bool,
  },
  /// Show the dispatcher's last run and strategy order.
  Status,
  /// Submit one assessment result.
  AddRecord {
    #[arg(long)]
    student:   String,
    #[arg(long)]
    classroom: String,
    #[arg(long)]
    subject:   String,
    #[arg(long)]
    marks:     f64,
    #[arg(long)]
    max_marks: f64,
    /// `YYYY-MM-DD`; defaults to today.
    #[arg(long)]
    date:      Option<NaiveDate>,
  },
}

#[derive(clap::Args, Debug, Default)]
struct FilterArgs {
  #[arg(long)]
  classroom: Option<String>,
  #[arg(long)]
  school:    Option<String>,
  #[arg(long)]
  subject:   Option<String>,
  /// `YYYY-MM`, for monthly key mode.
  #[arg(long)]
  period:    Option<String>,
}

impl From<FilterArgs> for AggregateFilter {
  fn from(a: FilterArgs) -> Self {
    AggregateFilter {
      classroom_id: a.classroom,
      school_id: a.school,
      subject: a.subject,
      period: a.period,
      ..Default::default()
    }
  }
}

// ─── Config file ──────────────────────────────────────────────────────────────

/// Shape of the optional TOML config file.
#[derive(Deserialize, Default)]
struct ConfigFile {
  #[serde(default)]
  url:     String,
  #[serde(default)]
  user_id: String,
  #[serde(default)]
  role:    Option<Role>,
}

/// CLI flags override the config file, which overrides defaults.
fn resolve(args: &Args, file: ConfigFile) -> Result<ApiConfig> {
  let base_url = args
    .url
    .clone()
    .or_else(|| (!file.url.is_empty()).then_some(file.url))
    .unwrap_or_else(|| DEFAULT_URL.to_string());
  let user_id = args
    .user
    .clone()
    .or_else(|| (!file.user_id.is_empty()).then_some(file.user_id))
    .context("no user id: pass --user, set TALLY_USER, or add user_id to the config file")?;
  let role = args
    .role
    .or(file.role)
    .context("no role: pass --role, set TALLY_ROLE, or add role to the config file")?;
  Ok(ApiConfig { base_url, user_id, role })
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy(),
    )
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();

  let file_cfg: ConfigFile = if let Some(path) = &args.config {
    let raw = std::fs::read_to_string(path)
      .with_context(|| format!("reading config file {}", path.display()))?;
    toml::from_str(&raw).context("parsing config file")?
  } else {
    ConfigFile::default()
  };

  let client = ApiClient::new(resolve(&args, file_cfg)?)?;
  let json = args.json;

  match args.command {
    Command::Calculate { classroom } => {
      let report = client.calculate(classroom.as_deref()).await?;
      for failed in &report.failed_attempts {
        eprintln!("strategy {} failed: {}", failed.strategy, failed.message);
      }
      println!(
        "{} averages for {} classrooms via {}{}",
        report.averages_calculated,
        report.classrooms_processed,
        report.method,
        if report.persisted { "" } else { " (not persisted)" }
      );
      print_rows(&report.results, json)?;
    }
    Command::Averages { filter, preview } => {
      let page: AveragesPage = client.averages(&filter.into(), preview).await?;
      if json {
        println!("{}", serde_json::to_string_pretty(&page.data)?);
      } else {
        print_rows(&page.data, false)?;
        println!(
          "{} rows as {} (filters: {})",
          page.count,
          page.user_role.as_str(),
          serde_json::to_string(&page.applied_filters)?
        );
      }
    }
    Command::Status => {
      let status = client.status().await?;
      let order: Vec<_> = status.strategies.iter().map(|p| p.as_str()).collect();
      println!("strategies: {}", order.join(" → "));
      println!("{}", serde_json::to_string_pretty(&status.status)?);
    }
    Command::AddRecord { student, classroom, subject, marks, max_marks, date } => {
      let record = NewRecord {
        student_id: student,
        classroom_id: classroom,
        subject,
        marks,
        max_marks,
        assessment_date: date.unwrap_or_else(|| chrono::Local::now().date_naive()),
      };
      let stored = client.add_record(&record).await?;
      if json {
        println!("{}", serde_json::to_string_pretty(&stored)?);
      } else {
        println!("recorded {} ({}, {})", stored.record_id, stored.subject, stored.school_id);
      }
    }
  }

  Ok(())
}

// ─── Output ───────────────────────────────────────────────────────────────────

fn print_rows(rows: &[ClassSubjectAggregate], json: bool) -> Result<()> {
  if json {
    println!("{}", serde_json::to_string_pretty(rows)?);
    return Ok(());
  }
  println!(
    "{:<12} {:<16} {:<8} {:>8} {:>9} {:>12}  {}",
    "CLASSROOM", "SUBJECT", "PERIOD", "AVERAGE", "STUDENTS", "ASSESSMENTS", "BY"
  );
  for row in rows {
    println!(
      "{:<12} {:<16} {:<8} {:>8.2} {:>9} {:>12}  {}",
      row.classroom_name,
      row.subject,
      row.period.as_deref().unwrap_or("-"),
      row.average_score,
      row.total_students,
      row.total_assessments,
      row.calculated_by
    );
  }
  Ok(())
}
