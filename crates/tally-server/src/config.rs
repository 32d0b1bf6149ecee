//! Server configuration: a TOML file layered with `TALLY_*` environment
//! variables.
//!
//! Nested keys use a double underscore, e.g. `TALLY_REMOTE__FUNCTION_URL`.
//! `TALLY_STRATEGIES` takes a comma-separated list.

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use tally_core::{
  aggregate::{KeyMode, Provenance},
  pipeline::PipelineOptions,
};

/// Runtime server configuration, deserialised from `config.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  #[serde(default = "default_host")]
  pub host:                   String,
  #[serde(default = "default_port")]
  pub port:                   u16,
  /// SQLite file holding schools, classrooms and assessment records.
  pub records_path:           PathBuf,
  /// SQLite file holding computed class averages. May equal `records_path`.
  pub analytics_path:         PathBuf,
  #[serde(default)]
  pub key_mode:               KeyMode,
  #[serde(default)]
  pub lookback_days:          Option<u32>,
  /// The order computation strategies are tried in.
  #[serde(default = "default_strategies")]
  pub strategies:             Vec<Provenance>,
  /// Run the dispatcher on this interval when set.
  #[serde(default)]
  pub schedule_interval_secs: Option<u64>,
  /// Where the `scheduled` strategy sends its request.
  #[serde(default)]
  pub remote:                 Option<RemoteConfig>,
  /// Argon2 PHC string for the key accepted by the function endpoint. The
  /// endpoint is not mounted when unset.
  #[serde(default)]
  pub function_key_hash:      Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
  pub function_url: String,
  pub function_key: String,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

impl RemoteConfig {
  pub fn timeout(&self) -> Duration { Duration::from_secs(self.timeout_secs) }
}

fn default_host() -> String { "127.0.0.1".to_owned() }

fn default_port() -> u16 { 8080 }

fn default_strategies() -> Vec<Provenance> {
  vec![Provenance::Scheduled, Provenance::Direct, Provenance::TestMode]
}

fn default_timeout_secs() -> u64 { 30 }

impl ServerConfig {
  /// Read `path` (optional) and the process environment.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    Self::load_with_env(path, env_source())
  }

  fn load_with_env(path: &Path, env: Environment) -> Result<Self, ConfigError> {
    Config::builder()
      .add_source(File::from(path).required(false))
      .add_source(env)
      .build()?
      .try_deserialize()
  }

  pub fn pipeline_options(&self) -> PipelineOptions {
    PipelineOptions { key_mode: self.key_mode, lookback_days: self.lookback_days }
  }

  pub fn schedule_interval(&self) -> Option<Duration> {
    self
      .schedule_interval_secs
      .filter(|secs| *secs > 0)
      .map(Duration::from_secs)
  }

  pub fn address(&self) -> String { format!("{}:{}", self.host, self.port) }
}

fn env_source() -> Environment {
  Environment::with_prefix("TALLY")
    .prefix_separator("_")
    .separator("__")
    .list_separator(",")
    .with_list_parse_key("strategies")
    .try_parsing(true)
}

#[cfg(test)]
mod tests {
  use std::collections::HashMap;

  use super::*;

  fn write_config(name: &str, contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("tally-{name}-{}.toml", std::process::id()));
    std::fs::write(&path, contents).unwrap();
    path
  }

  fn env(vars: &[(&str, &str)]) -> Environment {
    let map: HashMap<String, String> =
      vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
    env_source().source(Some(map))
  }

  #[test]
  fn file_with_defaults() {
    let path = write_config(
      "defaults",
      r#"
records_path = "records.db"
analytics_path = "analytics.db"
"#,
    );
    let cfg = ServerConfig::load_with_env(&path, env(&[])).unwrap();
    assert_eq!(cfg.address(), "127.0.0.1:8080");
    assert_eq!(cfg.key_mode, KeyMode::ClassSubject);
    assert_eq!(cfg.strategies, default_strategies());
    assert!(cfg.remote.is_none());
    assert!(cfg.schedule_interval().is_none());
    let _ = std::fs::remove_file(path);
  }

  #[test]
  fn full_file() {
    let path = write_config(
      "full",
      r#"
host = "0.0.0.0"
port = 9000
records_path = "/srv/tally/records.db"
analytics_path = "/srv/tally/analytics.db"
key_mode = "monthly"
strategies = ["direct", "test-mode"]
schedule_interval_secs = 3600

[remote]
function_url = "http://localhost:9000/functions/calculate-class-averages"
function_key = "s3cret"
"#,
    );
    let cfg = ServerConfig::load_with_env(&path, env(&[])).unwrap();
    assert_eq!(cfg.port, 9000);
    assert_eq!(cfg.pipeline_options().effective_lookback_days(), Some(30));
    assert_eq!(cfg.strategies, vec![Provenance::Direct, Provenance::TestMode]);
    assert_eq!(cfg.schedule_interval(), Some(Duration::from_secs(3600)));
    let remote = cfg.remote.unwrap();
    assert_eq!(remote.timeout(), Duration::from_secs(30));
    let _ = std::fs::remove_file(path);
  }

  #[test]
  fn environment_overrides_file() {
    let path = write_config(
      "env",
      r#"
port = 9000
records_path = "a.db"
analytics_path = "b.db"
"#,
    );
    let cfg = ServerConfig::load_with_env(
      &path,
      env(&[
        ("TALLY_PORT", "9100"),
        ("TALLY_STRATEGIES", "direct,test-mode"),
        ("TALLY_REMOTE__FUNCTION_URL", "http://fn"),
        ("TALLY_REMOTE__FUNCTION_KEY", "k"),
      ]),
    )
    .unwrap();
    assert_eq!(cfg.port, 9100);
    assert_eq!(cfg.strategies, vec![Provenance::Direct, Provenance::TestMode]);
    assert_eq!(cfg.remote.unwrap().function_url, "http://fn");
    let _ = std::fs::remove_file(path);
  }

  #[test]
  fn missing_file_needs_paths_from_env() {
    let path = PathBuf::from("/nonexistent/tally.toml");
    assert!(ServerConfig::load_with_env(&path, env(&[])).is_err());

    let cfg = ServerConfig::load_with_env(
      &path,
      env(&[("TALLY_RECORDS_PATH", "r.db"), ("TALLY_ANALYTICS_PATH", "a.db")]),
    )
    .unwrap();
    assert_eq!(cfg.records_path, PathBuf::from("r.db"));
  }
}
