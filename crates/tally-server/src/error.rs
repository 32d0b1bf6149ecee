//! Error type for `tally-server` startup.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("configuration error: {0}")]
  Config(#[from] config::ConfigError),

  #[error("HTTP client error: {0}")]
  Client(#[from] reqwest::Error),

  #[error("no usable computation strategy is configured")]
  NoStrategies,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
