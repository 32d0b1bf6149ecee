//! Error types for `tally-core`.

use std::time::Duration;

use thiserror::Error;

use crate::dispatch::FailedAttempt;

/// A type-erased store error, boxed so the taxonomy below stays independent of
/// any concrete backend.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum Error {
  /// The relational store could not be read. Retryable; nothing downstream
  /// has been touched.
  #[error("record source unavailable: {0}")]
  SourceUnavailable(#[source] BoxError),

  /// The analytics store could not be read or written. A failed write leaves
  /// the previous aggregates in place.
  #[error("aggregate store unavailable: {0}")]
  SinkUnavailable(#[source] BoxError),

  #[error("classroom {classroom_id} cannot be resolved: {reason}")]
  ResolutionGap { classroom_id: String, reason: String },

  #[error("invalid assessment record {record_id}: {reason}")]
  InvalidRecord { record_id: String, reason: String },

  #[error("insufficient permissions: {0}")]
  InsufficientPermissions(String),

  #[error("classroom not found: {0}")]
  ClassroomNotFound(String),

  #[error("invalid input: {0}")]
  Validation(String),

  #[error("remote computation failed: {0}")]
  Remote(String),

  #[error("timed out after {0:?}")]
  Timeout(Duration),

  #[error("all computation strategies failed: {}", describe_attempts(.0))]
  StrategiesExhausted(Vec<FailedAttempt>),
}

impl Error {
  pub fn source_unavailable(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::SourceUnavailable(Box::new(e))
  }

  pub fn sink_unavailable(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::SinkUnavailable(Box::new(e))
  }
}

fn describe_attempts(attempts: &[FailedAttempt]) -> String {
  if attempts.is_empty() {
    return "no strategies configured".to_owned();
  }
  attempts
    .iter()
    .map(|a| format!("{}: {}", a.strategy, a.message))
    .collect::<Vec<_>>()
    .join("; ")
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
