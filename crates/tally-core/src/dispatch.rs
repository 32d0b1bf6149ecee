//! The trigger dispatcher: an ordered list of computation strategies, tried in
//! turn until one succeeds.
//!
//! ```text
//! Idle ──dispatch──▶ Running ──first success──▶ Succeeded
//!                       │
//!                       └──every strategy failed, or run dropped──▶ Failed
//! ```
//!
//! Strategies are attempted in list order, not by score. Once one succeeds the
//! rest are never started. Runs are serialised by an internal lock; readers of
//! the analytics store never take it.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{Instrument as _, info, info_span, warn};
use uuid::Uuid;

use crate::{
  Error, Result,
  aggregate::{ClassSubjectAggregate, Provenance},
};

// ─── Strategy interface ──────────────────────────────────────────────────────

/// Who asked for a run and what it covers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
  /// Requester identity, for logs and the remote function.
  pub requested_by: Option<String>,
  /// Recompute a single classroom; `None` recomputes everything.
  pub classroom_id: Option<String>,
}

/// What a successful strategy produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
  pub provenance:           Provenance,
  pub classrooms_processed: usize,
  pub averages_calculated:  usize,
  /// Whether the aggregates were written to the analytics store.
  pub persisted:            bool,
  /// Every row carries `calculated_by == provenance`.
  pub aggregates:           Vec<ClassSubjectAggregate>,
}

/// One way of computing aggregates.
#[async_trait]
pub trait ComputeStrategy: Send + Sync {
  /// The tag stamped on every aggregate this strategy produces.
  fn provenance(&self) -> Provenance;

  /// Run the computation. Any error makes the dispatcher move on to the next
  /// strategy.
  async fn compute(&self, request: &RunRequest) -> Result<RunReport>;
}

// ─── Status ──────────────────────────────────────────────────────────────────

/// A strategy that was attempted and failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedAttempt {
  pub strategy: Provenance,
  pub message:  String,
}

/// The dispatcher's state machine, as last observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DispatchStatus {
  Idle,
  Running {
    run_id:     Uuid,
    started_at: DateTime<Utc>,
  },
  Succeeded {
    run_id:              Uuid,
    strategy:            Provenance,
    averages_calculated: usize,
    finished_at:         DateTime<Utc>,
  },
  Failed {
    run_id:      Uuid,
    attempts:    Vec<FailedAttempt>,
    /// The dispatch future was dropped before any strategy succeeded.
    #[serde(default)]
    cancelled:   bool,
    finished_at: DateTime<Utc>,
  },
}

/// Result of a successful [`Dispatcher::dispatch`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchOutcome {
  pub run_id:          Uuid,
  pub strategy:        Provenance,
  pub report:          RunReport,
  /// Strategies that failed before the winning one.
  pub failed_attempts: Vec<FailedAttempt>,
}

// ─── Dispatcher ──────────────────────────────────────────────────────────────

pub struct Dispatcher {
  strategies: Vec<Box<dyn ComputeStrategy>>,
  run_lock:   tokio::sync::Mutex<()>,
  status:     Mutex<DispatchStatus>,
}

impl Dispatcher {
  pub fn new(strategies: Vec<Box<dyn ComputeStrategy>>) -> Self {
    Self {
      strategies,
      run_lock: tokio::sync::Mutex::new(()),
      status: Mutex::new(DispatchStatus::Idle),
    }
  }

  /// The configured strategy order.
  pub fn strategies(&self) -> Vec<Provenance> {
    self.strategies.iter().map(|s| s.provenance()).collect()
  }

  pub fn status(&self) -> DispatchStatus {
    self
      .status
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  fn set_status(&self, status: DispatchStatus) {
    *self.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
  }

  /// Run the strategies in order until one succeeds.
  ///
  /// Concurrent calls queue behind each other. If every strategy fails the
  /// error is [`Error::StrategiesExhausted`], listing each attempt.
  pub async fn dispatch(&self, request: RunRequest) -> Result<DispatchOutcome> {
    let _guard = self.run_lock.lock().await;

    let run_id = Uuid::new_v4();
    self.set_status(DispatchStatus::Running { run_id, started_at: Utc::now() });
    let mut run = RunGuard { dispatcher: self, run_id, attempts: Vec::new(), finished: false };

    let span = info_span!(
      "dispatch",
      %run_id,
      requested_by = request.requested_by.as_deref().unwrap_or("anonymous"),
      classroom_id = request.classroom_id.as_deref().unwrap_or("*"),
    );

    async {
      for strategy in &self.strategies {
        let provenance = strategy.provenance();
        match strategy.compute(&request).await {
          Ok(report) => {
            info!(
              strategy = %provenance,
              classrooms = report.classrooms_processed,
              averages = report.averages_calculated,
              persisted = report.persisted,
              "class averages calculated"
            );
            run.finish(DispatchStatus::Succeeded {
              run_id,
              strategy: provenance,
              averages_calculated: report.averages_calculated,
              finished_at: Utc::now(),
            });
            return Ok(DispatchOutcome {
              run_id,
              strategy: provenance,
              report,
              failed_attempts: std::mem::take(&mut run.attempts),
            });
          }
          Err(error) => {
            warn!(strategy = %provenance, %error, "strategy failed, falling through");
            run.attempts.push(FailedAttempt {
              strategy: provenance,
              message:  error.to_string(),
            });
          }
        }
      }

      let attempts = std::mem::take(&mut run.attempts);
      run.finish(DispatchStatus::Failed {
        run_id,
        attempts: attempts.clone(),
        cancelled: false,
        finished_at: Utc::now(),
      });
      Err(Error::StrategiesExhausted(attempts))
    }
    .instrument(span)
    .await
  }
}

/// Moves the status out of `Running` when a dispatch future is dropped before
/// it finishes, e.g. when the HTTP client that triggered it disconnects.
struct RunGuard<'a> {
  dispatcher: &'a Dispatcher,
  run_id:     Uuid,
  attempts:   Vec<FailedAttempt>,
  finished:   bool,
}

impl RunGuard<'_> {
  fn finish(&mut self, status: DispatchStatus) {
    self.finished = true;
    self.dispatcher.set_status(status);
  }
}

impl Drop for RunGuard<'_> {
  fn drop(&mut self) {
    if self.finished {
      return;
    }
    warn!(run_id = %self.run_id, "dispatch dropped before completion");
    self.dispatcher.set_status(DispatchStatus::Failed {
      run_id:      self.run_id,
      attempts:    std::mem::take(&mut self.attempts),
      cancelled:   true,
      finished_at: Utc::now(),
    });
  }
}

#[cfg(test)]
mod tests {
  use std::{
    sync::{
      Arc,
      atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
  };

  use super::*;

  /// A strategy with a scripted result that counts its invocations.
  struct Scripted {
    provenance: Provenance,
    fail_with:  Option<fn() -> Error>,
    calls:      Arc<AtomicUsize>,
  }

  impl Scripted {
    fn ok(provenance: Provenance) -> (Self, Arc<AtomicUsize>) {
      let calls = Arc::new(AtomicUsize::new(0));
      (Self { provenance, fail_with: None, calls: calls.clone() }, calls)
    }

    fn failing(provenance: Provenance, fail_with: fn() -> Error) -> (Self, Arc<AtomicUsize>) {
      let calls = Arc::new(AtomicUsize::new(0));
      (Self { provenance, fail_with: Some(fail_with), calls: calls.clone() }, calls)
    }
  }

  #[async_trait]
  impl ComputeStrategy for Scripted {
    fn provenance(&self) -> Provenance { self.provenance }

    async fn compute(&self, _request: &RunRequest) -> Result<RunReport> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      if let Some(fail) = self.fail_with {
        return Err(fail());
      }
      Ok(RunReport {
        provenance:           self.provenance,
        classrooms_processed: 1,
        averages_calculated:  0,
        persisted:            true,
        aggregates:           Vec::new(),
      })
    }
  }

  #[tokio::test]
  async fn first_success_wins_and_later_strategies_never_run() {
    let (remote, remote_calls) =
      Scripted::failing(Provenance::Scheduled, || Error::Timeout(Duration::from_secs(30)));
    let (direct, direct_calls) = Scripted::ok(Provenance::Direct);
    let (test_mode, test_calls) = Scripted::ok(Provenance::TestMode);

    let dispatcher =
      Dispatcher::new(vec![Box::new(remote), Box::new(direct), Box::new(test_mode)]);
    let outcome = dispatcher.dispatch(RunRequest::default()).await.unwrap();

    assert_eq!(outcome.strategy, Provenance::Direct);
    assert_eq!(outcome.failed_attempts.len(), 1);
    assert_eq!(outcome.failed_attempts[0].strategy, Provenance::Scheduled);
    assert_eq!(remote_calls.load(Ordering::SeqCst), 1);
    assert_eq!(direct_calls.load(Ordering::SeqCst), 1);
    assert_eq!(test_calls.load(Ordering::SeqCst), 0);
    assert!(matches!(
      dispatcher.status(),
      DispatchStatus::Succeeded { strategy: Provenance::Direct, .. }
    ));
  }

  #[tokio::test]
  async fn all_failures_surface_one_aggregated_error() {
    let (remote, _) = Scripted::failing(Provenance::Scheduled, || {
      Error::Remote("function returned 502".into())
    });
    let (direct, _) = Scripted::failing(Provenance::Direct, || {
      Error::SinkUnavailable("disk I/O error".into())
    });

    let dispatcher = Dispatcher::new(vec![Box::new(remote), Box::new(direct)]);
    let err = dispatcher.dispatch(RunRequest::default()).await.unwrap_err();

    let Error::StrategiesExhausted(attempts) = &err else {
      panic!("unexpected error: {err}");
    };
    assert_eq!(attempts.len(), 2);
    let message = err.to_string();
    assert!(message.contains("scheduled: remote computation failed"), "{message}");
    assert!(message.contains("direct: aggregate store unavailable"), "{message}");
    assert!(matches!(
      dispatcher.status(),
      DispatchStatus::Failed { cancelled: false, .. }
    ));
  }

  /// Sleeps long enough for the caller to drop the run mid-flight.
  struct Stalled;

  #[async_trait]
  impl ComputeStrategy for Stalled {
    fn provenance(&self) -> Provenance { Provenance::Scheduled }

    async fn compute(&self, _request: &RunRequest) -> Result<RunReport> {
      tokio::time::sleep(Duration::from_secs(5)).await;
      Err(Error::Timeout(Duration::from_secs(5)))
    }
  }

  #[tokio::test]
  async fn aborted_run_does_not_stay_running() {
    let dispatcher = Arc::new(Dispatcher::new(vec![Box::new(Stalled)]));

    let handle = tokio::spawn({
      let dispatcher = dispatcher.clone();
      async move { dispatcher.dispatch(RunRequest::default()).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(matches!(dispatcher.status(), DispatchStatus::Running { .. }));

    handle.abort();
    assert!(handle.await.unwrap_err().is_cancelled());
    assert!(matches!(
      dispatcher.status(),
      DispatchStatus::Failed { cancelled: true, .. }
    ));

    // The run lock was released with the dropped future.
    assert!(dispatcher.run_lock.try_lock().is_ok());
  }

  #[tokio::test]
  async fn empty_strategy_list_fails() {
    let dispatcher = Dispatcher::new(Vec::new());
    assert_eq!(dispatcher.status(), DispatchStatus::Idle);
    let err = dispatcher.dispatch(RunRequest::default()).await.unwrap_err();
    assert!(err.to_string().contains("no strategies configured"));
  }
}
