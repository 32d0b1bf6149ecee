//! Periodic dispatcher runs.

use std::{sync::Arc, time::Duration};

use tally_core::dispatch::{Dispatcher, RunRequest};
use tokio::{
  task::JoinHandle,
  time::{MissedTickBehavior, interval},
};
use tracing::{info, warn};

/// Identity recorded on runs started by the timer.
pub const SCHEDULER_ID: &str = "scheduler";

/// Dispatch a full recomputation every `every`, starting one period from now.
pub fn spawn_scheduler(dispatcher: Arc<Dispatcher>, every: Duration) -> JoinHandle<()> {
  tokio::spawn(async move {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
      ticker.tick().await;
      let request = RunRequest { requested_by: Some(SCHEDULER_ID.to_owned()), classroom_id: None };
      match dispatcher.dispatch(request).await {
        Ok(outcome) => info!(
          run_id = %outcome.run_id,
          strategy = %outcome.strategy,
          averages = outcome.report.averages_calculated,
          "scheduled run finished"
        ),
        Err(e) => warn!(error = %e, "scheduled run failed"),
      }
    }
  })
}

#[cfg(test)]
mod tests {
  use tally_core::{
    aggregate::Provenance,
    dispatch::DispatchStatus,
    memory::{MemoryAverages, MemoryRecords},
    pipeline::{DirectStrategy, PipelineOptions},
    store::AggregateStore,
  };

  use super::*;

  #[tokio::test]
  async fn runs_on_the_interval() {
    let records = MemoryRecords::new();
    records.add_school("sch1", "Hillside");
    records.add_classroom("C1", "7A", "sch1", None);
    records.add_record("r1", "S1", "C1", "Algebra", 40.0, 50.0);
    let records = Arc::new(records);
    let averages = Arc::new(MemoryAverages::new());

    let dispatcher = Arc::new(Dispatcher::new(vec![Box::new(DirectStrategy::new(
      records,
      averages.clone(),
      PipelineOptions::default(),
    ))]));

    let handle = spawn_scheduler(dispatcher.clone(), Duration::from_millis(20));
    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.abort();

    assert!(matches!(
      dispatcher.status(),
      DispatchStatus::Succeeded { strategy: Provenance::Direct, .. }
    ));
    let rows = averages.list(&Default::default()).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].average_score, 80.0);
  }
}
