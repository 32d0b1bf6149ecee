//! The in-process pipeline: Record Reader → Aggregator → Aggregate Store
//! Writer, and the two dispatcher strategies built on it.

use std::{collections::BTreeSet, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
  Error, Result,
  aggregate::{KeyMode, Provenance, ReplaceScope, RunStamp},
  aggregator::{Aggregation, aggregate},
  dispatch::{ComputeStrategy, RunReport, RunRequest},
  record::RecordQuery,
  store::{AggregateStore, RecordSource},
};

/// Lookback applied in [`KeyMode::Monthly`] when none is configured.
pub const DEFAULT_MONTHLY_LOOKBACK_DAYS: u32 = 30;

// ─── Options ─────────────────────────────────────────────────────────────────

/// How records are selected and keyed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineOptions {
  #[serde(default)]
  pub key_mode:      KeyMode,
  /// Only aggregate records from the last `n` days. Defaults to
  /// [`DEFAULT_MONTHLY_LOOKBACK_DAYS`] in monthly mode and to no limit
  /// otherwise.
  #[serde(default)]
  pub lookback_days: Option<u32>,
}

impl PipelineOptions {
  pub fn effective_lookback_days(&self) -> Option<u32> {
    match self.key_mode {
      KeyMode::Monthly => Some(self.lookback_days.unwrap_or(DEFAULT_MONTHLY_LOOKBACK_DAYS)),
      KeyMode::ClassSubject => self.lookback_days,
    }
  }

  pub fn record_query(&self, classroom_id: Option<String>, now: DateTime<Utc>) -> RecordQuery {
    let since = self.effective_lookback_days().map(|days| {
      now
        .date_naive()
        .checked_sub_days(Days::new(u64::from(days)))
        .unwrap_or(NaiveDate::MIN)
    });
    RecordQuery { classroom_id, since }
  }
}

// ─── Computation ─────────────────────────────────────────────────────────────

/// The read-and-aggregate half of a run, before anything is written.
#[derive(Debug, Clone)]
pub struct Computation {
  pub stamp:                RunStamp,
  /// The key space this run owns in the analytics store.
  pub scope:                ReplaceScope,
  pub classrooms_processed: usize,
  pub aggregation:          Aggregation,
}

impl Computation {
  pub fn into_report(self, persisted: bool) -> RunReport {
    RunReport {
      provenance: self.stamp.provenance,
      classrooms_processed: self.classrooms_processed,
      averages_calculated: self.aggregation.aggregates.len(),
      persisted,
      aggregates: self.aggregation.aggregates,
    }
  }
}

/// Read the records in scope and aggregate them.
///
/// A store failure is [`Error::SourceUnavailable`]; zero records is a valid,
/// empty computation.
pub async fn compute<R>(
  records: &R,
  options: &PipelineOptions,
  request: &RunRequest,
  provenance: Provenance,
) -> Result<Computation>
where
  R: RecordSource,
{
  let now = Utc::now();
  let stamp = RunStamp::new(options.key_mode, provenance, now);
  let query = options.record_query(request.classroom_id.clone(), now);

  let set = records.load(&query).await.map_err(Error::source_unavailable)?;
  let aggregation = aggregate(&set.records, &set.classrooms, &stamp);

  let retain: BTreeSet<String> = set
    .unresolved
    .into_iter()
    .chain(aggregation.unresolved_classrooms.iter().cloned())
    .collect();

  let scope = ReplaceScope {
    classroom_id: request.classroom_id.clone(),
    period:       stamp.period.clone(),
    retain:       retain.into_iter().collect(),
  };

  Ok(Computation {
    classrooms_processed: set.classrooms.len(),
    stamp,
    scope,
    aggregation,
  })
}

// ─── Strategies ──────────────────────────────────────────────────────────────

/// Compute in-process and replace the run's scope in the analytics store.
pub struct DirectStrategy<R, A> {
  records:    Arc<R>,
  averages:   Arc<A>,
  options:    PipelineOptions,
  provenance: Provenance,
}

impl<R, A> DirectStrategy<R, A>
where
  R: RecordSource,
  A: AggregateStore,
{
  pub fn new(records: Arc<R>, averages: Arc<A>, options: PipelineOptions) -> Self {
    Self { records, averages, options, provenance: Provenance::Direct }
  }

  /// Stamp rows with a different tag, e.g. when this pipeline runs behind the
  /// remote function endpoint.
  pub fn with_provenance(mut self, provenance: Provenance) -> Self {
    self.provenance = provenance;
    self
  }
}

#[async_trait]
impl<R, A> ComputeStrategy for DirectStrategy<R, A>
where
  R: RecordSource + 'static,
  A: AggregateStore + 'static,
{
  fn provenance(&self) -> Provenance { self.provenance }

  async fn compute(&self, request: &RunRequest) -> Result<RunReport> {
    let computation =
      compute(self.records.as_ref(), &self.options, request, self.provenance).await?;

    let summary = self
      .averages
      .replace(&computation.scope, &computation.aggregation.aggregates)
      .await
      .map_err(Error::sink_unavailable)?;

    info!(
      upserted = summary.upserted,
      deleted = summary.deleted,
      "analytics store updated"
    );
    Ok(computation.into_report(true))
  }
}

/// Compute without persistence, for environments with no analytics store.
pub struct TestModeStrategy<R> {
  records: Arc<R>,
  options: PipelineOptions,
}

impl<R: RecordSource> TestModeStrategy<R> {
  pub fn new(records: Arc<R>, options: PipelineOptions) -> Self { Self { records, options } }
}

#[async_trait]
impl<R> ComputeStrategy for TestModeStrategy<R>
where
  R: RecordSource + 'static,
{
  fn provenance(&self) -> Provenance { Provenance::TestMode }

  async fn compute(&self, request: &RunRequest) -> Result<RunReport> {
    let computation =
      compute(self.records.as_ref(), &self.options, request, Provenance::TestMode).await?;
    Ok(computation.into_report(false))
  }
}
