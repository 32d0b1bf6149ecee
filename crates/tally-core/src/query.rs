//! The read path: role-filtered access to computed aggregates.
//!
//! Reads go straight to the analytics store and never wait on a running
//! computation; they see whatever the last committed replace left behind.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
  Error, Result,
  access::{Caller, Role},
  aggregate::{AggregateFilter, ClassSubjectAggregate},
  store::{AggregateStore, RecordSource},
};

/// Result of [`AggregateReader::query`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
  pub aggregates:      Vec<ClassSubjectAggregate>,
  pub count:           usize,
  pub role:            Role,
  /// The filter actually applied, including any teacher scoping.
  pub applied_filters: AggregateFilter,
}

pub struct AggregateReader<A, R> {
  averages: Arc<A>,
  records:  Arc<R>,
}

impl<A, R> Clone for AggregateReader<A, R> {
  fn clone(&self) -> Self {
    Self { averages: self.averages.clone(), records: self.records.clone() }
  }
}

impl<A, R> AggregateReader<A, R>
where
  A: AggregateStore,
  R: RecordSource,
{
  pub fn new(averages: Arc<A>, records: Arc<R>) -> Self { Self { averages, records } }

  /// List aggregates visible to `caller`, newest first.
  ///
  /// Students are refused. Head teachers see everything matching `filter`.
  /// Teachers only see classrooms assigned to them; naming a classroom they
  /// are not assigned is refused rather than silently returning nothing.
  pub async fn query(&self, caller: &Caller, filter: AggregateFilter) -> Result<QueryResult> {
    let filter = self.visible_filter(caller, filter).await?;

    let aggregates = self
      .averages
      .list(&filter)
      .await
      .map_err(Error::sink_unavailable)?;

    debug!(
      user_id = %caller.user_id,
      role = %caller.role,
      count = aggregates.len(),
      "class averages listed"
    );

    Ok(QueryResult {
      count: aggregates.len(),
      aggregates,
      role: caller.role,
      applied_filters: filter,
    })
  }

  /// Narrow `filter` to what `caller` may see.
  pub async fn visible_filter(
    &self,
    caller: &Caller,
    mut filter: AggregateFilter,
  ) -> Result<AggregateFilter> {
    caller.require_staff()?;
    // Only ever set here.
    filter.classroom_ids = None;

    if caller.role != Role::Teacher {
      return Ok(filter);
    }

    let assigned = self
      .records
      .classrooms_for_teacher(&caller.user_id)
      .await
      .map_err(Error::source_unavailable)?;

    if let Some(id) = &filter.classroom_id {
      if !assigned.contains(id) {
        return Err(Error::InsufficientPermissions(format!(
          "classroom {id} is not assigned to this teacher"
        )));
      }
    }

    filter.classroom_ids = Some(assigned);
    Ok(filter)
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use super::*;
  use crate::{
    dispatch::{ComputeStrategy, RunRequest},
    memory::{MemoryAverages, MemoryRecords},
    pipeline::{DirectStrategy, PipelineOptions},
  };

  async fn fixture() -> AggregateReader<MemoryAverages, MemoryRecords> {
    let records = MemoryRecords::new();
    records.add_school("sch1", "Hillside");
    records.add_school("sch2", "Riverside");
    records.add_classroom("C1", "7A", "sch1", Some("t1"));
    records.add_classroom("C2", "7B", "sch1", Some("t2"));
    records.add_classroom("C3", "9A", "sch2", Some("t1"));
    records.add_record("r1", "S1", "C1", "Algebra", 80.0, 100.0);
    records.add_record("r2", "S2", "C2", "Algebra", 60.0, 100.0);
    records.add_record("r3", "S3", "C3", "Biology", 70.0, 100.0);
    let records = Arc::new(records);
    let averages = Arc::new(MemoryAverages::new());

    let direct = DirectStrategy::new(records.clone(), averages.clone(), PipelineOptions::default());
    direct.compute(&RunRequest::default()).await.unwrap();

    AggregateReader::new(averages, records)
  }

  #[tokio::test]
  async fn students_are_refused() {
    let reader = fixture().await;
    let err = reader
      .query(&Caller::new("s1", Role::Student), AggregateFilter::default())
      .await
      .unwrap_err();
    assert!(matches!(err, Error::InsufficientPermissions(_)));
  }

  #[tokio::test]
  async fn head_teacher_sees_everything_and_can_filter_by_school() {
    let reader = fixture().await;
    let head = Caller::new("h1", Role::HeadTeacher);

    let all = reader.query(&head, AggregateFilter::default()).await.unwrap();
    assert_eq!(all.count, 3);
    assert_eq!(all.role, Role::HeadTeacher);

    let filter = AggregateFilter { school_id: Some("sch2".into()), ..Default::default() };
    let one = reader.query(&head, filter).await.unwrap();
    assert_eq!(one.count, 1);
    assert_eq!(one.aggregates[0].classroom_id, "C3");
    assert_eq!(one.applied_filters.school_id.as_deref(), Some("sch2"));
  }

  #[tokio::test]
  async fn teacher_sees_only_assigned_classrooms() {
    let reader = fixture().await;
    let teacher = Caller::new("t1", Role::Teacher);

    let result = reader.query(&teacher, AggregateFilter::default()).await.unwrap();
    let mut ids: Vec<_> = result.aggregates.iter().map(|a| a.classroom_id.clone()).collect();
    ids.sort();
    assert_eq!(ids, vec!["C1", "C3"]);
    assert_eq!(result.applied_filters.classroom_ids.as_ref().map(Vec::len), Some(2));
  }

  #[tokio::test]
  async fn teacher_cannot_name_a_foreign_classroom() {
    let reader = fixture().await;
    let teacher = Caller::new("t1", Role::Teacher);
    let filter = AggregateFilter { classroom_id: Some("C2".into()), ..Default::default() };
    let err = reader.query(&teacher, filter).await.unwrap_err();
    assert!(matches!(err, Error::InsufficientPermissions(_)));
  }

  #[tokio::test]
  async fn teacher_without_classrooms_gets_nothing() {
    let reader = fixture().await;
    let result = reader
      .query(&Caller::new("t9", Role::Teacher), AggregateFilter::default())
      .await
      .unwrap();
    assert_eq!(result.count, 0);
  }

  #[tokio::test]
  async fn caller_supplied_classroom_ids_are_ignored() {
    let reader = fixture().await;
    let filter = AggregateFilter { classroom_ids: Some(vec!["C2".into()]), ..Default::default() };
    let result = reader.query(&Caller::new("t1", Role::Teacher), filter).await.unwrap();
    assert!(result.aggregates.iter().all(|a| a.classroom_id != "C2"));
  }

  #[tokio::test]
  async fn newest_rows_come_first() {
    let reader = fixture().await;
    let head = Caller::new("h1", Role::HeadTeacher);

    tokio::time::sleep(Duration::from_millis(5)).await;
    let direct = DirectStrategy::new(
      reader.records.clone(),
      reader.averages.clone(),
      PipelineOptions::default(),
    );
    let request = RunRequest { classroom_id: Some("C2".into()), ..Default::default() };
    direct.compute(&request).await.unwrap();

    let result = reader.query(&head, AggregateFilter::default()).await.unwrap();
    assert_eq!(result.aggregates[0].classroom_id, "C2");
    assert!(
      result
        .aggregates
        .windows(2)
        .all(|w| w[0].last_updated >= w[1].last_updated)
    );
  }
}
