//! Store traits implemented by storage backends (e.g. `tally-store-sqlite`).
//!
//! The pipeline, the dispatcher strategies and the query layer depend on these
//! abstractions, never on a concrete backend. Clients are constructed once at
//! process start and injected, typically behind an `Arc`.
//!
//! All methods return `Send` futures so the traits can be used in
//! multi-threaded async runtimes (e.g. tokio with `axum`).

use std::future::Future;

use crate::{
  aggregate::{AggregateFilter, ClassSubjectAggregate, ReplaceScope, ReplaceSummary},
  record::{AssessmentRecord, ClassroomInfo, NewAssessment, RecordQuery, RecordSet},
};

// ─── Relational store ────────────────────────────────────────────────────────

/// Read access to assessment records and classroom metadata.
pub trait RecordSource: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Load the records in scope together with every resolvable classroom in
  /// scope. Returns an error, never an empty set, when the store is
  /// unreachable.
  fn load<'a>(
    &'a self,
    query: &'a RecordQuery,
  ) -> impl Future<Output = Result<RecordSet, Self::Error>> + Send + 'a;

  /// Resolve a single classroom with its school. Returns `None` if the
  /// classroom or its school does not exist.
  fn classroom<'a>(
    &'a self,
    classroom_id: &'a str,
  ) -> impl Future<Output = Result<Option<ClassroomInfo>, Self::Error>> + Send + 'a;

  /// Ids of the classrooms assigned to `teacher_id`.
  fn classrooms_for_teacher<'a>(
    &'a self,
    teacher_id: &'a str,
  ) -> impl Future<Output = Result<Vec<String>, Self::Error>> + Send + 'a;
}

/// Append access to assessment records.
pub trait AssessmentLog: RecordSource {
  /// Persist a validated assessment for an already-resolved classroom. The
  /// record's `school_id` is taken from `classroom`.
  fn record<'a>(
    &'a self,
    input: NewAssessment,
    classroom: &'a ClassroomInfo,
  ) -> impl Future<Output = Result<AssessmentRecord, Self::Error>> + Send + 'a;
}

// ─── Analytics store ─────────────────────────────────────────────────────────

/// Keyed storage for computed aggregates.
pub trait AggregateStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Atomically make the rows inside `scope` equal to `aggregates`.
  ///
  /// Rows in scope whose key is absent from `aggregates` are deleted; every
  /// row in `aggregates` is upserted by key. Both happen in one atomic unit,
  /// so concurrent readers observe either the old or the new rows, never an
  /// empty or half-written scope. Implementations must not assume the store
  /// starts empty.
  fn replace<'a>(
    &'a self,
    scope: &'a ReplaceScope,
    aggregates: &'a [ClassSubjectAggregate],
  ) -> impl Future<Output = Result<ReplaceSummary, Self::Error>> + Send + 'a;

  /// Rows matching `filter`, most recently updated first.
  fn list<'a>(
    &'a self,
    filter: &'a AggregateFilter,
  ) -> impl Future<Output = Result<Vec<ClassSubjectAggregate>, Self::Error>> + Send + 'a;
}
