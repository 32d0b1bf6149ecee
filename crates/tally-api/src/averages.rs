//! Handlers for `/class-averages` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/class-averages` | Optional `?classroom_id&school_id&subject&period` |
//! | `POST` | `/class-averages/calculate` | Optional `{"classroom_id":"..."}`; runs dispatch |
//! | `GET`  | `/class-averages/preview` | Same filters as the list; computes without persisting |
//! | `GET`  | `/class-averages/status` | Last dispatcher state and strategy order |

use axum::{
  Json,
  body::Bytes,
  extract::{Query, State, rejection::QueryRejection},
};
use serde::{Deserialize, Serialize};
use tally_core::{
  access::{Caller, Role},
  aggregate::{AggregateFilter, ClassSubjectAggregate, Provenance, sort_newest_first},
  dispatch::{ComputeStrategy, DispatchStatus, FailedAttempt, RunRequest},
  pipeline::TestModeStrategy,
  store::{AggregateStore, RecordSource},
};
use uuid::Uuid;

use crate::{ApiState, error::ApiError, session::Session};

// ─── List ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
  pub classroom_id: Option<String>,
  pub school_id:    Option<String>,
  pub subject:      Option<String>,
  /// `YYYY-MM`; only meaningful in monthly key mode.
  pub period:       Option<String>,
}

impl From<ListParams> for AggregateFilter {
  fn from(p: ListParams) -> Self {
    AggregateFilter {
      classroom_id:  p.classroom_id,
      school_id:     p.school_id,
      subject:       p.subject,
      period:        p.period,
      classroom_ids: None,
    }
  }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListResponse {
  pub success:         bool,
  pub data:            Vec<ClassSubjectAggregate>,
  pub count:           usize,
  pub user_role:       Role,
  pub applied_filters: AggregateFilter,
}

/// `GET /class-averages[?classroom_id=...][&school_id=...][&subject=...][&period=...]`
pub async fn list<R, A>(
  State(state): State<ApiState<R, A>>,
  Session(caller): Session,
  params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<ListResponse>, ApiError>
where
  R: RecordSource + 'static,
  A: AggregateStore + 'static,
{
  let Query(params) = params?;
  let result = state.reader.query(&caller, params.into()).await?;

  Ok(Json(ListResponse {
    success:         true,
    data:            result.aggregates,
    count:           result.count,
    user_role:       result.role,
    applied_filters: result.applied_filters,
  }))
}

// ─── Calculate ────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct CalculateBody {
  /// Recompute a single classroom; omitted recomputes everything.
  pub classroom_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CalculateResponse {
  pub success:              bool,
  /// The strategy that produced the results.
  pub method:               Provenance,
  pub run_id:               Uuid,
  pub classrooms_processed: usize,
  pub averages_calculated:  usize,
  pub persisted:            bool,
  pub failed_attempts:      Vec<FailedAttempt>,
  pub results:              Vec<ClassSubjectAggregate>,
}

/// `POST /class-averages/calculate`. The body is optional.
pub async fn calculate<R, A>(
  State(state): State<ApiState<R, A>>,
  Session(caller): Session,
  body: Bytes,
) -> Result<Json<CalculateResponse>, ApiError>
where
  R: RecordSource + 'static,
  A: AggregateStore + 'static,
{
  caller.require_staff()?;

  let body: CalculateBody = if body.iter().all(u8::is_ascii_whitespace) {
    CalculateBody::default()
  } else {
    serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?
  };

  if let Some(id) = &body.classroom_id {
    check_classroom(&state, &caller, id).await?;
  }

  let outcome = state
    .dispatcher
    .dispatch(RunRequest {
      requested_by: Some(caller.user_id.clone()),
      classroom_id: body.classroom_id,
    })
    .await?;

  Ok(Json(CalculateResponse {
    success:              true,
    method:               outcome.strategy,
    run_id:               outcome.run_id,
    classrooms_processed: outcome.report.classrooms_processed,
    averages_calculated:  outcome.report.averages_calculated,
    persisted:            outcome.report.persisted,
    failed_attempts:      outcome.failed_attempts,
    results:              outcome.report.aggregates,
  }))
}

/// A named classroom must exist, and teachers may only name their own.
async fn check_classroom<R, A>(
  state: &ApiState<R, A>,
  caller: &Caller,
  classroom_id: &str,
) -> Result<(), ApiError>
where
  R: RecordSource + 'static,
  A: AggregateStore + 'static,
{
  let filter =
    AggregateFilter { classroom_id: Some(classroom_id.to_owned()), ..Default::default() };
  state.reader.visible_filter(caller, filter).await?;

  state
    .records
    .classroom(classroom_id)
    .await
    .map_err(tally_core::Error::source_unavailable)?
    .ok_or_else(|| ApiError::NotFound(format!("classroom {classroom_id} not found")))?;
  Ok(())
}

// ─── Preview ──────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct PreviewResponse {
  pub success:         bool,
  pub method:          Provenance,
  pub data:            Vec<ClassSubjectAggregate>,
  pub count:           usize,
  pub user_role:       Role,
  pub applied_filters: AggregateFilter,
}

/// `GET /class-averages/preview`: compute in test mode and return the rows
/// the caller could see, without touching the analytics store.
pub async fn preview<R, A>(
  State(state): State<ApiState<R, A>>,
  Session(caller): Session,
  params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<PreviewResponse>, ApiError>
where
  R: RecordSource + 'static,
  A: AggregateStore + 'static,
{
  let Query(params) = params?;
  let filter = state.reader.visible_filter(&caller, params.into()).await?;

  let strategy = TestModeStrategy::new(state.records.clone(), state.options);
  let report = strategy
    .compute(&RunRequest {
      requested_by: Some(caller.user_id.clone()),
      classroom_id: filter.classroom_id.clone(),
    })
    .await?;

  let mut data: Vec<_> = report
    .aggregates
    .into_iter()
    .filter(|a| filter.matches(a))
    .collect();
  sort_newest_first(&mut data);

  Ok(Json(PreviewResponse {
    success: true,
    method: Provenance::TestMode,
    count: data.len(),
    data,
    user_role: caller.role,
    applied_filters: filter,
  }))
}

// ─── Status ───────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
  pub success:    bool,
  pub status:     DispatchStatus,
  /// The order strategies are tried in.
  pub strategies: Vec<Provenance>,
}

/// `GET /class-averages/status`
pub async fn status<R, A>(
  State(state): State<ApiState<R, A>>,
  Session(caller): Session,
) -> Result<Json<StatusResponse>, ApiError>
where
  R: RecordSource + 'static,
  A: AggregateStore + 'static,
{
  caller.require_staff()?;
  Ok(Json(StatusResponse {
    success:    true,
    status:     state.dispatcher.status(),
    strategies: state.dispatcher.strategies(),
  }))
}
