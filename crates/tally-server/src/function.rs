//! The calculation function endpoint called by the `scheduled` strategy.
//!
//! `POST /functions/calculate-class-averages` with `Authorization: Bearer
//! <key>` runs the in-process pipeline, stamps every row `scheduled`, and
//! answers with the [`RunReport`]. It does not go through the dispatcher, so a
//! dispatcher run waiting on this endpoint cannot block it.

use std::sync::Arc;

use argon2::{Argon2, PasswordHash, PasswordVerifier};
use axum::{
  Json, Router,
  extract::{FromRequestParts, State, rejection::JsonRejection},
  http::{HeaderMap, header, request::Parts},
  routing::post,
};
use tally_api::ApiError;
use tally_core::{
  aggregate::Provenance,
  dispatch::{ComputeStrategy, RunReport, RunRequest},
  pipeline::{DirectStrategy, PipelineOptions},
  store::{AggregateStore, RecordSource},
};
use tracing::info;

use crate::remote::FunctionRequest;

pub const FUNCTION_PATH: &str = "/functions/calculate-class-averages";

pub struct FunctionState<R, A> {
  pipeline: Arc<DirectStrategy<R, A>>,
  /// PHC string produced by argon2, e.g. `$argon2id$v=19$…`
  key_hash: Arc<str>,
}

impl<R, A> Clone for FunctionState<R, A> {
  fn clone(&self) -> Self {
    Self { pipeline: self.pipeline.clone(), key_hash: self.key_hash.clone() }
  }
}

/// Zero-size marker: present in the handler means the bearer key checked out.
pub struct FunctionKey;

/// Verify the bearer key in `headers` against `key_hash`.
pub fn verify_bearer(headers: &HeaderMap, key_hash: &str) -> Result<(), ApiError> {
  let denied = || ApiError::Unauthorized("invalid function key".to_owned());

  let key = headers
    .get(header::AUTHORIZATION)
    .and_then(|v| v.to_str().ok())
    .and_then(|v| v.strip_prefix("Bearer "))
    .ok_or_else(denied)?;

  let parsed_hash = PasswordHash::new(key_hash).map_err(|_| denied())?;

  Argon2::default()
    .verify_password(key.as_bytes(), &parsed_hash)
    .map_err(|_| denied())
}

impl<R, A> FromRequestParts<FunctionState<R, A>> for FunctionKey
where
  R: Send + Sync,
  A: Send + Sync,
{
  type Rejection = ApiError;

  async fn from_request_parts(
    parts: &mut Parts,
    state: &FunctionState<R, A>,
  ) -> Result<Self, Self::Rejection> {
    verify_bearer(&parts.headers, &state.key_hash)?;
    Ok(FunctionKey)
  }
}

async fn run<R, A>(
  State(state): State<FunctionState<R, A>>,
  _key: FunctionKey,
  body: Result<Json<FunctionRequest>, JsonRejection>,
) -> Result<Json<RunReport>, ApiError>
where
  R: RecordSource + 'static,
  A: AggregateStore + 'static,
{
  let Json(body) = body?;
  let request = RunRequest { requested_by: body.triggered_by, classroom_id: body.classroom_id };

  let report = state.pipeline.compute(&request).await?;
  info!(
    averages = report.averages_calculated,
    requested_by = request.requested_by.as_deref().unwrap_or("-"),
    "function run finished"
  );
  Ok(Json(report))
}

/// Build the function router. Mount it only when a key hash is configured.
pub fn function_router<R, A>(
  records: Arc<R>,
  averages: Arc<A>,
  options: PipelineOptions,
  key_hash: &str,
) -> Router<()>
where
  R: RecordSource + 'static,
  A: AggregateStore + 'static,
{
  let pipeline =
    DirectStrategy::new(records, averages, options).with_provenance(Provenance::Scheduled);
  let state = FunctionState { pipeline: Arc::new(pipeline), key_hash: Arc::from(key_hash) };

  Router::new()
    .route(FUNCTION_PATH, post(run::<R, A>))
    .with_state(state)
}
