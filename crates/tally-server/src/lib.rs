//! HTTP server wiring for Tally.
//!
//! Composes the JSON API, the optional calculation function endpoint, and the
//! strategy list the dispatcher runs, all from a [`ServerConfig`].

pub mod config;
pub mod error;
pub mod function;
pub mod remote;
pub mod scheduler;

use std::sync::Arc;

use axum::Router;
use tally_api::{ApiState, api_router};
use tally_core::{
  aggregate::Provenance,
  dispatch::{ComputeStrategy, Dispatcher},
  pipeline::{DirectStrategy, TestModeStrategy},
  store::{AggregateStore, AssessmentLog, RecordSource},
};
use tower_http::trace::TraceLayer;
use tracing::warn;

pub use crate::config::ServerConfig;
pub use crate::error::Error;

use crate::{function::function_router, remote::RemoteStrategy};

/// Instantiate the configured strategies, in order.
///
/// `scheduled` is skipped with a warning when no `[remote]` section is set.
pub fn build_strategies<R, A>(
  cfg: &ServerConfig,
  records: Arc<R>,
  averages: Arc<A>,
) -> error::Result<Vec<Box<dyn ComputeStrategy>>>
where
  R: RecordSource + 'static,
  A: AggregateStore + 'static,
{
  let options = cfg.pipeline_options();
  let mut strategies: Vec<Box<dyn ComputeStrategy>> = Vec::with_capacity(cfg.strategies.len());

  for provenance in &cfg.strategies {
    match provenance {
      Provenance::Scheduled => match &cfg.remote {
        Some(remote) => strategies.push(Box::new(RemoteStrategy::from_config(remote)?)),
        None => warn!("strategy `scheduled` has no [remote] section; skipping it"),
      },
      Provenance::Direct => strategies.push(Box::new(DirectStrategy::new(
        records.clone(),
        averages.clone(),
        options,
      ))),
      Provenance::TestMode => {
        strategies.push(Box::new(TestModeStrategy::new(records.clone(), options)))
      }
    }
  }

  if strategies.is_empty() {
    return Err(Error::NoStrategies);
  }
  Ok(strategies)
}

/// Build the complete application router.
pub fn app<R, A>(
  cfg: &ServerConfig,
  records: Arc<R>,
  averages: Arc<A>,
  dispatcher: Arc<Dispatcher>,
) -> Router
where
  R: AssessmentLog + 'static,
  A: AggregateStore + 'static,
{
  let options = cfg.pipeline_options();
  let state = ApiState::new(records.clone(), averages.clone(), dispatcher, options);
  let mut router = Router::new().nest("/api", api_router(state));

  if let Some(key_hash) = &cfg.function_key_hash {
    router = router.merge(function_router(records, averages, options, key_hash));
  }

  router.layer(TraceLayer::new_for_http())
}

// ─── Integration tests ────────────────────────────────────────────────────────
