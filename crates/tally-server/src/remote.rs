//! The `scheduled` strategy: ask the remote calculation function to run the
//! pipeline and trust its report.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tally_core::{
  aggregate::Provenance,
  dispatch::{ComputeStrategy, RunReport, RunRequest},
};
use tracing::debug;

use crate::{config::RemoteConfig, error::Result};

/// JSON body sent to the function endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionRequest {
  pub triggered_by: Option<String>,
  pub classroom_id: Option<String>,
}

impl From<&RunRequest> for FunctionRequest {
  fn from(r: &RunRequest) -> Self {
    Self { triggered_by: r.requested_by.clone(), classroom_id: r.classroom_id.clone() }
  }
}

pub struct RemoteStrategy {
  client:  Client,
  url:     String,
  key:     String,
  timeout: Duration,
}

impl RemoteStrategy {
  pub fn new(url: impl Into<String>, key: impl Into<String>, timeout: Duration) -> Result<Self> {
    let client = Client::builder().build()?;
    Ok(Self { client, url: url.into(), key: key.into(), timeout })
  }

  pub fn from_config(cfg: &RemoteConfig) -> Result<Self> {
    Self::new(&cfg.function_url, &cfg.function_key, cfg.timeout())
  }

  async fn call(&self, body: &FunctionRequest) -> tally_core::Result<RunReport> {
    let resp = self
      .client
      .post(&self.url)
      .bearer_auth(&self.key)
      .json(body)
      .send()
      .await
      .map_err(|e| tally_core::Error::Remote(e.to_string()))?;

    let status = resp.status();
    if !status.is_success() {
      let text = resp.text().await.unwrap_or_default();
      return Err(tally_core::Error::Remote(format!("{status}: {text}")));
    }
    resp
      .json()
      .await
      .map_err(|e| tally_core::Error::Remote(format!("unreadable report: {e}")))
  }
}

#[async_trait]
impl ComputeStrategy for RemoteStrategy {
  fn provenance(&self) -> Provenance { Provenance::Scheduled }

  async fn compute(&self, request: &RunRequest) -> tally_core::Result<RunReport> {
    debug!(url = %self.url, "invoking remote calculation");
    let body = FunctionRequest::from(request);
    let report = tokio::time::timeout(self.timeout, self.call(&body))
      .await
      .map_err(|_| tally_core::Error::Timeout(self.timeout))??;

    let stamped = report.provenance == Provenance::Scheduled
      && report
        .aggregates
        .iter()
        .all(|a| a.calculated_by == Provenance::Scheduled);
    if !stamped {
      return Err(tally_core::Error::Remote(format!(
        "function reported provenance {}",
        report.provenance
      )));
    }
    Ok(report)
  }
}
