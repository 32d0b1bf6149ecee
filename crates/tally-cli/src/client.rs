//! Async HTTP client wrapping the Tally JSON API.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tally_core::{
  access::Role,
  aggregate::{AggregateFilter, ClassSubjectAggregate, Provenance},
  dispatch::{DispatchStatus, FailedAttempt},
  record::AssessmentRecord,
};
use tracing::debug;

/// Connection settings for the Tally API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
  pub base_url: String,
  pub user_id:  String,
  pub role:     Role,
}

// ─── Response shapes ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AveragesPage {
  pub data:            Vec<ClassSubjectAggregate>,
  pub count:           usize,
  pub user_role:       Role,
  pub applied_filters: AggregateFilter,
}

#[derive(Debug, Deserialize)]
pub struct CalculateReport {
  pub method:               Provenance,
  pub classrooms_processed: usize,
  pub averages_calculated:  usize,
  pub persisted:            bool,
  pub failed_attempts:      Vec<FailedAttempt>,
  pub results:              Vec<ClassSubjectAggregate>,
}

#[derive(Debug, Deserialize)]
pub struct RunStatus {
  pub status:     DispatchStatus,
  pub strategies: Vec<Provenance>,
}

#[derive(Debug, Deserialize)]
struct Stored {
  data: AssessmentRecord,
}

#[derive(Debug, Deserialize)]
struct Failure {
  error: String,
}

/// Body of `POST /api/progress`.
#[derive(Debug, Clone, Serialize)]
pub struct NewRecord {
  pub student_id:      String,
  pub classroom_id:    String,
  pub subject:         String,
  pub marks:           f64,
  pub max_marks:       f64,
  pub assessment_date: NaiveDate,
}

// ─── Client ──────────────────────────────────────────────────────────────────

/// Async HTTP client for the Tally JSON REST API.
///
/// Cheap to clone; the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct ApiClient {
  client: Client,
  config: ApiConfig,
}

impl ApiClient {
  pub fn new(config: ApiConfig) -> Result<Self> {
    let client = Client::builder()
      .timeout(Duration::from_secs(30))
      .build()
      .context("failed to build HTTP client")?;
    Ok(Self { client, config })
  }

  fn url(&self, path: &str) -> String {
    format!("{}/api{}", self.config.base_url.trim_end_matches('/'), path)
  }

  fn identity(&self, req: RequestBuilder) -> RequestBuilder {
    req
      .header("x-user-id", &self.config.user_id)
      .header("x-user-role", self.config.role.as_str())
  }

  /// Turn a non-2xx response into an error carrying the server's message.
  async fn read<T: DeserializeOwned>(what: &str, resp: Response) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
      let message = resp
        .json::<Failure>()
        .await
        .map(|f| f.error)
        .unwrap_or_default();
      return Err(anyhow!("{what} → {status} {message}"));
    }
    resp.json().await.with_context(|| format!("deserialising {what} response"))
  }

  /// `GET /api/class-averages[?...]`, or the preview when `preview` is set.
  pub async fn averages(&self, filter: &AggregateFilter, preview: bool) -> Result<AveragesPage> {
    let path = if preview { "/class-averages/preview" } else { "/class-averages" };
    let query: Vec<(&str, &str)> = [
      ("classroom_id", &filter.classroom_id),
      ("school_id", &filter.school_id),
      ("subject", &filter.subject),
      ("period", &filter.period),
    ]
    .into_iter()
    .filter_map(|(k, v)| v.as_deref().map(|v| (k, v)))
    .collect();

    debug!(path, ?query, "listing averages");
    let resp = self
      .identity(self.client.get(self.url(path)))
      .query(&query)
      .send()
      .await
      .with_context(|| format!("GET {path} failed"))?;
    Self::read(path, resp).await
  }

  /// `POST /api/class-averages/calculate`
  pub async fn calculate(&self, classroom_id: Option<&str>) -> Result<CalculateReport> {
    let resp = self
      .identity(self.client.post(self.url("/class-averages/calculate")))
      .json(&serde_json::json!({ "classroom_id": classroom_id }))
      .send()
      .await
      .context("POST /class-averages/calculate failed")?;
    Self::read("calculate", resp).await
  }

  /// `GET /api/class-averages/status`
  pub async fn status(&self) -> Result<RunStatus> {
    let resp = self
      .identity(self.client.get(self.url("/class-averages/status")))
      .send()
      .await
      .context("GET /class-averages/status failed")?;
    Self::read("status", resp).await
  }

  /// `POST /api/progress`
  pub async fn add_record(&self, record: &NewRecord) -> Result<AssessmentRecord> {
    let resp = self
      .identity(self.client.post(self.url("/progress")))
      .json(record)
      .send()
      .await
      .context("POST /progress failed")?;
    Self::read::<Stored>("progress", resp).await.map(|s| s.data)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn client(base_url: &str) -> ApiClient {
    ApiClient::new(ApiConfig {
      base_url: base_url.to_owned(),
      user_id:  "h1".to_owned(),
      role:     Role::HeadTeacher,
    })
    .unwrap()
  }

  #[test]
  fn url_joins_api_prefix() {
    let expected = "http://localhost:8080/api/progress";
    assert_eq!(client("http://localhost:8080").url("/progress"), expected);
    assert_eq!(client("http://localhost:8080/").url("/progress"), expected);
  }

  #[test]
  fn identity_headers_are_attached() {
    let c = client("http://localhost:8080");
    let req = c.identity(c.client.get(c.url("/class-averages"))).build().unwrap();
    assert_eq!(req.headers()["x-user-id"], "h1");
    assert_eq!(req.headers()["x-user-role"], "head_teacher");
  }
}
