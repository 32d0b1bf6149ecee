//! JSON REST API for Tally.
//!
//! Exposes an axum [`Router`] backed by any [`AssessmentLog`] and
//! [`AggregateStore`]. Authentication happens upstream: the fronting session
//! layer passes the caller's identity in the `x-user-id` and `x-user-role`
//! headers (see [`session`]).
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", tally_api::api_router(state.clone()))
//! ```

pub mod averages;
pub mod error;
pub mod progress;
pub mod session;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, post},
};
use tally_core::{
  dispatch::Dispatcher,
  pipeline::PipelineOptions,
  query::AggregateReader,
  store::{AggregateStore, AssessmentLog, RecordSource},
};

pub use error::ApiError;

// ─── Application state ────────────────────────────────────────────────────────

/// Shared state threaded through all API handlers.
pub struct ApiState<R, A> {
  pub records:    Arc<R>,
  pub reader:     AggregateReader<A, R>,
  pub dispatcher: Arc<Dispatcher>,
  /// Used by the preview endpoint, which computes outside the dispatcher.
  pub options:    PipelineOptions,
}

impl<R, A> Clone for ApiState<R, A> {
  fn clone(&self) -> Self {
    Self {
      records:    self.records.clone(),
      reader:     self.reader.clone(),
      dispatcher: self.dispatcher.clone(),
      options:    self.options,
    }
  }
}

impl<R, A> ApiState<R, A>
where
  R: RecordSource,
  A: AggregateStore,
{
  pub fn new(
    records: Arc<R>,
    averages: Arc<A>,
    dispatcher: Arc<Dispatcher>,
    options: PipelineOptions,
  ) -> Self {
    Self {
      reader: AggregateReader::new(averages, records.clone()),
      records,
      dispatcher,
      options,
    }
  }
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build a fully-materialised API router.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<R, A>(state: ApiState<R, A>) -> Router<()>
where
  R: AssessmentLog + 'static,
  A: AggregateStore + 'static,
{
  Router::new()
    // Class averages
    .route("/class-averages", get(averages::list::<R, A>))
    .route("/class-averages/calculate", post(averages::calculate::<R, A>))
    .route("/class-averages/preview", get(averages::preview::<R, A>))
    .route("/class-averages/status", get(averages::status::<R, A>))
    // Assessment records
    .route("/progress", post(progress::create::<R, A>))
    .with_state(state)
}

// ─── Integration tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::Response,
  };
  use serde_json::{Value, json};
  use tally_core::{
    memory::{MemoryAverages, MemoryRecords},
    pipeline::{DirectStrategy, TestModeStrategy},
  };
  use tower::ServiceExt as _;

  use super::*;
  use crate::session::{USER_ID_HEADER, USER_ROLE_HEADER};

  struct Fixture {
    records:  Arc<MemoryRecords>,
    averages: Arc<MemoryAverages>,
    state:    ApiState<MemoryRecords, MemoryAverages>,
  }

  fn fixture() -> Fixture {
    let records = MemoryRecords::new();
    records.add_school("sch1", "Hillside");
    records.add_school("sch2", "Riverside");
    records.add_classroom("C1", "7A", "sch1", Some("t1"));
    records.add_classroom("C2", "7B", "sch2", Some("t2"));
    records.add_record("r1", "S1", "C1", "Algebra", 80.0, 100.0);
    records.add_record("r2", "S2", "C1", "Algebra", 90.0, 100.0);
    records.add_record("r3", "S3", "C2", "Biology", 30.0, 60.0);
    let records = Arc::new(records);
    let averages = Arc::new(MemoryAverages::new());

    let options = PipelineOptions::default();
    let dispatcher = Arc::new(Dispatcher::new(vec![
      Box::new(DirectStrategy::new(records.clone(), averages.clone(), options)),
      Box::new(TestModeStrategy::new(records.clone(), options)),
    ]));
    let state = ApiState::new(records.clone(), averages.clone(), dispatcher, options);
    Fixture { records, averages, state }
  }

  fn app(state: ApiState<MemoryRecords, MemoryAverages>) -> Router {
    Router::new().nest("/api", api_router(state))
  }

  async fn send(
    state: &ApiState<MemoryRecords, MemoryAverages>,
    method: &str,
    uri: &str,
    caller: Option<(&str, &str)>,
    body: Option<Value>,
  ) -> Response {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some((user, role)) = caller {
      builder = builder.header(USER_ID_HEADER, user).header(USER_ROLE_HEADER, role);
    }
    let body = match body {
      Some(v) => {
        builder = builder.header("content-type", "application/json");
        Body::from(v.to_string())
      }
      None => Body::empty(),
    };
    app(state.clone()).oneshot(builder.body(body).unwrap()).await.unwrap()
  }

  async fn json_body(resp: Response) -> Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
  }

  const HEAD: Option<(&str, &str)> = Some(("h1", "head_teacher"));

  // ── Caller identity ───────────────────────────────────────────────────────

  #[tokio::test]
  async fn missing_identity_is_401() {
    let f = fixture();
    let resp = send(&f.state, "GET", "/api/class-averages", None, None).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert!(json_body(resp).await["error"].is_string());
  }

  #[tokio::test]
  async fn students_are_403() {
    let f = fixture();
    for (method, uri) in [
      ("GET", "/api/class-averages"),
      ("POST", "/api/class-averages/calculate"),
      ("GET", "/api/class-averages/preview"),
      ("GET", "/api/class-averages/status"),
    ] {
      let resp = send(&f.state, method, uri, Some(("s1", "student")), None).await;
      assert_eq!(resp.status(), StatusCode::FORBIDDEN, "{method} {uri}");
    }
  }

  // ── Calculate + list ──────────────────────────────────────────────────────

  #[tokio::test]
  async fn calculate_then_list() {
    let f = fixture();

    let resp = send(&f.state, "POST", "/api/class-averages/calculate", HEAD, None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["method"], json!("direct"));
    assert_eq!(body["classrooms_processed"], json!(2));
    assert_eq!(body["averages_calculated"], json!(2));
    assert_eq!(body["persisted"], json!(true));

    let resp = send(&f.state, "GET", "/api/class-averages?subject=Algebra", HEAD, None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["count"], json!(1));
    assert_eq!(body["user_role"], json!("head_teacher"));
    assert_eq!(body["applied_filters"]["subject"], json!("Algebra"));
    let row = &body["data"][0];
    assert_eq!(row["average_score"], json!(85.0));
    assert_eq!(row["total_students"], json!(2));
    assert_eq!(row["calculated_by"], json!("direct"));
  }

  #[tokio::test]
  async fn teacher_list_is_scoped() {
    let f = fixture();
    send(&f.state, "POST", "/api/class-averages/calculate", HEAD, None).await;

    let teacher = Some(("t1", "teacher"));
    let body = json_body(send(&f.state, "GET", "/api/class-averages", teacher, None).await).await;
    assert_eq!(body["count"], json!(1));
    assert_eq!(body["data"][0]["classroom_id"], json!("C1"));

    let resp = send(&f.state, "GET", "/api/class-averages?classroom_id=C2", teacher, None).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
  }

  #[tokio::test]
  async fn classroom_run_needs_a_known_classroom() {
    let f = fixture();
    let body = Some(json!({ "classroom_id": "C9" }));
    let resp = send(&f.state, "POST", "/api/class-averages/calculate", HEAD, body).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let body = Some(json!({ "classroom_id": "C2" }));
    let resp = send(&f.state, "POST", "/api/class-averages/calculate", HEAD, body).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await["classrooms_processed"], json!(1));
  }

  #[tokio::test]
  async fn failed_run_is_500_and_keeps_old_rows() {
    let f = fixture();
    send(&f.state, "POST", "/api/class-averages/calculate", HEAD, None).await;

    // Both strategies read the records first.
    f.records.set_available(false);
    let resp = send(&f.state, "POST", "/api/class-averages/calculate", HEAD, None).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let message = json_body(resp).await["error"].as_str().unwrap().to_owned();
    assert!(message.contains("direct: record source unavailable"), "{message}");
    assert!(message.contains("test-mode: record source unavailable"), "{message}");

    f.records.set_available(true);
    let body = json_body(send(&f.state, "GET", "/api/class-averages", HEAD, None).await).await;
    assert_eq!(body["count"], json!(2));
  }

  #[tokio::test]
  async fn sink_outage_falls_back_to_test_mode() {
    let f = fixture();
    f.averages.set_available(false);

    let resp = send(&f.state, "POST", "/api/class-averages/calculate", HEAD, None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["method"], json!("test-mode"));
    assert_eq!(body["persisted"], json!(false));
    assert_eq!(body["failed_attempts"][0]["strategy"], json!("direct"));
    assert_eq!(body["results"][0]["calculated_by"], json!("test-mode"));
  }

  #[tokio::test]
  async fn malformed_calculate_body_is_400() {
    let f = fixture();
    let req = Request::builder()
      .method("POST")
      .uri("/api/class-averages/calculate")
      .header(USER_ID_HEADER, "h1")
      .header(USER_ROLE_HEADER, "head_teacher")
      .body(Body::from("{not json"))
      .unwrap();
    let resp = app(f.state.clone()).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
  }

  // ── Preview + status ──────────────────────────────────────────────────────

  #[tokio::test]
  async fn preview_does_not_persist() {
    let f = fixture();
    let uri = "/api/class-averages/preview?school_id=sch2";
    let resp = send(&f.state, "GET", uri, HEAD, None).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["method"], json!("test-mode"));
    assert_eq!(body["count"], json!(1));
    assert_eq!(body["data"][0]["average_score"], json!(50.0));

    let listed = json_body(send(&f.state, "GET", "/api/class-averages", HEAD, None).await).await;
    assert_eq!(listed["count"], json!(0));
  }

  #[tokio::test]
  async fn status_tracks_the_last_run() {
    let f = fixture();
    let status = "/api/class-averages/status";
    let body = json_body(send(&f.state, "GET", status, HEAD, None).await).await;
    assert_eq!(body["status"]["state"], json!("idle"));
    assert_eq!(body["strategies"], json!(["direct", "test-mode"]));

    send(&f.state, "POST", "/api/class-averages/calculate", HEAD, None).await;
    let body = json_body(send(&f.state, "GET", status, HEAD, None).await).await;
    assert_eq!(body["status"]["state"], json!("succeeded"));
    assert_eq!(body["status"]["strategy"], json!("direct"));
  }

  // ── Progress ──────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn progress_round_trip_feeds_the_next_run() {
    let f = fixture();
    let teacher = Some(("t1", "teacher"));
    let record = json!({
      "student_id": "S4",
      "class_id": "C1",
      "subject": "Algebra",
      "marks": 40.0,
      "max_marks": 100.0,
      "assessment_date": chrono::Utc::now().date_naive(),
    });

    let resp = send(&f.state, "POST", "/api/progress", teacher, Some(record)).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert_eq!(json_body(resp).await["data"]["school_id"], json!("sch1"));

    send(&f.state, "POST", "/api/class-averages/calculate", HEAD, None).await;
    let body =
      json_body(send(&f.state, "GET", "/api/class-averages?classroom_id=C1", HEAD, None).await)
        .await;
    // (80 + 90 + 40) / 300
    assert_eq!(body["data"][0]["average_score"], json!(70.0));
    assert_eq!(body["data"][0]["total_students"], json!(3));
  }

  #[tokio::test]
  async fn progress_validation() {
    let f = fixture();
    let teacher = Some(("t1", "teacher"));

    let missing = json!({ "student_id": "S4", "class_id": "C1" });
    let resp = send(&f.state, "POST", "/api/progress", teacher, Some(missing)).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(resp).await["error"], json!("missing required fields"));

    let unknown = json!({
      "student_id": "S4",
      "class_id": "C9",
      "subject": "Algebra",
      "marks": 4.0,
      "max_marks": 10.0,
      "assessment_date": "2024-03-01",
    });
    let resp = send(&f.state, "POST", "/api/progress", teacher, Some(unknown)).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let over = json!({
      "student_id": "S4",
      "class_id": "C1",
      "subject": "Algebra",
      "marks": 14.0,
      "max_marks": 10.0,
      "assessment_date": "2024-03-01",
    });
    let resp = send(&f.state, "POST", "/api/progress", teacher, Some(over)).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
  }
}
