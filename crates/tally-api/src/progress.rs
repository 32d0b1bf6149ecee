//! Handler for `POST /progress`: recording one assessment result.

use axum::{
  Json,
  extract::{State, rejection::JsonRejection},
  http::StatusCode,
  response::IntoResponse,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tally_core::{
  intake::submit_assessment,
  record::{AssessmentRecord, NewAssessment},
  store::{AggregateStore, AssessmentLog},
};

use crate::{ApiState, error::ApiError, session::Session};

/// JSON body accepted by `POST /progress`. Every field is required; they are
/// optional here so a missing one is reported as a 400 with a stable message.
#[derive(Debug, Default, Deserialize)]
pub struct ProgressBody {
  pub student_id:      Option<String>,
  #[serde(alias = "class_id")]
  pub classroom_id:    Option<String>,
  pub subject:         Option<String>,
  pub marks:           Option<f64>,
  pub max_marks:       Option<f64>,
  pub assessment_date: Option<NaiveDate>,
}

impl TryFrom<ProgressBody> for NewAssessment {
  type Error = tally_core::Error;

  fn try_from(b: ProgressBody) -> Result<Self, Self::Error> {
    let missing = || tally_core::Error::Validation("missing required fields".to_owned());
    Ok(NewAssessment {
      student_id:      b.student_id.ok_or_else(missing)?,
      classroom_id:    b.classroom_id.ok_or_else(missing)?,
      subject:         b.subject.ok_or_else(missing)?,
      marks:           b.marks.ok_or_else(missing)?,
      max_marks:       b.max_marks.ok_or_else(missing)?,
      assessment_date: b.assessment_date.ok_or_else(missing)?,
    })
  }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProgressResponse {
  pub success: bool,
  pub data:    AssessmentRecord,
}

/// `POST /progress`. Returns 201 and the stored record.
pub async fn create<R, A>(
  State(state): State<ApiState<R, A>>,
  Session(caller): Session,
  body: Result<Json<ProgressBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError>
where
  R: AssessmentLog + 'static,
  A: AggregateStore + 'static,
{
  caller.require_staff()?;
  let Json(body) = body?;
  let input = NewAssessment::try_from(body)?;

  let record = submit_assessment(state.records.as_ref(), input).await?;
  Ok((StatusCode::CREATED, Json(ProgressResponse { success: true, data: record })))
}
