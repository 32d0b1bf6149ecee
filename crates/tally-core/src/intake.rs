//! Recording new assessment results.

use tracing::info;

use crate::{
  Error, Result,
  record::{AssessmentRecord, NewAssessment},
  store::AssessmentLog,
};

/// Validate `input`, resolve its classroom and append it to the log.
///
/// The stored record's school is the classroom's school. Class averages are
/// not recomputed here; that is the dispatcher's job.
pub async fn submit_assessment<L>(log: &L, input: NewAssessment) -> Result<AssessmentRecord>
where
  L: AssessmentLog,
{
  input.validate()?;

  let classroom = log
    .classroom(&input.classroom_id)
    .await
    .map_err(Error::source_unavailable)?
    .ok_or_else(|| Error::ClassroomNotFound(input.classroom_id.clone()))?;

  let record = log
    .record(input, &classroom)
    .await
    .map_err(Error::source_unavailable)?;

  info!(
    record_id = %record.record_id,
    classroom_id = %record.classroom_id,
    subject = %record.subject,
    "assessment recorded"
  );
  Ok(record)
}

#[cfg(test)]
mod tests {
  use chrono::NaiveDate;

  use super::*;
  use crate::{memory::MemoryRecords, record::RecordQuery, store::RecordSource};

  fn input(classroom: &str) -> NewAssessment {
    NewAssessment {
      student_id:      "S1".into(),
      classroom_id:    classroom.into(),
      subject:         "Algebra".into(),
      marks:           42.0,
      max_marks:       50.0,
      assessment_date: NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
    }
  }

  fn log() -> MemoryRecords {
    let log = MemoryRecords::new();
    log.add_school("sch1", "Hillside");
    log.add_classroom("C1", "7A", "sch1", None);
    log
  }

  #[tokio::test]
  async fn school_comes_from_classroom() {
    let log = log();
    let record = submit_assessment(&log, input("C1")).await.unwrap();
    assert_eq!(record.school_id, "sch1");

    let set = log.load(&RecordQuery::default()).await.unwrap();
    assert_eq!(set.records.len(), 1);
  }

  #[tokio::test]
  async fn unknown_classroom_is_not_found() {
    let err = submit_assessment(&log(), input("C9")).await.unwrap_err();
    assert!(matches!(err, Error::ClassroomNotFound(id) if id == "C9"));
  }

  #[tokio::test]
  async fn missing_fields_are_rejected_before_any_lookup() {
    let log = log();
    log.set_available(false);
    let mut bad = input("C1");
    bad.subject = "  ".into();
    assert!(matches!(
      submit_assessment(&log, bad).await,
      Err(Error::Validation(_))
    ));
  }

  #[tokio::test]
  async fn marks_above_max_are_rejected() {
    let mut bad = input("C1");
    bad.marks = 60.0;
    assert!(matches!(
      submit_assessment(&log(), bad).await,
      Err(Error::Validation(_))
    ));
  }
}
