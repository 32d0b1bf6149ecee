//! Relational-store types: assessment records, classrooms and schools.
//!
//! These rows are owned by the relational store and are read-only to the
//! aggregation pipeline. The classroom → school join happens client-side in
//! [`join_classrooms`].

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{Error, Result};

// ─── Assessment records ──────────────────────────────────────────────────────

/// One scored assessment for one student.
///
/// Nothing upstream guarantees `max_marks > 0`; call [`validate`](Self::validate)
/// before dividing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentRecord {
  pub record_id:       String,
  pub student_id:      String,
  pub classroom_id:    String,
  pub school_id:       String,
  /// Free-text subject label; grouped by exact value.
  pub subject:         String,
  pub marks:           f64,
  pub max_marks:       f64,
  pub assessment_date: NaiveDate,
}

impl AssessmentRecord {
  /// Check that this record can contribute to an aggregate.
  pub fn validate(&self) -> Result<()> {
    let invalid = |reason: &str| Error::InvalidRecord {
      record_id: self.record_id.clone(),
      reason:    reason.to_owned(),
    };

    if self.student_id.is_empty() {
      return Err(invalid("missing student_id"));
    }
    if self.classroom_id.is_empty() {
      return Err(invalid("missing classroom_id"));
    }
    if self.subject.is_empty() {
      return Err(invalid("missing subject"));
    }
    check_marks(self.marks, self.max_marks).map_err(invalid)
  }
}

/// Marks must be finite and satisfy `0 <= marks <= max_marks`, `max_marks > 0`.
fn check_marks(marks: f64, max_marks: f64) -> std::result::Result<(), &'static str> {
  if !marks.is_finite() || !max_marks.is_finite() {
    return Err("marks must be finite numbers");
  }
  if max_marks <= 0.0 {
    return Err("max_marks must be greater than zero");
  }
  if marks < 0.0 {
    return Err("marks must not be negative");
  }
  if marks > max_marks {
    return Err("marks exceed max_marks");
  }
  Ok(())
}

/// Input for recording a new assessment. The school is taken from the
/// classroom, never from the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAssessment {
  pub student_id:      String,
  pub classroom_id:    String,
  pub subject:         String,
  pub marks:           f64,
  pub max_marks:       f64,
  pub assessment_date: NaiveDate,
}

impl NewAssessment {
  pub fn validate(&self) -> Result<()> {
    if self.student_id.trim().is_empty()
      || self.classroom_id.trim().is_empty()
      || self.subject.trim().is_empty()
    {
      return Err(Error::Validation("missing required fields".to_owned()));
    }
    check_marks(self.marks, self.max_marks)
      .map_err(|reason| Error::Validation(reason.to_owned()))
  }
}

// ─── Classrooms and schools ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct School {
  pub id:   String,
  pub name: String,
}

/// A classroom row as stored, before the school join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classroom {
  pub id:          String,
  pub name:        String,
  pub grade_level: Option<String>,
  pub school_id:   String,
  /// The assigned teacher, if any.
  pub teacher_id:  Option<String>,
}

/// A classroom with its school name resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassroomInfo {
  pub id:          String,
  pub name:        String,
  pub grade_level: Option<String>,
  pub school_id:   String,
  pub school_name: String,
  pub teacher_id:  Option<String>,
}

/// Resolved classrooms keyed by id.
pub type ClassroomIndex = BTreeMap<String, ClassroomInfo>;

/// Join classrooms against schools. Classrooms whose school is missing are
/// logged and returned separately; they never abort the join.
pub fn join_classrooms(
  classrooms: Vec<Classroom>,
  schools: &HashMap<String, School>,
) -> (ClassroomIndex, Vec<String>) {
  let mut index = ClassroomIndex::new();
  let mut unresolved = Vec::new();

  for classroom in classrooms {
    match schools.get(&classroom.school_id) {
      Some(school) => {
        index.insert(classroom.id.clone(), ClassroomInfo {
          id:          classroom.id,
          name:        classroom.name,
          grade_level: classroom.grade_level,
          school_id:   classroom.school_id,
          school_name: school.name.clone(),
          teacher_id:  classroom.teacher_id,
        });
      }
      None => {
        let gap = Error::ResolutionGap {
          classroom_id: classroom.id.clone(),
          reason:       format!("school {} not found", classroom.school_id),
        };
        warn!(error = %gap, "skipping classroom");
        unresolved.push(classroom.id);
      }
    }
  }

  (index, unresolved)
}

// ─── Reads ───────────────────────────────────────────────────────────────────

/// Parameters for [`RecordSource::load`](crate::store::RecordSource::load).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordQuery {
  /// Restrict to a single classroom; `None` is a full scan.
  pub classroom_id: Option<String>,
  /// Only records assessed on or after this date.
  pub since:        Option<NaiveDate>,
}

/// Everything the aggregator needs for one run.
///
/// An empty `records` list means there are legitimately no assessments in
/// scope; store failures are reported as errors, never as an empty set.
#[derive(Debug, Clone, Default)]
pub struct RecordSet {
  pub records:    Vec<AssessmentRecord>,
  /// Every resolvable classroom in scope, with or without records.
  pub classrooms: ClassroomIndex,
  /// Classrooms in scope whose school could not be joined.
  pub unresolved: Vec<String>,
}

#[cfg(test)]
mod tests {
  use super::*;

  fn record(marks: f64, max_marks: f64) -> AssessmentRecord {
    AssessmentRecord {
      record_id:       "r1".into(),
      student_id:      "s1".into(),
      classroom_id:    "c1".into(),
      school_id:       "sch1".into(),
      subject:         "Algebra".into(),
      marks,
      max_marks,
      assessment_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
    }
  }

  #[test]
  fn zero_max_marks_is_invalid() {
    assert!(matches!(
      record(0.0, 0.0).validate(),
      Err(Error::InvalidRecord { .. })
    ));
  }

  #[test]
  fn marks_above_max_are_invalid() {
    assert!(record(101.0, 100.0).validate().is_err());
    assert!(record(f64::NAN, 100.0).validate().is_err());
    assert!(record(100.0, 100.0).validate().is_ok());
  }

  #[test]
  fn missing_subject_is_invalid() {
    let mut r = record(50.0, 100.0);
    r.subject.clear();
    assert!(r.validate().is_err());
  }

  #[test]
  fn join_reports_classrooms_without_school() {
    let schools = HashMap::from([("sch1".to_owned(), School {
      id:   "sch1".into(),
      name: "Hillside".into(),
    })]);
    let classrooms = vec![
      Classroom {
        id:          "c1".into(),
        name:        "7A".into(),
        grade_level: Some("7".into()),
        school_id:   "sch1".into(),
        teacher_id:  None,
      },
      Classroom {
        id:          "c2".into(),
        name:        "7B".into(),
        grade_level: None,
        school_id:   "missing".into(),
        teacher_id:  None,
      },
    ];

    let (index, unresolved) = join_classrooms(classrooms, &schools);
    assert_eq!(index.len(), 1);
    assert_eq!(index["c1"].school_name, "Hillside");
    assert_eq!(unresolved, vec!["c2".to_owned()]);
  }
}
