//! The aggregator: a pure function from assessment records to
//! [`ClassSubjectAggregate`] rows.
//!
//! Records are partitioned by [`AggregateKey`] into typed accumulators. Each
//! partition's score is the weighted percentage `Σ marks / Σ max_marks × 100`,
//! so an assessment out of 100 counts twice as much as one out of 50.
//! Invalid records and unresolvable classrooms are skipped and logged; they
//! never abort a run.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::{
  Error,
  aggregate::{AggregateKey, ClassSubjectAggregate, RunStamp},
  record::{AssessmentRecord, ClassroomIndex, ClassroomInfo},
};

/// Output of one [`aggregate`] call.
#[derive(Debug, Clone, Default)]
pub struct Aggregation {
  /// One row per non-empty partition, sorted by key.
  pub aggregates:            Vec<ClassSubjectAggregate>,
  /// Records dropped by [`AssessmentRecord::validate`].
  pub skipped_records:       usize,
  /// Classrooms referenced by records but missing from the index.
  pub unresolved_classrooms: Vec<String>,
}

/// Running totals for one partition.
#[derive(Debug, Default)]
struct Accumulator {
  marks_sum:     f64,
  max_marks_sum: f64,
  assessments:   u32,
  students:      BTreeSet<String>,
}

impl Accumulator {
  fn add(&mut self, record: &AssessmentRecord) {
    self.marks_sum += record.marks;
    self.max_marks_sum += record.max_marks;
    self.assessments += 1;
    self.students.insert(record.student_id.clone());
  }

  fn finish(
    self,
    key: AggregateKey,
    classroom: &ClassroomInfo,
    stamp: &RunStamp,
  ) -> Option<ClassSubjectAggregate> {
    if self.assessments == 0 || self.max_marks_sum <= 0.0 {
      return None;
    }

    let percentage = self.marks_sum * 100.0 / self.max_marks_sum;
    Some(ClassSubjectAggregate {
      classroom_id:      key.classroom_id,
      subject:           key.subject,
      period:            key.period,
      school_id:         classroom.school_id.clone(),
      school_name:       classroom.school_name.clone(),
      classroom_name:    classroom.name.clone(),
      average_score:     round_half_up_2(percentage).clamp(0.0, 100.0),
      total_students:    u32::try_from(self.students.len()).unwrap_or(u32::MAX),
      total_assessments: self.assessments,
      last_updated:      stamp.computed_at,
      calculated_by:     stamp.provenance,
    })
  }
}

/// Round half-up to two decimals: `floor(100x + 0.5) / 100`.
///
/// `100x` is first snapped to a millionth so that binary noise below an exact
/// tie (`1437.4999999999998`) still rounds up.
pub fn round_half_up_2(x: f64) -> f64 {
  let hundredths = (x * 100.0 * 1e6).round() / 1e6;
  (hundredths + 0.5).floor() / 100.0
}

/// Group `records` into aggregates.
///
/// Only classrooms present in `classrooms` produce rows. The result depends
/// only on the inputs, so re-running over an unchanged record set yields the
/// same rows apart from the fields taken from `stamp`.
pub fn aggregate(
  records: &[AssessmentRecord],
  classrooms: &ClassroomIndex,
  stamp: &RunStamp,
) -> Aggregation {
  let mut partitions: BTreeMap<AggregateKey, Accumulator> = BTreeMap::new();
  let mut unresolved: BTreeSet<String> = BTreeSet::new();
  let mut skipped_records = 0;

  for record in records {
    if let Err(error) = record.validate() {
      warn!(%error, "skipping assessment record");
      skipped_records += 1;
      continue;
    }

    if !classrooms.contains_key(&record.classroom_id) {
      if unresolved.insert(record.classroom_id.clone()) {
        let gap = Error::ResolutionGap {
          classroom_id: record.classroom_id.clone(),
          reason:       "classroom metadata unavailable".to_owned(),
        };
        warn!(error = %gap, "skipping classroom");
      }
      continue;
    }

    let key = AggregateKey {
      classroom_id: record.classroom_id.clone(),
      subject:      record.subject.clone(),
      period:       stamp.period.clone(),
    };
    partitions.entry(key).or_default().add(record);
  }

  let aggregates: Vec<_> = partitions
    .into_iter()
    .filter_map(|(key, acc)| {
      let classroom = classrooms.get(&key.classroom_id)?;
      acc.finish(key, classroom, stamp)
    })
    .collect();

  debug!(
    aggregates = aggregates.len(),
    skipped_records,
    unresolved = unresolved.len(),
    "aggregation finished"
  );

  Aggregation {
    aggregates,
    skipped_records,
    unresolved_classrooms: unresolved.into_iter().collect(),
  }
}
