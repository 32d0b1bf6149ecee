//! In-memory store implementations, for tests and for running the service
//! without a database.

use std::{
  collections::{BTreeMap, BTreeSet, HashMap},
  sync::{
    PoisonError, RwLock,
    atomic::{AtomicBool, Ordering},
  },
};

use chrono::{NaiveDate, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::{
  aggregate::{
    AggregateFilter, AggregateKey, ClassSubjectAggregate, ReplaceScope, ReplaceSummary,
    sort_newest_first,
  },
  record::{
    AssessmentRecord, Classroom, ClassroomInfo, NewAssessment, RecordQuery, RecordSet, School,
    join_classrooms,
  },
  store::{AggregateStore, AssessmentLog, RecordSource},
};

#[derive(Debug, Error)]
pub enum MemoryError {
  #[error("store is unavailable")]
  Unavailable,
}

// ─── Records ─────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct RecordTables {
  schools:    HashMap<String, School>,
  classrooms: BTreeMap<String, Classroom>,
  records:    Vec<AssessmentRecord>,
}

/// A relational store held in memory.
#[derive(Debug)]
pub struct MemoryRecords {
  tables:    RwLock<RecordTables>,
  available: AtomicBool,
}

impl Default for MemoryRecords {
  fn default() -> Self { Self::new() }
}

impl MemoryRecords {
  pub fn new() -> Self {
    Self {
      tables:    RwLock::new(RecordTables::default()),
      available: AtomicBool::new(true),
    }
  }

  /// Simulate an outage: every read and write fails until re-enabled.
  pub fn set_available(&self, available: bool) {
    self.available.store(available, Ordering::SeqCst);
  }

  fn check(&self) -> Result<(), MemoryError> {
    if self.available.load(Ordering::SeqCst) {
      Ok(())
    } else {
      Err(MemoryError::Unavailable)
    }
  }

  fn read<T>(&self, f: impl FnOnce(&RecordTables) -> T) -> T {
    f(&self.tables.read().unwrap_or_else(PoisonError::into_inner))
  }

  fn write<T>(&self, f: impl FnOnce(&mut RecordTables) -> T) -> T {
    f(&mut self.tables.write().unwrap_or_else(PoisonError::into_inner))
  }

  pub fn add_school(&self, id: &str, name: &str) {
    self.write(|t| {
      t.schools.insert(id.to_owned(), School { id: id.to_owned(), name: name.to_owned() });
    });
  }

  pub fn remove_school(&self, id: &str) { self.write(|t| t.schools.remove(id)); }

  pub fn add_classroom(&self, id: &str, name: &str, school_id: &str, teacher_id: Option<&str>) {
    self.write(|t| {
      t.classrooms.insert(id.to_owned(), Classroom {
        id:          id.to_owned(),
        name:        name.to_owned(),
        grade_level: None,
        school_id:   school_id.to_owned(),
        teacher_id:  teacher_id.map(str::to_owned),
      });
    });
  }

  /// Insert a record assessed today, taking the school from the classroom if
  /// it is known.
  pub fn add_record(
    &self,
    record_id: &str,
    student_id: &str,
    classroom_id: &str,
    subject: &str,
    marks: f64,
    max_marks: f64,
  ) {
    self.write(|t| {
      let school_id = t
        .classrooms
        .get(classroom_id)
        .map(|c| c.school_id.clone())
        .unwrap_or_default();
      t.records.push(AssessmentRecord {
        record_id: record_id.to_owned(),
        student_id: student_id.to_owned(),
        classroom_id: classroom_id.to_owned(),
        school_id,
        subject: subject.to_owned(),
        marks,
        max_marks,
        assessment_date: Utc::now().date_naive(),
      });
    });
  }

  pub fn insert_record(&self, record: AssessmentRecord) {
    self.write(|t| t.records.push(record));
  }

  pub fn remove_record(&self, record_id: &str) {
    self.write(|t| t.records.retain(|r| r.record_id != record_id));
  }

  fn in_scope(query: &RecordQuery, classroom_id: &str, date: Option<NaiveDate>) -> bool {
    query.classroom_id.as_deref().is_none_or(|id| id == classroom_id)
      && match (query.since, date) {
        (Some(since), Some(date)) => date >= since,
        _ => true,
      }
  }
}

impl RecordSource for MemoryRecords {
  type Error = MemoryError;

  async fn load(&self, query: &RecordQuery) -> Result<RecordSet, MemoryError> {
    self.check()?;
    Ok(self.read(|t| {
      let classrooms = t
        .classrooms
        .values()
        .filter(|c| Self::in_scope(query, &c.id, None))
        .cloned()
        .collect();
      let (classrooms, unresolved) = join_classrooms(classrooms, &t.schools);
      let records = t
        .records
        .iter()
        .filter(|r| Self::in_scope(query, &r.classroom_id, Some(r.assessment_date)))
        .cloned()
        .collect();
      RecordSet { records, classrooms, unresolved }
    }))
  }

  async fn classroom(&self, classroom_id: &str) -> Result<Option<ClassroomInfo>, MemoryError> {
    self.check()?;
    Ok(self.read(|t| {
      let classroom = t.classrooms.get(classroom_id)?;
      let school = t.schools.get(&classroom.school_id)?;
      Some(ClassroomInfo {
        id:          classroom.id.clone(),
        name:        classroom.name.clone(),
        grade_level: classroom.grade_level.clone(),
        school_id:   school.id.clone(),
        school_name: school.name.clone(),
        teacher_id:  classroom.teacher_id.clone(),
      })
    }))
  }

  async fn classrooms_for_teacher(&self, teacher_id: &str) -> Result<Vec<String>, MemoryError> {
    self.check()?;
    Ok(self.read(|t| {
      t.classrooms
        .values()
        .filter(|c| c.teacher_id.as_deref() == Some(teacher_id))
        .map(|c| c.id.clone())
        .collect()
    }))
  }
}

impl AssessmentLog for MemoryRecords {
  async fn record(
    &self,
    input: NewAssessment,
    classroom: &ClassroomInfo,
  ) -> Result<AssessmentRecord, MemoryError> {
    self.check()?;
    let record = AssessmentRecord {
      record_id:       Uuid::new_v4().to_string(),
      student_id:      input.student_id,
      classroom_id:    input.classroom_id,
      school_id:       classroom.school_id.clone(),
      subject:         input.subject,
      marks:           input.marks,
      max_marks:       input.max_marks,
      assessment_date: input.assessment_date,
    };
    self.insert_record(record.clone());
    Ok(record)
  }
}

// ─── Aggregates ──────────────────────────────────────────────────────────────

/// An analytics store held in memory. One lock covers the whole map, so a
/// replace is atomic with respect to readers.
#[derive(Debug)]
pub struct MemoryAverages {
  rows:      RwLock<BTreeMap<AggregateKey, ClassSubjectAggregate>>,
  available: AtomicBool,
}

impl Default for MemoryAverages {
  fn default() -> Self { Self::new() }
}

impl MemoryAverages {
  pub fn new() -> Self {
    Self { rows: RwLock::new(BTreeMap::new()), available: AtomicBool::new(true) }
  }

  pub fn set_available(&self, available: bool) {
    self.available.store(available, Ordering::SeqCst);
  }

  fn check(&self) -> Result<(), MemoryError> {
    if self.available.load(Ordering::SeqCst) {
      Ok(())
    } else {
      Err(MemoryError::Unavailable)
    }
  }
}

impl AggregateStore for MemoryAverages {
  type Error = MemoryError;

  async fn replace(
    &self,
    scope: &ReplaceScope,
    aggregates: &[ClassSubjectAggregate],
  ) -> Result<ReplaceSummary, MemoryError> {
    self.check()?;
    let keep: BTreeSet<AggregateKey> = aggregates.iter().map(|a| a.key()).collect();

    let mut rows = self.rows.write().unwrap_or_else(PoisonError::into_inner);
    let before = rows.len();
    rows.retain(|key, _| !scope.contains(key) || keep.contains(key));
    let deleted = before - rows.len();

    for aggregate in aggregates {
      rows.insert(aggregate.key(), aggregate.clone());
    }

    Ok(ReplaceSummary { upserted: aggregates.len(), deleted })
  }

  async fn list(
    &self,
    filter: &AggregateFilter,
  ) -> Result<Vec<ClassSubjectAggregate>, MemoryError> {
    self.check()?;
    let rows = self.rows.read().unwrap_or_else(PoisonError::into_inner);
    let mut out: Vec<_> = rows.values().filter(|r| filter.matches(r)).cloned().collect();
    drop(rows);
    sort_newest_first(&mut out);
    Ok(out)
  }
}
