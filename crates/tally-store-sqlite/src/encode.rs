//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings in UTC so they sort
//! lexically. Dates are stored as `YYYY-MM-DD`. A missing aggregate period is
//! stored as the empty string.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use tally_core::{
  aggregate::ClassSubjectAggregate,
  record::{AssessmentRecord, Classroom, ClassroomInfo},
};

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339_opts(SecondsFormat::Micros, true) }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── NaiveDate ───────────────────────────────────────────────────────────────

const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn encode_date(d: NaiveDate) -> String { d.format(DATE_FORMAT).to_string() }

pub fn decode_date(s: &str) -> Result<NaiveDate> {
  NaiveDate::parse_from_str(s, DATE_FORMAT).map_err(|e| Error::DateParse(format!("{s:?}: {e}")))
}

// ─── Period ──────────────────────────────────────────────────────────────────

pub fn encode_period(period: Option<&str>) -> String { period.unwrap_or_default().to_owned() }

pub fn decode_period(s: String) -> Option<String> { (!s.is_empty()).then_some(s) }

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw values read directly from a `progress` row.
pub struct RawRecord {
  pub record_id:       String,
  pub student_id:      String,
  pub class_id:        String,
  pub school_id:       String,
  pub subject:         String,
  pub marks:           f64,
  pub max_marks:       f64,
  pub assessment_date: String,
}

impl RawRecord {
  pub fn into_record(self) -> Result<AssessmentRecord> {
    Ok(AssessmentRecord {
      assessment_date: decode_date(&self.assessment_date)?,
      record_id:       self.record_id,
      student_id:      self.student_id,
      classroom_id:    self.class_id,
      school_id:       self.school_id,
      subject:         self.subject,
      marks:           self.marks,
      max_marks:       self.max_marks,
    })
  }
}

pub fn classroom_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Classroom> {
  Ok(Classroom {
    id:          row.get(0)?,
    name:        row.get(1)?,
    grade_level: row.get(2)?,
    school_id:   row.get(3)?,
    teacher_id:  row.get(4)?,
  })
}

pub fn classroom_info_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ClassroomInfo> {
  Ok(ClassroomInfo {
    id:          row.get(0)?,
    name:        row.get(1)?,
    grade_level: row.get(2)?,
    school_id:   row.get(3)?,
    school_name: row.get(4)?,
    teacher_id:  row.get(5)?,
  })
}

/// Raw values for one `class_averages` row, in column order.
pub struct RawAggregate {
  pub class_id:          String,
  pub subject:           String,
  pub period:            String,
  pub school_id:         String,
  pub school_name:       String,
  pub class_name:        String,
  pub average_score:     f64,
  pub total_students:    u32,
  pub total_assessments: u32,
  pub last_updated:      String,
  pub calculated_by:     String,
}

impl RawAggregate {
  pub const COLUMNS: &'static str = "class_id, subject, period, school_id, school_name, \
                                     class_name, average_score, total_students, \
                                     total_assessments, last_updated, calculated_by";

  pub fn from_aggregate(a: &ClassSubjectAggregate) -> Self {
    Self {
      class_id:          a.classroom_id.clone(),
      subject:           a.subject.clone(),
      period:            encode_period(a.period.as_deref()),
      school_id:         a.school_id.clone(),
      school_name:       a.school_name.clone(),
      class_name:        a.classroom_name.clone(),
      average_score:     a.average_score,
      total_students:    a.total_students,
      total_assessments: a.total_assessments,
      last_updated:      encode_dt(a.last_updated),
      calculated_by:     a.calculated_by.as_str().to_owned(),
    }
  }

  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      class_id:          row.get(0)?,
      subject:           row.get(1)?,
      period:            row.get(2)?,
      school_id:         row.get(3)?,
      school_name:       row.get(4)?,
      class_name:        row.get(5)?,
      average_score:     row.get(6)?,
      total_students:    row.get(7)?,
      total_assessments: row.get(8)?,
      last_updated:      row.get(9)?,
      calculated_by:     row.get(10)?,
    })
  }

  pub fn into_aggregate(self) -> Result<ClassSubjectAggregate> {
    Ok(ClassSubjectAggregate {
      last_updated:      decode_dt(&self.last_updated)?,
      calculated_by:     self.calculated_by.parse()?,
      classroom_id:      self.class_id,
      subject:           self.subject,
      period:            decode_period(self.period),
      school_id:         self.school_id,
      school_name:       self.school_name,
      classroom_name:    self.class_name,
      average_score:     self.average_score,
      total_students:    self.total_students,
      total_assessments: self.total_assessments,
    })
  }
}
