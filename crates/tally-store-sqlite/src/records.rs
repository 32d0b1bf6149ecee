//! [`SqliteRecords`]: the SQLite relational store.

use std::{collections::HashMap, path::Path, time::Duration};

use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use tally_core::{
  record::{
    AssessmentRecord, Classroom, ClassroomInfo, NewAssessment, RecordQuery, RecordSet, School,
    join_classrooms,
  },
  store::{AssessmentLog, RecordSource},
};

use crate::{
  Result,
  encode::{RawRecord, classroom_from_row, classroom_info_from_row, encode_date},
  schema::RECORDS_SCHEMA,
};

/// How long a statement waits on a locked database before failing.
pub(crate) const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

// ─── Store ───────────────────────────────────────────────────────────────────

/// Schools, classrooms and assessment records in a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteRecords {
  conn: tokio_rusqlite::Connection,
}

impl SqliteRecords {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store, useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(RECORDS_SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Reference data ────────────────────────────────────────────────────────

  /// Insert or rename a school.
  pub async fn put_school(&self, school: School) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO schools (id, name) VALUES (?1, ?2)
           ON CONFLICT (id) DO UPDATE SET name = excluded.name",
          rusqlite::params![school.id, school.name],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Insert or update a classroom, including its teacher assignment.
  pub async fn put_classroom(&self, classroom: Classroom) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO classrooms (id, name, grade_level, school_id, teacher_id)
           VALUES (?1, ?2, ?3, ?4, ?5)
           ON CONFLICT (id) DO UPDATE SET
             name        = excluded.name,
             grade_level = excluded.grade_level,
             school_id   = excluded.school_id,
             teacher_id  = excluded.teacher_id",
          rusqlite::params![
            classroom.id,
            classroom.name,
            classroom.grade_level,
            classroom.school_id,
            classroom.teacher_id,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// Delete one assessment record. Returns whether it existed.
  pub async fn delete_record(&self, record_id: &str) -> Result<bool> {
    let record_id = record_id.to_owned();
    let removed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute("DELETE FROM progress WHERE record_id = ?1", rusqlite::params![
          record_id
        ])?)
      })
      .await?;
    Ok(removed > 0)
  }

  /// Insert a record verbatim. Nothing is validated; the aggregator skips
  /// records it cannot use.
  pub async fn put_record(&self, record: &AssessmentRecord) -> Result<()> {
    let record_id  = record.record_id.clone();
    let student_id = record.student_id.clone();
    let class_id   = record.classroom_id.clone();
    let school_id  = record.school_id.clone();
    let subject    = record.subject.clone();
    let marks      = record.marks;
    let max_marks  = record.max_marks;
    let date_str   = encode_date(record.assessment_date);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO progress (
             record_id, student_id, class_id, school_id, subject,
             marks, max_marks, assessment_date
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
          rusqlite::params![
            record_id, student_id, class_id, school_id, subject, marks, max_marks, date_str,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── RecordSource impl ───────────────────────────────────────────────────────

impl RecordSource for SqliteRecords {
  type Error = crate::Error;

  async fn load(&self, query: &RecordQuery) -> Result<RecordSet> {
    let class_id  = query.classroom_id.clone();
    let since_str = query.since.map(encode_date);

    let (classrooms, schools, raws): (Vec<Classroom>, Vec<School>, Vec<RawRecord>) = self
      .conn
      .call(move |conn| {
        // One read transaction so the three tables come from one snapshot.
        let tx = conn.transaction()?;

        let classrooms = {
          let mut stmt = tx.prepare(
            "SELECT id, name, grade_level, school_id, teacher_id
             FROM classrooms
             WHERE ?1 IS NULL OR id = ?1",
          )?;
          stmt
            .query_map(rusqlite::params![class_id], classroom_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };

        let schools = {
          let mut stmt = tx.prepare("SELECT id, name FROM schools")?;
          stmt
            .query_map([], |row| Ok(School { id: row.get(0)?, name: row.get(1)? }))?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };

        let raws = {
          let mut stmt = tx.prepare(
            "SELECT record_id, student_id, class_id, school_id, subject,
                    marks, max_marks, assessment_date
             FROM progress
             WHERE (?1 IS NULL OR class_id = ?1)
               AND (?2 IS NULL OR assessment_date >= ?2)
             ORDER BY record_id",
          )?;
          stmt
            .query_map(rusqlite::params![class_id, since_str], |row| {
              Ok(RawRecord {
                record_id:       row.get(0)?,
                student_id:      row.get(1)?,
                class_id:        row.get(2)?,
                school_id:       row.get(3)?,
                subject:         row.get(4)?,
                marks:           row.get(5)?,
                max_marks:       row.get(6)?,
                assessment_date: row.get(7)?,
              })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };

        tx.commit()?;
        Ok((classrooms, schools, raws))
      })
      .await?;

    let schools: HashMap<String, School> =
      schools.into_iter().map(|s| (s.id.clone(), s)).collect();
    let (classrooms, unresolved) = join_classrooms(classrooms, &schools);

    // A record with an unreadable date is skipped like any other invalid
    // record rather than failing the whole load.
    let mut records = Vec::with_capacity(raws.len());
    for raw in raws {
      let record_id = raw.record_id.clone();
      match raw.into_record() {
        Ok(record) => records.push(record),
        Err(error) => tracing::warn!(%record_id, %error, "skipping unreadable assessment record"),
      }
    }

    Ok(RecordSet { records, classrooms, unresolved })
  }

  async fn classroom(&self, classroom_id: &str) -> Result<Option<ClassroomInfo>> {
    let id = classroom_id.to_owned();

    let info = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT c.id, c.name, c.grade_level, c.school_id, s.name, c.teacher_id
             FROM classrooms c
             JOIN schools s ON s.id = c.school_id
             WHERE c.id = ?1",
            rusqlite::params![id],
            classroom_info_from_row,
          )
          .optional()?)
      })
      .await?;

    Ok(info)
  }

  async fn classrooms_for_teacher(&self, teacher_id: &str) -> Result<Vec<String>> {
    let teacher_id = teacher_id.to_owned();

    let ids = self
      .conn
      .call(move |conn| {
        let mut stmt =
          conn.prepare("SELECT id FROM classrooms WHERE teacher_id = ?1 ORDER BY id")?;
        let ids = stmt
          .query_map(rusqlite::params![teacher_id], |row| row.get(0))?
          .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
      })
      .await?;

    Ok(ids)
  }
}

impl AssessmentLog for SqliteRecords {
  async fn record(
    &self,
    input: NewAssessment,
    classroom: &ClassroomInfo,
  ) -> Result<AssessmentRecord> {
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

    self.put_record(&record).await?;
    Ok(record)
  }
}
