//! SQL schema for the two SQLite stores.
//!
//! Executed once at connection startup. Both schemas are idempotent thanks to
//! `CREATE TABLE IF NOT EXISTS`, and both put the database in WAL mode so
//! readers see the last committed state while a writer holds its transaction.

/// Relational store: schools, classrooms and assessment records.
///
/// No foreign keys: records may reference classrooms that have since been
/// removed, and the pipeline reports those as resolution gaps.
pub const RECORDS_SCHEMA: &str = "
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS schools (
    id    TEXT PRIMARY KEY,
    name  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS classrooms (
    id           TEXT PRIMARY KEY,
    name         TEXT NOT NULL,
    grade_level  TEXT,
    school_id    TEXT NOT NULL,
    teacher_id   TEXT
);

CREATE TABLE IF NOT EXISTS progress (
    record_id        TEXT PRIMARY KEY,
    student_id       TEXT NOT NULL,
    class_id         TEXT NOT NULL,
    school_id        TEXT NOT NULL,
    subject          TEXT NOT NULL,
    marks            REAL NOT NULL,
    max_marks        REAL NOT NULL,
    assessment_date  TEXT NOT NULL   -- YYYY-MM-DD
);

CREATE INDEX IF NOT EXISTS classrooms_teacher_idx ON classrooms(teacher_id);
CREATE INDEX IF NOT EXISTS progress_class_idx     ON progress(class_id);
CREATE INDEX IF NOT EXISTS progress_date_idx      ON progress(assessment_date);

PRAGMA user_version = 1;
";

/// Analytics store: one row per aggregate key.
///
/// `period` is `''` for keys without a period so the unique constraint applies
/// to them too (SQLite treats NULLs as distinct).
pub const AVERAGES_SCHEMA: &str = "
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS class_averages (
    class_id           TEXT NOT NULL,
    subject            TEXT NOT NULL,
    period             TEXT NOT NULL DEFAULT '',
    school_id          TEXT NOT NULL,
    school_name        TEXT NOT NULL,
    class_name         TEXT NOT NULL,
    average_score      REAL NOT NULL,
    total_students     INTEGER NOT NULL,
    total_assessments  INTEGER NOT NULL,
    last_updated       TEXT NOT NULL,   -- RFC 3339 UTC, fixed width
    calculated_by      TEXT NOT NULL,   -- 'scheduled' | 'direct' | 'test-mode'
    UNIQUE (class_id, subject, period)
);

CREATE INDEX IF NOT EXISTS class_averages_school_idx  ON class_averages(school_id);
CREATE INDEX IF NOT EXISTS class_averages_updated_idx ON class_averages(last_updated);

PRAGMA user_version = 1;
";
