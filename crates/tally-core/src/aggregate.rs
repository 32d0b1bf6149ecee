//! Aggregate rows (the derived per-classroom, per-subject summaries stored in
//! the analytics store) and the types that scope reads and writes of them.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Error;

// ─── Provenance ──────────────────────────────────────────────────────────────

/// Which computation strategy produced an aggregate row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
  /// The remote scheduled function.
  Scheduled,
  /// In-process synchronous computation.
  Direct,
  /// Computation without persistence.
  TestMode,
}

impl Provenance {
  /// The tag stored in the `calculated_by` column.
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Scheduled => "scheduled",
      Self::Direct => "direct",
      Self::TestMode => "test-mode",
    }
  }
}

impl fmt::Display for Provenance {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Provenance {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "scheduled" => Ok(Self::Scheduled),
      "direct" => Ok(Self::Direct),
      "test-mode" => Ok(Self::TestMode),
      other => Err(Error::Validation(format!("unknown provenance: {other:?}"))),
    }
  }
}

// ─── Keys ────────────────────────────────────────────────────────────────────

/// How aggregate keys are formed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyMode {
  /// One row per `(classroom, subject)` over all records.
  #[default]
  ClassSubject,
  /// One row per `(classroom, subject, YYYY-MM)` over a lookback window.
  Monthly,
}

/// The unique key of a [`ClassSubjectAggregate`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AggregateKey {
  pub classroom_id: String,
  pub subject:      String,
  /// `Some("YYYY-MM")` in [`KeyMode::Monthly`], otherwise `None`.
  pub period:       Option<String>,
}

// ─── Aggregate ───────────────────────────────────────────────────────────────

/// Summary of every valid assessment record sharing one [`AggregateKey`].
///
/// Rows are recomputed from scratch on every run; nothing ever updates one
/// incrementally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassSubjectAggregate {
  pub classroom_id:      String,
  pub subject:           String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub period:            Option<String>,
  pub school_id:         String,
  pub school_name:       String,
  pub classroom_name:    String,
  /// `Σ marks / Σ max_marks × 100`, rounded half-up to two decimals.
  pub average_score:     f64,
  /// Distinct students in the partition.
  pub total_students:    u32,
  /// Contributing records; never less than `total_students`.
  pub total_assessments: u32,
  pub last_updated:      DateTime<Utc>,
  pub calculated_by:     Provenance,
}

impl ClassSubjectAggregate {
  pub fn key(&self) -> AggregateKey {
    AggregateKey {
      classroom_id: self.classroom_id.clone(),
      subject:      self.subject.clone(),
      period:       self.period.clone(),
    }
  }
}

/// The denormalised run fields stamped onto every aggregate of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunStamp {
  pub computed_at: DateTime<Utc>,
  pub provenance:  Provenance,
  pub period:      Option<String>,
}

impl RunStamp {
  pub fn new(mode: KeyMode, provenance: Provenance, computed_at: DateTime<Utc>) -> Self {
    let period = match mode {
      KeyMode::ClassSubject => None,
      KeyMode::Monthly => Some(computed_at.format("%Y-%m").to_string()),
    };
    Self { computed_at, provenance, period }
  }
}

// ─── Write scope ─────────────────────────────────────────────────────────────

/// The slice of the analytics key space owned by one run.
///
/// A replace may delete rows inside its scope and never touches rows outside
/// it: a single-classroom run leaves other classrooms alone, and a monthly run
/// leaves earlier months alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaceScope {
  pub classroom_id: Option<String>,
  pub period:       Option<String>,
  /// Classrooms whose metadata could not be resolved this run. Their existing
  /// rows are kept rather than deleted as stale.
  #[serde(default)]
  pub retain:       Vec<String>,
}

impl ReplaceScope {
  pub fn contains(&self, key: &AggregateKey) -> bool {
    key.period == self.period
      && self
        .classroom_id
        .as_ref()
        .is_none_or(|id| *id == key.classroom_id)
      && !self.retain.contains(&key.classroom_id)
  }
}

/// What a replace changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaceSummary {
  pub upserted: usize,
  pub deleted:  usize,
}

// ─── Read filter ─────────────────────────────────────────────────────────────

/// Parameters for [`AggregateStore::list`](crate::store::AggregateStore::list).
/// Every set field must match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateFilter {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub classroom_id:  Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub school_id:     Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub subject:       Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub period:        Option<String>,
  /// Restrict to this set of classrooms (teacher scoping).
  #[serde(skip_serializing_if = "Option::is_none")]
  pub classroom_ids: Option<Vec<String>>,
}

impl AggregateFilter {
  pub fn matches(&self, row: &ClassSubjectAggregate) -> bool {
    fn eq(want: &Option<String>, have: &str) -> bool {
      want.as_deref().is_none_or(|w| w == have)
    }

    eq(&self.classroom_id, &row.classroom_id)
      && eq(&self.school_id, &row.school_id)
      && eq(&self.subject, &row.subject)
      && self.period.as_ref().is_none_or(|p| row.period.as_ref() == Some(p))
      && self
        .classroom_ids
        .as_ref()
        .is_none_or(|ids| ids.contains(&row.classroom_id))
  }
}

/// Most recently updated first; ties broken by key so order is stable.
pub fn sort_newest_first(rows: &mut [ClassSubjectAggregate]) {
  rows.sort_by(|a, b| {
    b.last_updated
      .cmp(&a.last_updated)
      .then_with(|| a.key().cmp(&b.key()))
  });
}
