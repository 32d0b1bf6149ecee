//! [`SqliteAverages`]: the SQLite analytics store.

use std::{collections::HashSet, path::Path};

use rusqlite::TransactionBehavior;
use tracing::debug;

use tally_core::{
  aggregate::{
    AggregateFilter, ClassSubjectAggregate, ReplaceScope, ReplaceSummary, sort_newest_first,
  },
  store::AggregateStore,
};

use crate::{
  Result,
  encode::{RawAggregate, encode_period},
  records::BUSY_TIMEOUT,
  schema::AVERAGES_SCHEMA,
};

/// Computed class averages, one row per aggregate key.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteAverages {
  conn: tokio_rusqlite::Connection,
}

impl SqliteAverages {
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
        conn.execute_batch(AVERAGES_SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── AggregateStore impl ─────────────────────────────────────────────────────

impl AggregateStore for SqliteAverages {
  type Error = crate::Error;

  /// Delete stale keys in scope and upsert the new rows inside one
  /// `BEGIN IMMEDIATE` transaction. Readers in other connections keep seeing
  /// the previous rows until commit.
  async fn replace(
    &self,
    scope: &ReplaceScope,
    aggregates: &[ClassSubjectAggregate],
  ) -> Result<ReplaceSummary> {
    let rows: Vec<RawAggregate> = aggregates.iter().map(RawAggregate::from_aggregate).collect();
    let scope_class  = scope.classroom_id.clone();
    let scope_period = encode_period(scope.period.as_deref());
    let retain: HashSet<String> = scope.retain.iter().cloned().collect();

    let summary = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let keep: HashSet<(&str, &str)> = rows
          .iter()
          .map(|r| (r.class_id.as_str(), r.subject.as_str()))
          .collect();

        let existing = {
          let mut stmt = tx.prepare(
            "SELECT class_id, subject FROM class_averages
             WHERE period = ?1 AND (?2 IS NULL OR class_id = ?2)",
          )?;
          stmt
            .query_map(rusqlite::params![scope_period, scope_class], |row| {
              Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut deleted = 0;
        {
          let mut stmt = tx.prepare(
            "DELETE FROM class_averages WHERE class_id = ?1 AND subject = ?2 AND period = ?3",
          )?;
          for (class_id, subject) in &existing {
            if retain.contains(class_id) || keep.contains(&(class_id.as_str(), subject.as_str())) {
              continue;
            }
            deleted += stmt.execute(rusqlite::params![class_id, subject, scope_period])?;
          }
        }

        let mut upserted = 0;
        {
          let mut stmt = tx.prepare(&format!(
            "INSERT INTO class_averages ({})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT (class_id, subject, period) DO UPDATE SET
               school_id         = excluded.school_id,
               school_name       = excluded.school_name,
               class_name        = excluded.class_name,
               average_score     = excluded.average_score,
               total_students    = excluded.total_students,
               total_assessments = excluded.total_assessments,
               last_updated      = excluded.last_updated,
               calculated_by     = excluded.calculated_by",
            RawAggregate::COLUMNS
          ))?;
          for r in &rows {
            upserted += stmt.execute(rusqlite::params![
              r.class_id,
              r.subject,
              r.period,
              r.school_id,
              r.school_name,
              r.class_name,
              r.average_score,
              r.total_students,
              r.total_assessments,
              r.last_updated,
              r.calculated_by,
            ])?;
          }
        }

        tx.commit()?;
        Ok(ReplaceSummary { upserted, deleted })
      })
      .await?;

    debug!(upserted = summary.upserted, deleted = summary.deleted, "class_averages replaced");
    Ok(summary)
  }

  async fn list(&self, filter: &AggregateFilter) -> Result<Vec<ClassSubjectAggregate>> {
    if filter.classroom_ids.as_ref().is_some_and(Vec::is_empty) {
      return Ok(Vec::new());
    }

    // Build WHERE clause dynamically.
    let mut conds: Vec<String> = Vec::new();
    let mut args: Vec<String> = Vec::new();
    for (column, value) in [
      ("class_id", &filter.classroom_id),
      ("school_id", &filter.school_id),
      ("subject", &filter.subject),
      ("period", &filter.period),
    ] {
      if let Some(v) = value {
        args.push(v.clone());
        conds.push(format!("{column} = ?{}", args.len()));
      }
    }
    if let Some(ids) = &filter.classroom_ids {
      let start = args.len();
      args.extend(ids.iter().cloned());
      let marks: Vec<String> = (start + 1..=args.len()).map(|i| format!("?{i}")).collect();
      conds.push(format!("class_id IN ({})", marks.join(", ")));
    }

    let where_clause = if conds.is_empty() {
      String::new()
    } else {
      format!("WHERE {}", conds.join(" AND "))
    };
    let sql = format!("SELECT {} FROM class_averages {where_clause}", RawAggregate::COLUMNS);

    let raws: Vec<RawAggregate> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(args.iter()), RawAggregate::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    let mut rows: Vec<ClassSubjectAggregate> =
      raws.into_iter().map(RawAggregate::into_aggregate).collect::<Result<_>>()?;
    sort_newest_first(&mut rows);
    Ok(rows)
  }
}
