use crate::dates::{
    august_thirty_first, format_iso_date, september_first, ACADEMIC_YEAR_START_MONTH,
};
use chrono::{Datelike, NaiveDate};
use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum YearError {
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("invalid academic year label {0:?} (expected YYYY-YYYY)")]
    InvalidLabel(String),

    #[error("year {0} is out of range")]
    OutOfRange(i32),

    #[error("academic year not found: {0}")]
    NotFound(String),
}

impl YearError {
    pub fn code(&self) -> &'static str {
        match self {
            YearError::Storage(_) => "db_query_failed",
            YearError::InvalidLabel(_) | YearError::OutOfRange(_) => "bad_params",
            YearError::NotFound(_) => "not_found",
        }
    }
}

/// Label and calendar boundaries of one September-to-August cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcademicYearSpan {
    pub label: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl AcademicYearSpan {
    fn from_start_year(start_year: i32) -> Result<Self, YearError> {
        let end_year = start_year
            .checked_add(1)
            .ok_or(YearError::OutOfRange(start_year))?;
        let start = september_first(start_year).map_err(|_| YearError::OutOfRange(start_year))?;
        let end = august_thirty_first(end_year).map_err(|_| YearError::OutOfRange(end_year))?;
        Ok(Self {
            label: format!("{}-{}", start_year, end_year),
            start,
            end,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcademicYear {
    pub id: String,
    pub label: String,
    pub start_date: String,
    pub end_date: String,
    pub is_current: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnsureOutcome {
    /// No record carried today's label; one was inserted and flagged current.
    Created,
    /// The record existed but the current flag had to move onto it.
    Promoted,
    AlreadyCurrent,
}

pub fn resolve_academic_year(date: NaiveDate) -> Result<AcademicYearSpan, YearError> {
    let start_year = if date.month() >= ACADEMIC_YEAR_START_MONTH {
        date.year()
    } else {
        date.year() - 1
    };
    AcademicYearSpan::from_start_year(start_year)
}

pub fn parse_label(label: &str) -> Result<AcademicYearSpan, YearError> {
    let invalid = || YearError::InvalidLabel(label.to_string());
    let (a, b) = label.trim().split_once('-').ok_or_else(invalid)?;
    if a.len() != 4 || b.len() != 4 {
        return Err(invalid());
    }
    let start_year: i32 = a.parse().map_err(|_| invalid())?;
    let end_year: i32 = b.parse().map_err(|_| invalid())?;
    if end_year != start_year + 1 {
        return Err(invalid());
    }
    AcademicYearSpan::from_start_year(start_year)
}

/// Record store the current-year bookkeeping runs against.
pub trait AcademicYearStore {
    fn find_by_label(&self, label: &str) -> Result<Option<AcademicYear>, YearError>;
    fn find_current(&self) -> Result<Option<AcademicYear>, YearError>;
    fn list(&self) -> Result<Vec<AcademicYear>, YearError>;
    /// Inserts a non-current record for `span`.
    fn create(&mut self, span: &AcademicYearSpan) -> Result<AcademicYear, YearError>;
    /// Returns how many records lost the flag.
    fn clear_current_except(&mut self, label: &str) -> Result<usize, YearError>;
    fn mark_current(&mut self, label: &str) -> Result<usize, YearError>;
}

/// Moves the current flag onto `label`. Others are cleared first so the
/// single-current index never sees two flagged rows.
fn switch_current<S: AcademicYearStore>(store: &mut S, label: &str) -> Result<usize, YearError> {
    let cleared = store.clear_current_except(label)?;
    if store.mark_current(label)? == 0 {
        return Err(YearError::NotFound(label.to_string()));
    }
    Ok(cleared)
}

pub fn ensure_current_academic_year<S: AcademicYearStore>(
    store: &mut S,
    today: NaiveDate,
) -> Result<(EnsureOutcome, AcademicYear), YearError> {
    let span = resolve_academic_year(today)?;
    let existing = store.find_by_label(&span.label)?;
    let was_current = existing.as_ref().map(|y| y.is_current).unwrap_or(false);

    if existing.is_none() {
        store.create(&span)?;
    }
    let cleared = switch_current(store, &span.label)?;

    let outcome = match existing {
        None => EnsureOutcome::Created,
        Some(_) if was_current && cleared == 0 => EnsureOutcome::AlreadyCurrent,
        Some(_) => EnsureOutcome::Promoted,
    };
    let year = store
        .find_by_label(&span.label)?
        .ok_or_else(|| YearError::NotFound(span.label.clone()))?;
    Ok((outcome, year))
}

pub fn set_current<S: AcademicYearStore>(
    store: &mut S,
    label: &str,
) -> Result<AcademicYear, YearError> {
    let span = parse_label(label)?;
    if store.find_by_label(&span.label)?.is_none() {
        return Err(YearError::NotFound(span.label));
    }
    switch_current(store, &span.label)?;
    store
        .find_by_label(&span.label)?
        .ok_or(YearError::NotFound(span.label))
}

pub struct SqliteYearStore<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteYearStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }
}

const YEAR_COLUMNS: &str = "id, label, start_date, end_date, is_current";

fn year_from_row(row: &Row<'_>) -> rusqlite::Result<AcademicYear> {
    Ok(AcademicYear {
        id: row.get(0)?,
        label: row.get(1)?,
        start_date: row.get(2)?,
        end_date: row.get(3)?,
        is_current: row.get::<_, i64>(4)? != 0,
    })
}

impl AcademicYearStore for SqliteYearStore<'_> {
    fn find_by_label(&self, label: &str) -> Result<Option<AcademicYear>, YearError> {
        let sql = format!("SELECT {} FROM academic_years WHERE label = ?", YEAR_COLUMNS);
        Ok(self
            .conn
            .query_row(&sql, [label], year_from_row)
            .optional()?)
    }

    fn find_current(&self) -> Result<Option<AcademicYear>, YearError> {
        let sql = format!(
            "SELECT {} FROM academic_years WHERE is_current = 1 ORDER BY start_date DESC LIMIT 1",
            YEAR_COLUMNS
        );
        Ok(self.conn.query_row(&sql, [], year_from_row).optional()?)
    }

    fn list(&self) -> Result<Vec<AcademicYear>, YearError> {
        let sql = format!(
            "SELECT {} FROM academic_years ORDER BY start_date",
            YEAR_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let years = stmt
            .query_map([], year_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(years)
    }

    fn create(&mut self, span: &AcademicYearSpan) -> Result<AcademicYear, YearError> {
        let year = AcademicYear {
            id: Uuid::new_v4().to_string(),
            label: span.label.clone(),
            start_date: format_iso_date(span.start),
            end_date: format_iso_date(span.end),
            is_current: false,
        };
        self.conn.execute(
            "INSERT INTO academic_years(id, label, start_date, end_date, is_current, created_at)
             VALUES(?, ?, ?, ?, 0, datetime('now'))",
            (&year.id, &year.label, &year.start_date, &year.end_date),
        )?;
        debug!(label = %year.label, "academic year inserted");
        Ok(year)
    }

    fn clear_current_except(&mut self, label: &str) -> Result<usize, YearError> {
        Ok(self.conn.execute(
            "UPDATE academic_years SET is_current = 0 WHERE is_current = 1 AND label <> ?",
            [label],
        )?)
    }

    fn mark_current(&mut self, label: &str) -> Result<usize, YearError> {
        Ok(self.conn.execute(
            "UPDATE academic_years SET is_current = 1 WHERE label = ?",
            [label],
        )?)
    }
}

fn immediate_tx(conn: &Connection) -> Result<Transaction<'_>, YearError> {
    // IMMEDIATE takes the write lock up front so two daemons opening the same
    // workspace serialize on the read-check-write sequence.
    Ok(Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?)
}

pub fn ensure_current_in_db(
    conn: &Connection,
    today: NaiveDate,
) -> Result<(EnsureOutcome, AcademicYear), YearError> {
    let tx = immediate_tx(conn)?;
    let result = {
        let mut store = SqliteYearStore::new(&tx);
        ensure_current_academic_year(&mut store, today)?
    };
    tx.commit()?;
    Ok(result)
}

pub fn set_current_in_db(conn: &Connection, label: &str) -> Result<AcademicYear, YearError> {
    let tx = immediate_tx(conn)?;
    let year = {
        let mut store = SqliteYearStore::new(&tx);
        set_current(&mut store, label)?
    };
    tx.commit()?;
    info!(label = %year.label, "current academic year switched");
    Ok(year)
}

/// Best-effort initialization run when a workspace is opened. Failures leave
/// the workspace usable without a current year.
pub fn ensure_current_on_open(conn: &Connection, today: NaiveDate) -> Option<AcademicYear> {
    match ensure_current_in_db(conn, today) {
        Ok((outcome, year)) => {
            info!(label = %year.label, ?outcome, "current academic year ensured");
            Some(year)
        }
        Err(e) => {
            warn!(error = %e, "could not ensure current academic year; continuing without one");
            None
        }
    }
}
