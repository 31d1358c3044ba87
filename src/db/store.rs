//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use super::models::*;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

const CHECK_COLUMNS: &str = "id, account_id, url, name, interval, regions, timeout_secs, \
     expected_status_code, status, last_status, failure_streak, created_at, last_result_at";

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Not found")]
    NotFound,
    #[error("check limit reached ({current}/{limit})")]
    QuotaExceeded { current: u32, limit: u32 },
    #[error("database lock poisoned")]
    LockPoisoned,
}

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.lock()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        // Fails harmlessly once the column exists.
        let _ = conn.execute_batch(include_str!("../../migrations/000002_last_result_at.up.sql"));
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::LockPoisoned)
    }

    // --- Check CRUD ---

    /// Insert a check if the owner has fewer than `max_checks` checks.
    ///
    /// The count and the insert run in one transaction, so concurrent
    /// creations cannot push the owner past the limit.
    pub fn add_check(&self, check: &mut Check, max_checks: u32) -> Result<i64, DbError> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;

        let current = count_checks(&tx, &check.account_id)?;
        if current >= max_checks {
            return Err(DbError::QuotaExceeded {
                current,
                limit: max_checks,
            });
        }

        tx.execute(
            "INSERT INTO checks (account_id, url, name, interval, regions, timeout_secs, expected_status_code, status, last_status, failure_streak, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                check.account_id,
                check.url,
                check.name,
                check.interval.as_str(),
                regions_json(&check.regions),
                check.timeout_secs,
                check.expected_status_code,
                check.status.as_str(),
                check.last_status.map(CheckStatus::as_str),
                check.failure_streak,
                check.created_at.format(TIME_FORMAT).to_string(),
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        check.id = id;
        Ok(id)
    }

    /// Update the user-editable fields of an existing check.
    pub fn update_check(&self, check: &Check) -> Result<(), DbError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE checks SET url=?1, name=?2, interval=?3, regions=?4, timeout_secs=?5, expected_status_code=?6, status=?7
             WHERE id=?8 AND account_id=?9",
            params![
                check.url,
                check.name,
                check.interval.as_str(),
                regions_json(&check.regions),
                check.timeout_secs,
                check.expected_status_code,
                check.status.as_str(),
                check.id,
                check.account_id,
            ],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Record the derived status and failure streak of a check, along with
    /// the time of the newest result they reflect.
    pub fn update_check_state(
        &self,
        id: i64,
        last_status: Option<CheckStatus>,
        failure_streak: u32,
        last_result_at: Option<DateTime<Utc>>,
    ) -> Result<(), DbError> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE checks SET last_status=?1, failure_streak=?2, last_result_at=?3 WHERE id=?4",
            params![
                last_status.map(CheckStatus::as_str),
                failure_streak,
                last_result_at.map(|t| t.format(TIME_FORMAT).to_string()),
                id,
            ],
        )?;
        Ok(())
    }

    /// Get all checks owned by an account.
    pub fn get_checks(&self, account_id: &str) -> Result<Vec<Check>, DbError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM checks WHERE account_id = ?1 ORDER BY id ASC",
            CHECK_COLUMNS
        ))?;
        let checks = stmt
            .query_map(params![account_id], row_to_check)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(checks)
    }

    /// Get every check regardless of owner.
    pub fn get_all_checks(&self) -> Result<Vec<Check>, DbError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("SELECT {} FROM checks ORDER BY id ASC", CHECK_COLUMNS))?;
        let checks = stmt
            .query_map([], row_to_check)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(checks)
    }

    /// Get a check by ID, scoped to its owner.
    pub fn get_check(&self, account_id: &str, id: i64) -> Result<Check, DbError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!(
                "SELECT {} FROM checks WHERE id = ?1 AND account_id = ?2",
                CHECK_COLUMNS
            ),
            params![id, account_id],
            row_to_check,
        )
        .optional()?
        .ok_or(DbError::NotFound)
    }

    /// Get a check by ID without an owner scope. Used by ingestion, which
    /// is not acting for an account.
    pub fn get_check_by_id(&self, id: i64) -> Result<Check, DbError> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {} FROM checks WHERE id = ?1", CHECK_COLUMNS),
            params![id],
            row_to_check,
        )
        .optional()?
        .ok_or(DbError::NotFound)
    }

    /// Delete a check and its results.
    pub fn delete_check(&self, account_id: &str, id: i64) -> Result<(), DbError> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        if !check_owned(&tx, account_id, id)? {
            return Err(DbError::NotFound);
        }
        tx.execute("DELETE FROM check_results WHERE check_id = ?1", params![id])?;
        tx.execute("DELETE FROM checks WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(())
    }

    /// Live count of the checks an account owns.
    pub fn count_checks(&self, account_id: &str) -> Result<u32, DbError> {
        let conn = self.lock()?;
        Ok(count_checks(&conn, account_id)?)
    }

    // --- Results ---

    /// Append results in batch. Results for unknown checks are skipped;
    /// returns the number inserted.
    pub fn add_results(&self, results: &[NewCheckResult]) -> Result<usize, DbError> {
        if results.is_empty() {
            return Ok(0);
        }

        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        let mut inserted = 0;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO check_results (check_id, region, status_code, latency_ms, success, error_message, time)
                 SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7 WHERE EXISTS (SELECT 1 FROM checks WHERE id = ?1)",
            )?;

            for r in results {
                inserted += stmt.execute(params![
                    r.check_id,
                    r.region,
                    r.status_code,
                    r.latency_ms,
                    r.success,
                    r.error_message,
                    r.time.format(TIME_FORMAT).to_string(),
                ])?;
            }
        }

        tx.commit()?;
        Ok(inserted)
    }

    /// Get the results of an account's check within a window, ordered by
    /// time and then insertion order.
    pub fn get_results(
        &self,
        account_id: &str,
        check_id: i64,
        window: &ResultWindow,
    ) -> Result<Vec<RawCheckResult>, DbError> {
        let conn = self.lock()?;
        if !check_owned(&conn, account_id, check_id)? {
            return Err(DbError::NotFound);
        }

        let start = window
            .start
            .map(|t| t.format(TIME_FORMAT).to_string())
            .unwrap_or_default();
        let end = window.end.map(|t| t.format(TIME_FORMAT).to_string());
        // With a limit, take the newest rows and restore ascending order below.
        let limit = window.limit.map_or(-1, |l| l as i64);

        let mut stmt = conn.prepare(
            "SELECT id, check_id, region, status_code, latency_ms, success, error_message, time
             FROM check_results
             WHERE check_id = ?1 AND time >= ?2 AND (?3 IS NULL OR time < ?3)
             ORDER BY time DESC, id DESC LIMIT ?4",
        )?;

        let mut results = stmt
            .query_map(params![check_id, start, end, limit], row_to_raw_result)?
            .collect::<SqlResult<Vec<_>>>()?;

        results.reverse();
        Ok(results)
    }

    /// Delete results of a check before a cutoff time.
    pub fn delete_results_before(&self, check_id: i64, cutoff: DateTime<Utc>) -> Result<usize, DbError> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM check_results WHERE check_id = ?1 AND time < ?2",
            params![check_id, cutoff.format(TIME_FORMAT).to_string()],
        )?;
        Ok(deleted)
    }

    // --- Profiles ---

    /// Get an account's profile. Accounts without a stored profile get the
    /// free tier with every field defaulted.
    pub fn get_profile(&self, account_id: &str) -> Result<Profile, DbError> {
        let conn = self.lock()?;
        get_profile(&conn, account_id)
    }

    /// Set an account's plan tier, keeping any per-account overrides.
    pub fn set_plan(&self, account_id: &str, plan: PlanTier) -> Result<(), DbError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO profiles (account_id, plan) VALUES (?1, ?2)
             ON CONFLICT(account_id) DO UPDATE SET plan=excluded.plan",
            params![account_id, plan.as_str()],
        )?;
        Ok(())
    }

    /// Store a profile with explicit per-account overrides.
    pub fn upsert_profile(
        &self,
        account_id: &str,
        plan: Option<PlanTier>,
        max_checks: Option<u32>,
        min_interval_minutes: Option<u32>,
        retention_days: Option<u32>,
    ) -> Result<(), DbError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO profiles (account_id, plan, max_checks, min_interval_minutes, retention_days)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(account_id) DO UPDATE SET plan=excluded.plan, max_checks=excluded.max_checks,
             min_interval_minutes=excluded.min_interval_minutes, retention_days=excluded.retention_days",
            params![
                account_id,
                plan.map(PlanTier::as_str),
                max_checks,
                min_interval_minutes,
                retention_days,
            ],
        )?;
        Ok(())
    }

    /// Current plan usage with a live check count.
    pub fn get_usage(&self, account_id: &str) -> Result<PlanUsage, DbError> {
        let conn = self.lock()?;
        let profile = get_profile(&conn, account_id)?;
        let current = count_checks(&conn, account_id)?;
        Ok(profile.usage(current))
    }
}

fn count_checks(conn: &Connection, account_id: &str) -> Result<u32, rusqlite::Error> {
    conn.query_row(
        "SELECT COUNT(*) FROM checks WHERE account_id = ?1",
        params![account_id],
        |row| row.get(0),
    )
}

fn check_owned(conn: &Connection, account_id: &str, id: i64) -> Result<bool, rusqlite::Error> {
    conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM checks WHERE id = ?1 AND account_id = ?2)",
        params![id, account_id],
        |row| row.get(0),
    )
}

fn get_profile(conn: &Connection, account_id: &str) -> Result<Profile, DbError> {
    let row: Option<(Option<PlanTier>, Option<u32>, Option<u32>, Option<u32>)> = conn
        .query_row(
            "SELECT plan, max_checks, min_interval_minutes, retention_days FROM profiles WHERE account_id = ?1",
            params![account_id],
            |row| {
                let plan: Option<String> = row.get(0)?;
                let plan = plan
                    .map(|p| {
                        p.parse::<PlanTier>().map_err(|e| {
                            rusqlite::Error::FromSqlConversionFailure(0, Type::Text, e.into())
                        })
                    })
                    .transpose()?;
                Ok((plan, row.get(1)?, row.get(2)?, row.get(3)?))
            },
        )
        .optional()?;

    let (plan, max_checks, min_interval, retention) = row.unwrap_or((None, None, None, None));
    Ok(Profile::from_parts(
        account_id,
        plan,
        max_checks,
        min_interval,
        retention,
    ))
}

fn regions_json(regions: &[String]) -> String {
    serde_json::to_string(regions).unwrap_or_else(|_| "[]".to_string())
}

fn parse_column<T: std::str::FromStr<Err = String>>(idx: usize, value: &str) -> SqlResult<T> {
    value
        .parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn time_column(idx: usize, value: &str) -> SqlResult<DateTime<Utc>> {
    parse_db_time(value).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("invalid timestamp: {}", value).into(),
        )
    })
}

fn row_to_check(row: &Row<'_>) -> SqlResult<Check> {
    let interval: String = row.get(4)?;
    let regions: String = row.get(5)?;
    let status: String = row.get(8)?;
    let last_status: Option<String> = row.get(9)?;
    let created_at: String = row.get(11)?;
    let last_result_at: Option<String> = row.get(12)?;

    Ok(Check {
        id: row.get(0)?,
        account_id: row.get(1)?,
        url: row.get(2)?,
        name: row.get(3)?,
        interval: parse_column(4, &interval)?,
        regions: serde_json::from_str(&regions)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?,
        timeout_secs: row.get(6)?,
        expected_status_code: row.get(7)?,
        status: parse_column(8, &status)?,
        last_status: last_status
            .as_deref()
            .map(|s| parse_column(9, s))
            .transpose()?,
        failure_streak: row.get(10)?,
        last_result_at: last_result_at
            .as_deref()
            .map(|s| time_column(12, s))
            .transpose()?,
        created_at: time_column(11, &created_at)?,
    })
}

/// Map a result row without trusting its column types. The prober writes
/// these rows, so a value of the wrong type or range marks the row invalid
/// instead of failing the whole query.
fn row_to_raw_result(row: &Row<'_>) -> SqlResult<RawCheckResult> {
    let mut invalid = None;
    let mut flag = |reason: MalformedResult| {
        invalid.get_or_insert(reason);
    };

    let region = match row.get::<_, Value>(2)? {
        Value::Text(s) => Some(s),
        _ => None,
    };

    let status_code = match row.get::<_, Value>(3)? {
        Value::Null => None,
        Value::Integer(i) => u16::try_from(i).map_err(|_| flag(MalformedResult::InvalidStatusCode)).ok(),
        Value::Text(s) => s.trim().parse::<u16>().map_err(|_| flag(MalformedResult::InvalidStatusCode)).ok(),
        _ => {
            flag(MalformedResult::InvalidStatusCode);
            None
        }
    };

    let latency_ms = match row.get::<_, Value>(4)? {
        Value::Null => None,
        Value::Integer(i) => Some(i as f64),
        Value::Real(f) => Some(f),
        Value::Text(s) => s.trim().parse::<f64>().map_err(|_| flag(MalformedResult::InvalidLatency)).ok(),
        Value::Blob(_) => {
            flag(MalformedResult::InvalidLatency);
            None
        }
    };

    let success = match row.get::<_, Value>(5)? {
        Value::Null => None,
        Value::Integer(i) => Some(i != 0),
        _ => {
            flag(MalformedResult::InvalidSuccess);
            None
        }
    };

    let error_message = match row.get::<_, Value>(6)? {
        Value::Text(s) => Some(s),
        _ => None,
    };

    let time = match row.get::<_, Value>(7)? {
        Value::Text(s) => parse_db_time(&s),
        _ => None,
    };
    let time = time.unwrap_or_else(|| {
        flag(MalformedResult::InvalidTime);
        DateTime::<Utc>::MIN_UTC
    });

    Ok(RawCheckResult {
        id: row.get(0)?,
        check_id: row.get(1)?,
        region,
        status_code,
        latency_ms,
        success,
        error_message,
        time,
        invalid,
    })
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [
        "%Y-%m-%d %H:%M:%S%.9f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.9fZ",
        "%Y-%m-%dT%H:%M:%SZ",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use tempfile::NamedTempFile;

    fn new_store() -> (NamedTempFile, Store) {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        (tmp, store)
    }

    fn new_check(account: &str) -> Check {
        Check {
            account_id: account.to_string(),
            url: "https://example.com".to_string(),
            name: Some("Example".to_string()),
            regions: vec!["us".to_string(), "eu".to_string()],
            ..Default::default()
        }
    }

    fn result_at(check_id: i64, region: &str, success: bool, time: DateTime<Utc>) -> NewCheckResult {
        NewCheckResult {
            check_id,
            region: region.to_string(),
            status_code: if success { Some(200) } else { None },
            latency_ms: 100.0,
            success,
            error_message: None,
            time,
        }
    }

    #[test]
    fn test_check_crud() {
        let (_tmp, store) = new_store();

        // Create
        let mut check = new_check("alice");
        let id = store.add_check(&mut check, 5).unwrap();
        assert!(id > 0);

        // Read
        let fetched = store.get_check("alice", id).unwrap();
        assert_eq!(fetched.name.as_deref(), Some("Example"));
        assert_eq!(fetched.regions, vec!["us", "eu"]);
        assert_eq!(fetched.last_status, None);

        // Other accounts cannot see it
        assert!(matches!(store.get_check("mallory", id), Err(DbError::NotFound)));

        // Update
        let mut updated = fetched;
        updated.interval = CheckInterval::OneHour;
        updated.status = LifecycleStatus::Paused;
        store.update_check(&updated).unwrap();

        let fetched2 = store.get_check("alice", id).unwrap();
        assert_eq!(fetched2.interval, CheckInterval::OneHour);
        assert_eq!(fetched2.status, LifecycleStatus::Paused);

        let seen = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        store.update_check_state(id, Some(CheckStatus::Down), 3, Some(seen)).unwrap();
        let fetched3 = store.get_check("alice", id).unwrap();
        assert_eq!(fetched3.last_status, Some(CheckStatus::Down));
        assert_eq!(fetched3.failure_streak, 3);
        assert_eq!(fetched3.last_result_at, Some(seen));

        // Delete
        assert!(matches!(store.delete_check("mallory", id), Err(DbError::NotFound)));
        store.delete_check("alice", id).unwrap();
        assert!(store.get_check("alice", id).is_err());
    }

    #[test]
    fn test_add_check_enforces_limit() {
        let (_tmp, store) = new_store();

        store.add_check(&mut new_check("alice"), 2).unwrap();
        store.add_check(&mut new_check("alice"), 2).unwrap();
        let err = store.add_check(&mut new_check("alice"), 2).unwrap_err();
        assert!(matches!(err, DbError::QuotaExceeded { current: 2, limit: 2 }));

        // The limit is per account.
        store.add_check(&mut new_check("bob"), 2).unwrap();
        assert_eq!(store.count_checks("alice").unwrap(), 2);
        assert_eq!(store.count_checks("bob").unwrap(), 1);
    }

    #[test]
    fn test_results_ordering_and_window() {
        let (_tmp, store) = new_store();
        let mut check = new_check("alice");
        let id = store.add_check(&mut check, 5).unwrap();

        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let results = vec![
            result_at(id, "us", true, t0 + ChronoDuration::minutes(2)),
            result_at(id, "eu", false, t0),
            // Same timestamp as the first: insertion order breaks the tie.
            result_at(id, "eu", true, t0 + ChronoDuration::minutes(2)),
            result_at(id, "us", true, t0 + ChronoDuration::minutes(5)),
            // Unknown check is skipped.
            result_at(id + 100, "us", true, t0),
        ];
        assert_eq!(store.add_results(&results).unwrap(), 4);

        let all = store.get_results("alice", id, &ResultWindow::default()).unwrap();
        let regions: Vec<_> = all.iter().map(|r| r.region.clone().unwrap()).collect();
        assert_eq!(regions, vec!["eu", "us", "eu", "us"]);
        assert!(all[1].id < all[2].id);

        let window = ResultWindow {
            start: Some(t0 + ChronoDuration::minutes(1)),
            end: Some(t0 + ChronoDuration::minutes(5)),
            limit: None,
        };
        assert_eq!(store.get_results("alice", id, &window).unwrap().len(), 2);

        let newest = store
            .get_results("alice", id, &ResultWindow::default().with_limit(2))
            .unwrap();
        assert_eq!(newest.len(), 2);
        assert_eq!(newest[1].time, t0 + ChronoDuration::minutes(5));

        assert!(matches!(
            store.get_results("mallory", id, &ResultWindow::default()),
            Err(DbError::NotFound)
        ));
    }

    #[test]
    fn test_delete_cascades_and_retention() {
        let (_tmp, store) = new_store();
        let id = store.add_check(&mut new_check("alice"), 5).unwrap();
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();

        store
            .add_results(&[
                result_at(id, "us", true, t0),
                result_at(id, "us", true, t0 + ChronoDuration::days(2)),
            ])
            .unwrap();

        let deleted = store
            .delete_results_before(id, t0 + ChronoDuration::days(1))
            .unwrap();
        assert_eq!(deleted, 1);

        store.delete_check("alice", id).unwrap();
        let conn = store.lock().unwrap();
        let remaining: i64 = conn
            .query_row("SELECT COUNT(*) FROM check_results WHERE check_id = ?1", params![id], |r| r.get(0))
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[test]
    fn test_malformed_rows_are_returned_raw() {
        let (_tmp, store) = new_store();
        let id = store.add_check(&mut new_check("alice"), 5).unwrap();
        {
            let conn = store.lock().unwrap();
            conn.execute(
                "INSERT INTO check_results (check_id, region, status_code, latency_ms, success, time)
                 VALUES (?1, NULL, NULL, NULL, 0, '2024-01-01 00:00:00')",
                params![id],
            )
            .unwrap();
        }

        let results = store.get_results("alice", id, &ResultWindow::default()).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].region, None);
        assert_eq!(results[0].latency_ms, None);
        assert_eq!(results[0].success, Some(false));
    }

    #[test]
    fn test_unreadable_columns_flag_the_row() {
        let (_tmp, store) = new_store();
        let id = store.add_check(&mut new_check("alice"), 5).unwrap();
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        store.add_results(&[result_at(id, "us", true, t0)]).unwrap();
        {
            let conn = store.lock().unwrap();
            conn.execute_batch(&format!(
                "INSERT INTO check_results (check_id, region, status_code, latency_ms, success, time)
                 VALUES ({id}, 'us', -1, 10.0, 1, '2024-01-01 12:01:00');
                 INSERT INTO check_results (check_id, region, status_code, latency_ms, success, time)
                 VALUES ({id}, 'us', 200, 'slow', 1, '2024-01-01 12:02:00');
                 INSERT INTO check_results (check_id, region, status_code, latency_ms, success, time)
                 VALUES ({id}, 'us', 200, '12.5', 1, '2024-01-01 12:03:00');"
            ))
            .unwrap();
        }

        let results = store.get_results("alice", id, &ResultWindow::default()).unwrap();
        assert_eq!(results.len(), 4);
        assert_eq!(results[0].invalid, None);
        assert_eq!(results[1].invalid, Some(MalformedResult::InvalidStatusCode));
        assert_eq!(results[2].invalid, Some(MalformedResult::InvalidLatency));
        // Numeric text is read as a number.
        assert_eq!(results[3].invalid, None);
        assert_eq!(results[3].latency_ms, Some(12.5));

        let metrics = crate::metrics::aggregate(&results, &ResultWindow::default());
        assert_eq!(metrics.total_checks, 2);
        assert_eq!(metrics.excluded_results, 2);
    }

    #[test]
    fn test_unparseable_created_at_is_an_error() {
        let (_tmp, store) = new_store();
        let id = store.add_check(&mut new_check("alice"), 5).unwrap();
        {
            let conn = store.lock().unwrap();
            conn.execute("UPDATE checks SET created_at = 'yesterday' WHERE id = ?1", params![id])
                .unwrap();
        }
        assert!(matches!(store.get_check("alice", id), Err(DbError::Sqlite(_))));
    }

    #[test]
    fn test_profiles_and_usage() {
        let (_tmp, store) = new_store();

        let profile = store.get_profile("alice").unwrap();
        assert_eq!(profile.plan, Field::Defaulted(PlanTier::Free));

        store.add_check(&mut new_check("alice"), 5).unwrap();
        let usage = store.get_usage("alice").unwrap();
        assert_eq!(usage.checks, CheckAllowance { current: 1, limit: 5 });
        assert_eq!(usage.min_interval.minutes, 15);

        store.set_plan("alice", PlanTier::Pro).unwrap();
        let usage = store.get_usage("alice").unwrap();
        assert_eq!(usage.plan, PlanTier::Pro);
        assert_eq!(usage.checks.limit, 100);

        store
            .upsert_profile("alice", Some(PlanTier::Starter), Some(40), None, Some(60))
            .unwrap();
        let profile = store.get_profile("alice").unwrap();
        assert_eq!(profile.max_checks, Field::Present(40));
        assert_eq!(profile.min_interval_minutes, Field::Defaulted(5));
        assert_eq!(profile.retention_days, Field::Present(60));
    }
}
