//! Persistence layer over SQLite: the canonical `program_data` table,
//! derived lookup tables, the append-only sync log, and the aggregate
//! read queries.

use crate::config::StorageConfig;
use crate::errors::Result;
use crate::models::{
    DatabaseStats, DistrictPerformance, DistrictSummary, ProgramRecord, StateSummary,
    SyncLogEntry, SyncLogWrite, UpsertCounts,
};
use crate::normalize::normalize_record;
use rusqlite::{params, Connection, ToSql};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};

pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

// The `revision` column starts at 0 and is bumped on every
// conflict-update, so `RETURNING revision` classifies each upsert as
// insert (0) or update (>0) in a single round trip. `block_name` and
// `panchayat_name` store '' for "absent": SQLite treats NULLs as
// distinct inside unique constraints, which would break the natural
// key for records without block/panchayat granularity.
const UPSERT_SQL: &str = "\
    INSERT INTO program_data (
        state_name, state_code, district_name, district_code,
        block_name, block_code, panchayat_name, panchayat_code,
        fin_year, total_expenditure, total_households_worked,
        total_persondays_generated, total_women_persondays,
        total_sc_persondays, total_st_persondays,
        total_works_completed, total_works_ongoing,
        avg_days_employment_provided, total_payment_made,
        avg_wage_rate, raw_data
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)
    ON CONFLICT (state_name, district_name, fin_year, block_name, panchayat_name)
    DO UPDATE SET
        state_code = excluded.state_code,
        district_code = excluded.district_code,
        block_code = excluded.block_code,
        panchayat_code = excluded.panchayat_code,
        total_expenditure = excluded.total_expenditure,
        total_households_worked = excluded.total_households_worked,
        total_persondays_generated = excluded.total_persondays_generated,
        total_women_persondays = excluded.total_women_persondays,
        total_sc_persondays = excluded.total_sc_persondays,
        total_st_persondays = excluded.total_st_persondays,
        total_works_completed = excluded.total_works_completed,
        total_works_ongoing = excluded.total_works_ongoing,
        avg_days_employment_provided = excluded.avg_days_employment_provided,
        total_payment_made = excluded.total_payment_made,
        avg_wage_rate = excluded.avg_wage_rate,
        raw_data = excluded.raw_data,
        revision = program_data.revision + 1,
        updated_at = datetime('now')
    RETURNING revision";

impl Database {
    pub fn open(config: &StorageConfig) -> Result<Self> {
        let conn = Connection::open(&config.database_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS program_data (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                state_name TEXT NOT NULL,
                state_code TEXT,
                district_name TEXT NOT NULL,
                district_code TEXT,
                block_name TEXT NOT NULL DEFAULT '',
                block_code TEXT,
                panchayat_name TEXT NOT NULL DEFAULT '',
                panchayat_code TEXT,
                fin_year TEXT NOT NULL,
                total_expenditure REAL NOT NULL DEFAULT 0,
                total_households_worked INTEGER NOT NULL DEFAULT 0,
                total_persondays_generated INTEGER NOT NULL DEFAULT 0,
                total_women_persondays INTEGER NOT NULL DEFAULT 0,
                total_sc_persondays INTEGER NOT NULL DEFAULT 0,
                total_st_persondays INTEGER NOT NULL DEFAULT 0,
                total_works_completed INTEGER NOT NULL DEFAULT 0,
                total_works_ongoing INTEGER NOT NULL DEFAULT 0,
                avg_days_employment_provided REAL NOT NULL DEFAULT 0,
                total_payment_made REAL NOT NULL DEFAULT 0,
                avg_wage_rate REAL NOT NULL DEFAULT 0,
                raw_data TEXT,
                revision INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE (state_name, district_name, fin_year, block_name, panchayat_name)
            );
            CREATE INDEX IF NOT EXISTS idx_program_data_district
                ON program_data (district_name, fin_year);
            CREATE TABLE IF NOT EXISTS states (
                state_name TEXT PRIMARY KEY,
                state_code TEXT,
                total_districts INTEGER NOT NULL DEFAULT 0,
                last_synced TEXT
            );
            CREATE TABLE IF NOT EXISTS districts (
                state_name TEXT NOT NULL,
                district_name TEXT NOT NULL,
                district_code TEXT,
                last_synced TEXT,
                PRIMARY KEY (state_name, district_name)
            );
            CREATE TABLE IF NOT EXISTS api_sync_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sync_type TEXT NOT NULL,
                state_name TEXT,
                fin_year TEXT,
                status TEXT NOT NULL,
                records_synced INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                started_at TEXT NOT NULL,
                completed_at TEXT
            );
            COMMIT;",
        )?;
        Ok(())
    }

    /// Normalizes a batch of raw upstream records, drops the ones
    /// missing mandatory identifiers, and reconciles the rest against
    /// the canonical table in one all-or-nothing transaction. Any row
    /// error rolls back the whole batch. Safe to re-apply the same
    /// records: replays classify as updates and leave the row count
    /// unchanged.
    pub fn upsert_batch(&self, records: &[Map<String, Value>]) -> Result<UpsertCounts> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let mut counts = UpsertCounts::default();

        {
            let mut stmt = tx.prepare(UPSERT_SQL)?;
            for raw in records {
                let record = normalize_record(raw);
                if !record.has_mandatory_identifiers() {
                    // ValidationSkip: counted neither as insert nor update.
                    continue;
                }
                let revision = Self::upsert_one(&mut stmt, &record)?;
                if revision == 0 {
                    counts.inserted += 1;
                } else {
                    counts.updated += 1;
                }
            }
        }

        tx.commit()?;
        log::info!(
            "Batch stored: {} inserted, {} updated",
            counts.inserted,
            counts.updated
        );
        Ok(counts)
    }

    fn upsert_one(stmt: &mut rusqlite::Statement<'_>, record: &ProgramRecord) -> Result<i64> {
        let revision = stmt.query_row(
            params![
                record.state_name.as_deref().unwrap_or_default(),
                record.state_code,
                record.district_name.as_deref().unwrap_or_default(),
                record.district_code,
                record.block_name.as_deref().unwrap_or(""),
                record.block_code,
                record.panchayat_name.as_deref().unwrap_or(""),
                record.panchayat_code,
                record.fin_year,
                record.total_expenditure,
                record.total_households_worked,
                record.total_persondays_generated,
                record.total_women_persondays,
                record.total_sc_persondays,
                record.total_st_persondays,
                record.total_works_completed,
                record.total_works_ongoing,
                record.avg_days_employment_provided,
                record.total_payment_made,
                record.avg_wage_rate,
                record.raw_data.to_string(),
            ],
            |row| row.get::<_, i64>(0),
        )?;
        Ok(revision)
    }

    /// Recomputes the `states` and `districts` lookup tables from the
    /// canonical data. Conflict-upserts keyed by name, so the tables
    /// self-heal on every sync.
    pub fn rebuild_lookups(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "INSERT INTO states (state_name, state_code, total_districts, last_synced)
             SELECT state_name, state_code, COUNT(DISTINCT district_name), datetime('now')
             FROM program_data
             WHERE state_name <> ''
             GROUP BY state_name, state_code
             ON CONFLICT (state_name) DO UPDATE SET
                total_districts = excluded.total_districts,
                last_synced = excluded.last_synced",
            [],
        )?;

        conn.execute(
            "INSERT INTO districts (state_name, district_name, district_code, last_synced)
             SELECT DISTINCT state_name, district_name, district_code, datetime('now')
             FROM program_data
             WHERE state_name <> '' AND district_name <> ''
             ON CONFLICT (state_name, district_name) DO UPDATE SET
                district_code = excluded.district_code,
                last_synced = excluded.last_synced",
            [],
        )?;

        Ok(())
    }

    /// Appends one immutable audit row for a sync attempt.
    pub fn append_sync_log(&self, entry: &SyncLogWrite) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO api_sync_log (sync_type, state_name, fin_year, status,
                records_synced, error_message, started_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.sync_type.as_str(),
                entry.state_name,
                entry.fin_year,
                entry.status.as_str(),
                entry.records_synced,
                entry.error_message,
                entry.started_at,
                entry.completed_at,
            ],
        )?;
        Ok(())
    }

    pub fn recent_sync_logs(&self, limit: i64) -> Result<Vec<SyncLogEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, sync_type, state_name, fin_year, status, records_synced,
                    error_message, started_at, completed_at
             FROM api_sync_log
             ORDER BY id DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            Ok(SyncLogEntry {
                id: row.get(0)?,
                sync_type: row.get(1)?,
                state_name: row.get(2)?,
                fin_year: row.get(3)?,
                status: row.get(4)?,
                records_synced: row.get(5)?,
                error_message: row.get(6)?,
                started_at: row.get(7)?,
                completed_at: row.get(8)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn list_states(&self) -> Result<Vec<StateSummary>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT state_name, state_code, total_districts, last_synced
             FROM states
             ORDER BY state_name",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(StateSummary {
                state_name: row.get(0)?,
                state_code: row.get(1)?,
                total_districts: row.get(2)?,
                last_synced: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn list_districts(&self, state_name: &str) -> Result<Vec<DistrictSummary>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT district_name, district_code, last_synced
             FROM districts
             WHERE state_name = ?1
             ORDER BY district_name",
        )?;
        let rows = stmt.query_map(params![state_name], |row| {
            Ok(DistrictSummary {
                district_name: row.get(0)?,
                district_code: row.get(1)?,
                last_synced: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Yearly performance aggregate for one district: additive metrics
    /// summed, rate metrics averaged, newest year first.
    pub fn district_performance(
        &self,
        district_name: &str,
        fin_year: Option<&str>,
    ) -> Result<Vec<DistrictPerformance>> {
        let conn = self.conn.lock().unwrap();

        let mut sql = String::from(
            "SELECT state_name,
                    district_name,
                    fin_year,
                    SUM(total_expenditure),
                    SUM(total_households_worked),
                    SUM(total_persondays_generated),
                    SUM(total_women_persondays),
                    SUM(total_sc_persondays),
                    SUM(total_st_persondays),
                    SUM(total_works_completed),
                    SUM(total_works_ongoing),
                    AVG(avg_days_employment_provided),
                    SUM(total_payment_made),
                    AVG(avg_wage_rate),
                    MAX(updated_at),
                    COUNT(*)
             FROM program_data
             WHERE district_name = ?1",
        );
        let mut bindings: Vec<&dyn ToSql> = vec![&district_name];
        if let Some(year) = fin_year.as_ref() {
            sql.push_str(" AND fin_year = ?2");
            bindings.push(year);
        }
        sql.push_str(" GROUP BY state_name, district_name, fin_year ORDER BY fin_year DESC");

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(&bindings[..], |row| {
            Ok(DistrictPerformance {
                state_name: row.get(0)?,
                district_name: row.get(1)?,
                fin_year: row.get(2)?,
                total_expenditure: row.get(3)?,
                total_households_worked: row.get(4)?,
                total_persondays_generated: row.get(5)?,
                total_women_persondays: row.get(6)?,
                total_sc_persondays: row.get(7)?,
                total_st_persondays: row.get(8)?,
                total_works_completed: row.get(9)?,
                total_works_ongoing: row.get(10)?,
                avg_days_employment_provided: row.get(11)?,
                total_payment_made: row.get(12)?,
                avg_wage_rate: row.get(13)?,
                last_updated: row.get(14)?,
                total_records: row.get(15)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    pub fn stats(&self) -> Result<DatabaseStats> {
        let conn = self.conn.lock().unwrap();
        let stats = conn.query_row(
            "SELECT COUNT(*),
                    COUNT(DISTINCT state_name),
                    COUNT(DISTINCT district_name),
                    COUNT(DISTINCT fin_year),
                    MAX(updated_at),
                    MIN(created_at),
                    COALESCE(SUM(total_expenditure), 0),
                    COALESCE(SUM(total_households_worked), 0)
             FROM program_data",
            [],
            |row| {
                Ok(DatabaseStats {
                    total_records: row.get(0)?,
                    total_states: row.get(1)?,
                    total_districts: row.get(2)?,
                    total_years: row.get(3)?,
                    last_updated: row.get(4)?,
                    first_record: row.get(5)?,
                    total_expenditure_all: row.get(6)?,
                    total_households_all: row.get(7)?,
                })
            },
        )?;
        Ok(stats)
    }
}
