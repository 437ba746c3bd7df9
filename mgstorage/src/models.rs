use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One normalized program-performance record, keyed by the
/// (state, district, fin_year, block, panchayat) tuple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramRecord {
    pub state_name: Option<String>,
    pub state_code: Option<String>,
    pub district_name: Option<String>,
    pub district_code: Option<String>,
    pub block_name: Option<String>,
    pub block_code: Option<String>,
    pub panchayat_name: Option<String>,
    pub panchayat_code: Option<String>,
    pub fin_year: String,
    pub total_expenditure: f64,
    pub total_households_worked: i64,
    pub total_persondays_generated: i64,
    pub total_women_persondays: i64,
    pub total_sc_persondays: i64,
    pub total_st_persondays: i64,
    pub total_works_completed: i64,
    pub total_works_ongoing: i64,
    pub avg_days_employment_provided: f64,
    pub total_payment_made: f64,
    pub avg_wage_rate: f64,
    /// Verbatim copy of the source record, kept for audit/debugging.
    pub raw_data: serde_json::Value,
}

impl ProgramRecord {
    /// Records missing either mandatory identifier are dropped before
    /// persistence.
    pub fn has_mandatory_identifiers(&self) -> bool {
        self.state_name.is_some() && self.district_name.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSummary {
    pub state_name: String,
    pub state_code: Option<String>,
    pub total_districts: i64,
    pub last_synced: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistrictSummary {
    pub district_name: String,
    pub district_code: Option<String>,
    pub last_synced: Option<String>,
}

/// Yearly aggregate row for one district.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistrictPerformance {
    pub state_name: String,
    pub district_name: String,
    pub fin_year: String,
    pub total_expenditure: f64,
    pub total_households_worked: i64,
    pub total_persondays_generated: i64,
    pub total_women_persondays: i64,
    pub total_sc_persondays: i64,
    pub total_st_persondays: i64,
    pub total_works_completed: i64,
    pub total_works_ongoing: i64,
    pub avg_days_employment_provided: f64,
    pub total_payment_made: f64,
    pub avg_wage_rate: f64,
    pub last_updated: Option<String>,
    pub total_records: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncLogEntry {
    pub id: i64,
    pub sync_type: String,
    pub state_name: Option<String>,
    pub fin_year: Option<String>,
    pub status: String,
    pub records_synced: i64,
    pub error_message: Option<String>,
    pub started_at: String,
    pub completed_at: Option<String>,
}

/// Payload for one append-only sync-log row.
#[derive(Debug, Clone)]
pub struct SyncLogWrite {
    pub sync_type: SyncType,
    pub state_name: Option<String>,
    pub fin_year: Option<String>,
    pub status: SyncStatus,
    pub records_synced: i64,
    pub error_message: Option<String>,
    pub started_at: String,
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncType {
    Scheduled,
    Manual,
}

impl SyncType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncType::Scheduled => "scheduled",
            SyncType::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Success,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Success => "success",
            SyncStatus::Failed => "failed",
        }
    }
}

/// Optional scope filters forwarded to the upstream API.
#[derive(Debug, Clone, Default)]
pub struct SyncScope {
    pub state_name: Option<String>,
    pub fin_year: Option<String>,
}

/// Per-batch insert/update classification from the upserter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertCounts {
    pub inserted: u64,
    pub updated: u64,
}

impl UpsertCounts {
    pub fn total(&self) -> u64 {
        self.inserted + self.updated
    }
}

/// Summary of one completed sync attempt.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub inserted: u64,
    pub updated: u64,
    /// Number of upstream fetch calls issued.
    pub pages: u32,
    pub elapsed: Duration,
}

impl SyncReport {
    pub fn records_synced(&self) -> u64 {
        self.inserted + self.updated
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseStats {
    pub total_records: i64,
    pub total_states: i64,
    pub total_districts: i64,
    pub total_years: i64,
    pub last_updated: Option<String>,
    pub first_record: Option<String>,
    pub total_expenditure_all: f64,
    pub total_households_all: i64,
}
