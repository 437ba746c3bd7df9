//! Record Normalizer: maps loosely-typed upstream records onto
//! [`ProgramRecord`].
//!
//! The upstream API does not guarantee consistent key naming across
//! resources or releases, so every canonical attribute carries an
//! ordered list of known spellings. The first present value wins;
//! anything absent or malformed degrades to a typed default, never an
//! error. New upstream spellings are added to the candidate tables,
//! not as inline conditionals.

use crate::models::ProgramRecord;
use serde_json::{Map, Value};

/// Financial year used when the upstream record carries none.
pub const DEFAULT_FIN_YEAR: &str = "2023-2024";

const STATE_NAME: &[&str] = &["state_name", "State_Name", "statename"];
const STATE_CODE: &[&str] = &["state_code", "State_Code", "statecode"];
const DISTRICT_NAME: &[&str] = &["district_name", "District_Name", "districtname"];
const DISTRICT_CODE: &[&str] = &["district_code", "District_Code", "districtcode"];
const BLOCK_NAME: &[&str] = &["block_name", "Block_Name", "blockname"];
const BLOCK_CODE: &[&str] = &["block_code", "Block_Code", "blockcode"];
const PANCHAYAT_NAME: &[&str] = &["panchayat_name", "Panchayat_Name", "panchayatname"];
const PANCHAYAT_CODE: &[&str] = &["panchayat_code", "Panchayat_Code", "panchayatcode"];
const FIN_YEAR: &[&str] = &["fin_year", "Fin_Year", "finyear", "financial_year"];

const TOTAL_EXPENDITURE: &[&str] = &["Total_Exp", "total_expenditure", "expenditure"];
const TOTAL_HOUSEHOLDS_WORKED: &[&str] = &[
    "Total_Households_Worked",
    "total_households_worked",
    "households",
];
const TOTAL_PERSONDAYS_GENERATED: &[&str] = &[
    "Persondays_of_Central_Liability_so_far",
    "total_persondays_generated",
    "persondays",
];
const TOTAL_WOMEN_PERSONDAYS: &[&str] = &[
    "Women_Persondays",
    "total_women_persondays",
    "women_persondays",
];
const TOTAL_SC_PERSONDAYS: &[&str] = &["SC_persondays", "total_sc_persondays", "sc_persondays"];
const TOTAL_ST_PERSONDAYS: &[&str] = &["ST_persondays", "total_st_persondays", "st_persondays"];
const TOTAL_WORKS_COMPLETED: &[&str] = &[
    "Number_of_Completed_Works",
    "total_works_completed",
    "works_completed",
];
const TOTAL_WORKS_ONGOING: &[&str] = &[
    "Number_of_Ongoing_Works",
    "total_works_ongoing",
    "works_ongoing",
];
const AVG_DAYS_EMPLOYMENT: &[&str] = &[
    "Average_days_of_employment_provided_per_Household",
    "avg_days_employment_provided",
    "avg_employment",
];
const TOTAL_PAYMENT_MADE: &[&str] = &["Wages", "total_payment_made", "payment"];
const AVG_WAGE_RATE: &[&str] = &[
    "Average_Wage_rate_per_day_per_person",
    "avg_wage_rate",
    "wage_rate",
];

/// Transforms one raw upstream record into its canonical form. Pure
/// and infallible; the untouched input is retained in `raw_data`.
pub fn normalize_record(raw: &Map<String, Value>) -> ProgramRecord {
    ProgramRecord {
        state_name: first_text(raw, STATE_NAME),
        state_code: first_text(raw, STATE_CODE),
        district_name: first_text(raw, DISTRICT_NAME),
        district_code: first_text(raw, DISTRICT_CODE),
        block_name: first_text(raw, BLOCK_NAME),
        block_code: first_text(raw, BLOCK_CODE),
        panchayat_name: first_text(raw, PANCHAYAT_NAME),
        panchayat_code: first_text(raw, PANCHAYAT_CODE),
        fin_year: first_text(raw, FIN_YEAR).unwrap_or_else(|| DEFAULT_FIN_YEAR.to_string()),
        total_expenditure: first_f64(raw, TOTAL_EXPENDITURE),
        total_households_worked: first_i64(raw, TOTAL_HOUSEHOLDS_WORKED),
        total_persondays_generated: first_i64(raw, TOTAL_PERSONDAYS_GENERATED),
        total_women_persondays: first_i64(raw, TOTAL_WOMEN_PERSONDAYS),
        total_sc_persondays: first_i64(raw, TOTAL_SC_PERSONDAYS),
        total_st_persondays: first_i64(raw, TOTAL_ST_PERSONDAYS),
        total_works_completed: first_i64(raw, TOTAL_WORKS_COMPLETED),
        total_works_ongoing: first_i64(raw, TOTAL_WORKS_ONGOING),
        avg_days_employment_provided: first_f64(raw, AVG_DAYS_EMPLOYMENT),
        total_payment_made: first_f64(raw, TOTAL_PAYMENT_MADE),
        avg_wage_rate: first_f64(raw, AVG_WAGE_RATE),
        raw_data: Value::Object(raw.clone()),
    }
}

/// A value is "present" when it exists and is neither null nor an
/// empty string.
fn first_present<'a>(raw: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| {
        raw.get(*key).filter(|value| match value {
            Value::Null => false,
            Value::String(s) => !s.trim().is_empty(),
            _ => true,
        })
    })
}

fn first_text(raw: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    match first_present(raw, keys)? {
        Value::String(s) => Some(s.trim().to_string()),
        // Numeric codes show up as bare numbers in some responses.
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn first_f64(raw: &Map<String, Value>, keys: &[&str]) -> f64 {
    match first_present(raw, keys) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn first_i64(raw: &Map<String, Value>, keys: &[&str]) -> i64 {
    match first_present(raw, keys) {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            trimmed
                .parse::<i64>()
                .ok()
                .or_else(|| trimmed.parse::<f64>().ok().map(|f| f as i64))
                .unwrap_or(0)
        }
        _ => 0,
    }
}
