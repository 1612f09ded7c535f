//! Column normalization: vendor export fields to canonical raw samples.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::sample::{LevelStatus, RawSample};

const PUMP_OFF_CODE: f64 = 10.0;
const PUMP_ON_CODE: f64 = 90.0;

const TIMESTAMP_FORMATS: [&str; 6] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%Y/%m/%d %H:%M:%S",
];

/// One row as exported by the SCADA system, before any interpretation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorRow {
    #[serde(rename = "DATA/HORA")]
    pub timestamp: String,
    #[serde(rename = "VAZÃO ENTRADA (L/S)")]
    pub flow_in: String,
    #[serde(rename = "NÍVEL RESERVATÓRIO (%)")]
    pub reservoir_level: String,
    #[serde(rename = "PRESSÃO (mca)")]
    pub pressure: String,
    #[serde(rename = "GMB 1 (10 OFF/ 90 ON)")]
    pub pump_1: String,
    #[serde(rename = "GMB 2(10 OFF/ 90 ON)")]
    pub pump_2: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizeReport {
    pub input_rows: u64,
    pub output_rows: u64,
    pub duplicate_timestamps_removed: u64,
}

#[derive(Debug, Error, PartialEq)]
pub enum NormalizeError {
    #[error("row {row}: unparseable timestamp '{value}'")]
    InvalidTimestamp { row: usize, value: String },
    #[error("row {row}: field {field} is not a finite number: '{value}'")]
    InvalidNumber {
        row: usize,
        field: &'static str,
        value: String,
    },
    #[error("row {row}: field {field} is negative ({value})")]
    NegativeValue {
        row: usize,
        field: &'static str,
        value: f64,
    },
    #[error("row {row}: field {field} has unknown pump encoding '{value}' (expected 10 or 90)")]
    InvalidPumpEncoding {
        row: usize,
        field: &'static str,
        value: String,
    },
}

/// Map vendor rows to samples, stable-sort by timestamp and keep the first
/// row of every duplicated timestamp.
pub fn normalize_rows(
    rows: &[VendorRow],
) -> Result<(Vec<RawSample>, NormalizeReport), NormalizeError> {
    let mut samples = Vec::with_capacity(rows.len());
    for (idx, row) in rows.iter().enumerate() {
        samples.push(normalize_row(idx, row)?);
    }

    // `sort_by_key` is stable, so arrival order decides among duplicates.
    samples.sort_by_key(|sample| sample.timestamp);

    let mut deduped: Vec<RawSample> = Vec::with_capacity(samples.len());
    let mut duplicates_removed = 0u64;
    for sample in samples {
        if deduped
            .last()
            .map(|existing| existing.timestamp == sample.timestamp)
            .unwrap_or(false)
        {
            duplicates_removed += 1;
        } else {
            deduped.push(sample);
        }
    }

    let report = NormalizeReport {
        input_rows: rows.len() as u64,
        output_rows: deduped.len() as u64,
        duplicate_timestamps_removed: duplicates_removed,
    };

    if duplicates_removed > 0 {
        warn!(
            component = "normalize",
            event = "normalize.duplicates_removed",
            duplicates_removed
        );
    }
    info!(
        component = "normalize",
        event = "normalize.finish",
        input_rows = report.input_rows,
        output_rows = report.output_rows
    );

    Ok((deduped, report))
}

pub fn normalize_row(row_idx: usize, row: &VendorRow) -> Result<RawSample, NormalizeError> {
    Ok(RawSample {
        timestamp: parse_timestamp(row_idx, &row.timestamp)?,
        flow_in_rate: parse_non_negative(row_idx, "flow_in_rate", &row.flow_in)?,
        reservoir_level_percentage: parse_non_negative(
            row_idx,
            "reservoir_level_percentage",
            &row.reservoir_level,
        )?,
        pressure: parse_non_negative(row_idx, "pressure", &row.pressure)?,
        pump_1_on: parse_pump(row_idx, "pump_1", &row.pump_1)?,
        pump_2_on: parse_pump(row_idx, "pump_2", &row.pump_2)?,
        level_status: LevelStatus::Observed,
    })
}

pub fn parse_timestamp(row: usize, raw: &str) -> Result<NaiveDateTime, NormalizeError> {
    let trimmed = raw.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .ok_or_else(|| NormalizeError::InvalidTimestamp {
            row,
            value: raw.to_string(),
        })
}

/// Accepts `.` or `,` as decimal separator.
pub fn parse_decimal(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let parsed = if trimmed.contains(',') && !trimmed.contains('.') {
        trimmed.replace(',', ".").parse::<f64>().ok()
    } else {
        trimmed.parse::<f64>().ok()
    };
    parsed.filter(|v| v.is_finite())
}

fn parse_non_negative(row: usize, field: &'static str, raw: &str) -> Result<f64, NormalizeError> {
    let value = parse_decimal(raw).ok_or_else(|| NormalizeError::InvalidNumber {
        row,
        field,
        value: raw.to_string(),
    })?;
    if value < 0.0 {
        return Err(NormalizeError::NegativeValue { row, field, value });
    }
    Ok(value)
}

fn parse_pump(row: usize, field: &'static str, raw: &str) -> Result<bool, NormalizeError> {
    match parse_decimal(raw) {
        Some(code) if code == PUMP_OFF_CODE => Ok(false),
        Some(code) if code == PUMP_ON_CODE => Ok(true),
        _ => Err(NormalizeError::InvalidPumpEncoding {
            row,
            field,
            value: raw.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vendor(ts: &str, flow: &str, level: &str, p1: &str, p2: &str) -> VendorRow {
        VendorRow {
            timestamp: ts.to_string(),
            flow_in: flow.to_string(),
            reservoir_level: level.to_string(),
            pressure: "32,5".to_string(),
            pump_1: p1.to_string(),
            pump_2: p2.to_string(),
        }
    }

    #[test]
    fn maps_pump_codes_and_decimal_commas() {
        let row = vendor("2023-01-01 00:02:30", "10,25", "55.5", "90", "10");
        let sample = normalize_row(0, &row).unwrap();
        assert_eq!(sample.flow_in_rate, 10.25);
        assert_eq!(sample.reservoir_level_percentage, 55.5);
        assert_eq!(sample.pressure, 32.5);
        assert!(sample.pump_1_on);
        assert!(!sample.pump_2_on);
        assert_eq!(sample.level_status, LevelStatus::Observed);
    }

    #[test]
    fn unknown_pump_code_fails_fast() {
        let row = vendor("2023-01-01 00:02:30", "10", "55", "50", "10");
        let err = normalize_row(7, &row).unwrap_err();
        assert_eq!(
            err,
            NormalizeError::InvalidPumpEncoding {
                row: 7,
                field: "pump_1",
                value: "50".to_string()
            }
        );

        let already_boolean = vendor("2023-01-01 00:02:30", "10", "55", "10", "1");
        assert!(matches!(
            normalize_row(0, &already_boolean),
            Err(NormalizeError::InvalidPumpEncoding { field: "pump_2", .. })
        ));
    }

    #[test]
    fn structural_faults_are_rejected() {
        let bad_ts = vendor("yesterday", "10", "55", "10", "10");
        assert!(matches!(
            normalize_row(0, &bad_ts),
            Err(NormalizeError::InvalidTimestamp { .. })
        ));

        let bad_flow = vendor("2023-01-01 00:00:00", "n/a", "55", "10", "10");
        assert!(matches!(
            normalize_row(0, &bad_flow),
            Err(NormalizeError::InvalidNumber { field: "flow_in_rate", .. })
        ));

        let negative = vendor("2023-01-01 00:00:00", "-1", "55", "10", "10");
        assert!(matches!(
            normalize_row(0, &negative),
            Err(NormalizeError::NegativeValue { .. })
        ));
    }

    #[test]
    fn accepts_brazilian_timestamp_layout() {
        let ts = parse_timestamp(0, "05/03/2024 13:02:30").unwrap();
        assert_eq!(ts.to_string(), "2024-03-05 13:02:30");
        let ts = parse_timestamp(0, "2024-03-05T13:02:30.000").unwrap();
        assert_eq!(ts.to_string(), "2024-03-05 13:02:30");
    }

    #[test]
    fn sorts_stably_and_keeps_first_duplicate() {
        let rows = vec![
            vendor("2023-01-01 00:05:00", "3", "50", "90", "10"),
            vendor("2023-01-01 00:00:00", "1", "50", "90", "10"),
            vendor("2023-01-01 00:05:00", "4", "50", "90", "10"),
            vendor("2023-01-01 00:02:30", "2", "50", "90", "10"),
        ];

        let (samples, report) = normalize_rows(&rows).unwrap();
        let flows: Vec<f64> = samples.iter().map(|s| s.flow_in_rate).collect();
        assert_eq!(flows, vec![1.0, 2.0, 3.0]);
        assert_eq!(
            report,
            NormalizeReport {
                input_rows: 4,
                output_rows: 3,
                duplicate_timestamps_removed: 1
            }
        );
    }
}
