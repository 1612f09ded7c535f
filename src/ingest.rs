//! CSV readers for the SCADA telemetry export and INMET hourly weather files.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDate};
use csv::{ReaderBuilder, StringRecord, Trim};
use thiserror::Error;
use tracing::{debug, info};

use crate::normalize::{parse_decimal, VendorRow};
use crate::sample::{HourKey, WeatherSample, WEATHER_CHANNELS, WEATHER_CHANNEL_COUNT};

pub const INMET_PREAMBLE_LINES: usize = 8;

const VENDOR_TIMESTAMP_HEADER: &str = "DATA/HORA";
const INMET_DATE_HEADERS: [&str; 2] = ["Data", "DATA (YYYY-MM-DD)"];
const INMET_HOUR_HEADERS: [&str; 2] = ["Hora UTC", "HORA (UTC)"];
const INMET_DATE_FORMATS: [&str; 3] = ["%Y/%m/%d", "%Y-%m-%d", "%d/%m/%Y"];

/// INMET station headers, in weather channel order.
const INMET_CHANNEL_HEADERS: [&str; WEATHER_CHANNEL_COUNT] = [
    "PRECIPITAÇÃO TOTAL, HORÁRIO (mm)",
    "PRESSAO ATMOSFERICA AO NIVEL DA ESTACAO, HORARIA (mB)",
    "PRESSÃO ATMOSFERICA MAX.NA HORA ANT. (AUT) (mB)",
    "PRESSÃO ATMOSFERICA MIN. NA HORA ANT. (AUT) (mB)",
    "RADIACAO GLOBAL (Kj/m²)",
    "TEMPERATURA DO AR - BULBO SECO, HORARIA (°C)",
    "TEMPERATURA DO PONTO DE ORVALHO (°C)",
    "TEMPERATURA MÁXIMA NA HORA ANT. (AUT) (°C)",
    "TEMPERATURA MÍNIMA NA HORA ANT. (AUT) (°C)",
    "TEMPERATURA ORVALHO MAX. NA HORA ANT. (AUT) (°C)",
    "TEMPERATURA ORVALHO MIN. NA HORA ANT. (AUT) (°C)",
    "UMIDADE REL. MAX. NA HORA ANT. (AUT) (%)",
    "UMIDADE REL. MIN. NA HORA ANT. (AUT) (%)",
    "UMIDADE RELATIVA DO AR, HORARIA (%)",
    "VENTO, DIREÇÃO HORARIA (gr) (° (gr))",
    "VENTO, RAJADA MAXIMA (m/s)",
    "VENTO, VELOCIDADE HORARIA (m/s)",
];

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("no header row containing '{0}' found")]
    MissingHeaderRow(&'static str),
    #[error("weather file ends inside its {expected}-line preamble")]
    TruncatedPreamble { expected: usize },
    #[error("weather file has no '{0}' column")]
    MissingColumn(&'static str),
    #[error("weather row {row}: unparseable date '{value}'")]
    InvalidDate { row: usize, value: String },
    #[error("weather row {row}: unparseable UTC hour '{value}'")]
    InvalidHour { row: usize, value: String },
    #[error("weather row {row}: column {column} is not a number: '{value}'")]
    InvalidNumber {
        row: usize,
        column: &'static str,
        value: String,
    },
}

pub fn read_vendor_csv(path: &Path) -> Result<Vec<VendorRow>, IngestError> {
    let bytes = read_bytes(path)?;
    let rows = parse_vendor_csv(&bytes)?;
    info!(
        component = "ingest",
        event = "ingest.telemetry.loaded",
        path = %path.display(),
        rows = rows.len()
    );
    Ok(rows)
}

/// Rows above the `DATA/HORA` header (export titles) are skipped; `;` is
/// used as delimiter when the header line carries more of them than commas.
pub fn parse_vendor_csv(bytes: &[u8]) -> Result<Vec<VendorRow>, IngestError> {
    let text = decode_text(bytes);
    let body = skip_to_header(&text, VENDOR_TIMESTAMP_HEADER)
        .ok_or(IngestError::MissingHeaderRow(VENDOR_TIMESTAMP_HEADER))?;
    let header_line = body.lines().next().unwrap_or_default();

    let mut reader = ReaderBuilder::new()
        .delimiter(sniff_delimiter(header_line))
        .trim(Trim::All)
        .from_reader(body.as_bytes());

    let mut rows = Vec::new();
    for record in reader.deserialize::<VendorRow>() {
        rows.push(record?);
    }
    Ok(rows)
}

pub fn read_inmet_weather(path: &Path) -> Result<Vec<WeatherSample>, IngestError> {
    let bytes = read_bytes(path)?;
    let rows = parse_inmet_weather(&bytes)?;
    info!(
        component = "ingest",
        event = "ingest.weather.loaded",
        path = %path.display(),
        rows = rows.len()
    );
    Ok(rows)
}

/// INMET station export: metadata preamble, `;` delimiter, decimal comma,
/// latin-1 text and a trailing empty column. Unknown columns are ignored and
/// empty cells become `None`.
pub fn parse_inmet_weather(bytes: &[u8]) -> Result<Vec<WeatherSample>, IngestError> {
    let text = decode_text(bytes);
    let body = skip_lines(&text, INMET_PREAMBLE_LINES).ok_or(IngestError::TruncatedPreamble {
        expected: INMET_PREAMBLE_LINES,
    })?;

    let mut reader = ReaderBuilder::new()
        .delimiter(b';')
        .flexible(true)
        .trim(Trim::All)
        .from_reader(body.as_bytes());

    let headers = reader.headers()?.clone();
    let date_idx =
        find_column(&headers, &INMET_DATE_HEADERS).ok_or(IngestError::MissingColumn("Data"))?;
    let hour_idx =
        find_column(&headers, &INMET_HOUR_HEADERS).ok_or(IngestError::MissingColumn("Hora UTC"))?;
    let channel_idx: Vec<Option<usize>> = INMET_CHANNEL_HEADERS
        .iter()
        .map(|header| find_column(&headers, &[*header]))
        .collect();

    let absent = channel_idx.iter().filter(|idx| idx.is_none()).count();
    if absent > 0 {
        debug!(
            component = "ingest",
            event = "ingest.weather.columns_absent",
            absent
        );
    }

    let mut out = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        if record.iter().all(str::is_empty) {
            continue;
        }

        let raw_date = record.get(date_idx).unwrap_or_default();
        let date = parse_weather_date(raw_date).ok_or_else(|| IngestError::InvalidDate {
            row,
            value: raw_date.to_string(),
        })?;
        let raw_hour = record.get(hour_idx).unwrap_or_default();
        let hour = parse_utc_hour(raw_hour).ok_or_else(|| IngestError::InvalidHour {
            row,
            value: raw_hour.to_string(),
        })?;

        let mut channels = [None; WEATHER_CHANNEL_COUNT];
        for (k, idx) in channel_idx.iter().enumerate() {
            let Some(idx) = idx else { continue };
            let raw = record.get(*idx).unwrap_or_default();
            if raw.is_empty() {
                continue;
            }
            channels[k] = Some(parse_decimal(raw).ok_or_else(|| IngestError::InvalidNumber {
                row,
                column: WEATHER_CHANNELS[k],
                value: raw.to_string(),
            })?);
        }

        out.push(WeatherSample {
            key: HourKey {
                year: date.year(),
                month: date.month(),
                day: date.day(),
                hour,
            },
            channels,
        });
    }

    Ok(out)
}

/// Concatenate several weather files in the order given.
pub fn read_inmet_weather_files(paths: &[PathBuf]) -> Result<Vec<WeatherSample>, IngestError> {
    let mut out = Vec::new();
    for path in paths {
        out.extend(read_inmet_weather(path)?);
    }
    Ok(out)
}

fn read_bytes(path: &Path) -> Result<Vec<u8>, IngestError> {
    fs::read(path).map_err(|source| IngestError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// UTF-8 when valid, latin-1 otherwise.
fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.trim_start_matches('\u{feff}').to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

fn skip_lines(text: &str, count: usize) -> Option<&str> {
    let mut rest = text;
    for _ in 0..count {
        let newline = rest.find('\n')?;
        rest = &rest[newline + 1..];
    }
    Some(rest)
}

fn skip_to_header<'a>(text: &'a str, marker: &str) -> Option<&'a str> {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if line.contains(marker) {
            return Some(&text[offset..]);
        }
        offset += line.len();
    }
    None
}

fn sniff_delimiter(header_line: &str) -> u8 {
    let semicolons = header_line.matches(';').count();
    let commas = header_line.matches(',').count();
    if semicolons > commas {
        b';'
    } else {
        b','
    }
}

fn find_column(headers: &StringRecord, names: &[&str]) -> Option<usize> {
    headers.iter().position(|header| {
        let header = header.trim().to_uppercase();
        names.iter().any(|name| header == name.to_uppercase())
    })
}

fn parse_weather_date(raw: &str) -> Option<NaiveDate> {
    INMET_DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw.trim(), fmt).ok())
}

/// `"1300 UTC"`, `"1300"` or `"13:00"`.
fn parse_utc_hour(raw: &str) -> Option<u32> {
    let trimmed = raw.trim();
    let digits = trimmed.strip_suffix("UTC").unwrap_or(trimmed).trim();
    let hour_part = match digits.split_once(':') {
        Some((hour, _)) => hour,
        None if digits.len() == 4 => digits.get(..2)?,
        None => digits,
    };
    hour_part.parse::<u32>().ok().filter(|hour| *hour < 24)
}
