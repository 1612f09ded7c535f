//! SQLite bronze/feature tables and flat-file exports of the feature table.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use thiserror::Error;
use tracing::info;

use crate::features::{FeatureDType, FeatureRow, FeatureSchema};
use crate::sample::{
    HourKey, LevelStatus, RawSample, WeatherSample, WEATHER_CHANNELS, WEATHER_CHANNEL_COUNT,
};

/// `%.f` keeps sub-second readings distinct; whole seconds print without a fraction.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";
const FEATURES_TABLE: &str = "flow_features";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("column name '{0}' is not a plain identifier")]
    InvalidColumnName(String),
    #[error("row {id} has {found} values, schema has {expected} columns")]
    RowWidthMismatch {
        id: u64,
        found: usize,
        expected: usize,
    },
    #[error("stored row is unreadable: {0}")]
    CorruptRow(String),
}

pub struct FlowStore {
    conn: Connection,
}

impl FlowStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA temp_store=MEMORY;
            ",
        )?;
        ensure_bronze_schema(&conn)?;

        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        ensure_bronze_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Upsert keyed by timestamp; a later write replaces the stored reading.
    pub fn upsert_raw_samples(&mut self, rows: &[RawSample]) -> Result<usize, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "
                INSERT INTO elipse_bronze (
                    timestamp,
                    flow_in_l_s,
                    reservoir_level_percentage,
                    pressure_mca,
                    gmb_1_is_on,
                    gmb_2_is_on
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(timestamp) DO UPDATE SET
                    flow_in_l_s = excluded.flow_in_l_s,
                    reservoir_level_percentage = excluded.reservoir_level_percentage,
                    pressure_mca = excluded.pressure_mca,
                    gmb_1_is_on = excluded.gmb_1_is_on,
                    gmb_2_is_on = excluded.gmb_2_is_on
                ",
            )?;

            for row in rows {
                stmt.execute(params![
                    format_timestamp(row.timestamp),
                    row.flow_in_rate,
                    row.reservoir_level_percentage,
                    row.pressure,
                    row.pump_1_on,
                    row.pump_2_on,
                ])?;
            }
        }
        tx.commit()?;

        Ok(rows.len())
    }

    pub fn load_raw_samples(&self) -> Result<Vec<RawSample>, StoreError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT
                timestamp,
                flow_in_l_s,
                reservoir_level_percentage,
                pressure_mca,
                gmb_1_is_on,
                gmb_2_is_on
            FROM elipse_bronze
            ORDER BY timestamp ASC
            ",
        )?;

        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let raw_ts: String = row.get(0)?;
            out.push(RawSample {
                timestamp: parse_timestamp(&raw_ts)?,
                flow_in_rate: row.get(1)?,
                reservoir_level_percentage: row.get(2)?,
                pressure: row.get(3)?,
                pump_1_on: row.get(4)?,
                pump_2_on: row.get(5)?,
                level_status: LevelStatus::Observed,
            });
        }
        Ok(out)
    }

    /// Insert weather rows under `source`. The first row stored for an hour
    /// key is kept; later duplicates are ignored.
    pub fn insert_weather(
        &mut self,
        source: &str,
        rows: &[WeatherSample],
    ) -> Result<usize, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let sql = format!(
            "INSERT INTO climate_bronze (source, year, month, day, hour, {}) VALUES ({}) \
             ON CONFLICT(source, year, month, day, hour) DO NOTHING",
            WEATHER_CHANNELS.join(", "),
            (1..=5 + WEATHER_CHANNEL_COUNT)
                .map(|i| format!("?{i}"))
                .collect::<Vec<_>>()
                .join(", ")
        );

        let mut inserted = 0;
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(&sql)?;
            for row in rows {
                let mut values: Vec<Value> = vec![
                    Value::Text(source.to_string()),
                    Value::Integer(row.key.year as i64),
                    Value::Integer(row.key.month as i64),
                    Value::Integer(row.key.day as i64),
                    Value::Integer(row.key.hour as i64),
                ];
                values.extend(row.channels.iter().map(|v| optional_real(*v)));
                inserted += stmt.execute(params_from_iter(values))?;
            }
        }
        tx.commit()?;

        Ok(inserted)
    }

    pub fn load_weather(&self, source: &str) -> Result<Vec<WeatherSample>, StoreError> {
        let sql = format!(
            "SELECT year, month, day, hour, {} FROM climate_bronze \
             WHERE source = ?1 ORDER BY year, month, day, hour",
            WEATHER_CHANNELS.join(", ")
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params![source])?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut channels = [None; WEATHER_CHANNEL_COUNT];
            for (k, slot) in channels.iter_mut().enumerate() {
                *slot = row.get(4 + k)?;
            }
            out.push(WeatherSample {
                key: HourKey {
                    year: row.get(0)?,
                    month: row.get(1)?,
                    day: row.get(2)?,
                    hour: row.get(3)?,
                },
                channels,
            });
        }
        Ok(out)
    }

    /// Drop and rebuild `flow_features` for `schema`, then write every row,
    /// all inside one transaction.
    pub fn replace_features(
        &mut self,
        schema: &FeatureSchema,
        rows: &[FeatureRow],
    ) -> Result<(), StoreError> {
        for column in &schema.columns {
            validate_identifier(&column.name)?;
        }

        let column_defs: Vec<String> = schema
            .columns
            .iter()
            .map(|c| format!("{} {}", c.name, sql_type(c.dtype)))
            .collect();
        let create = format!(
            "
            DROP TABLE IF EXISTS {FEATURES_TABLE};
            CREATE TABLE {FEATURES_TABLE} (
                id INTEGER PRIMARY KEY,
                timestamp TEXT NOT NULL,
                level_status TEXT NOT NULL,
                {}
            );
            ",
            column_defs.join(",\n                ")
        );
        let insert = format!(
            "INSERT INTO {FEATURES_TABLE} (id, timestamp, level_status, {}) VALUES ({})",
            schema
                .columns
                .iter()
                .map(|c| c.name.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            (1..=3 + schema.columns.len())
                .map(|i| format!("?{i}"))
                .collect::<Vec<_>>()
                .join(", ")
        );

        let schema_json = serde_json::to_string(schema)?;

        let tx = self.conn.transaction()?;
        tx.execute_batch(&create)?;
        tx.execute(
            "INSERT INTO flow_features_schema (id, version, fingerprint, schema_json)
             VALUES (1, ?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                version = excluded.version,
                fingerprint = excluded.fingerprint,
                schema_json = excluded.schema_json",
            params![schema.version, schema.fingerprint, schema_json],
        )?;
        {
            let mut stmt = tx.prepare(&insert)?;
            for row in rows {
                if row.values.len() != schema.columns.len() {
                    return Err(StoreError::RowWidthMismatch {
                        id: row.id,
                        found: row.values.len(),
                        expected: schema.columns.len(),
                    });
                }
                let mut values: Vec<Value> = Vec::with_capacity(3 + row.values.len());
                values.push(Value::Integer(row.id as i64));
                values.push(Value::Text(format_timestamp(row.timestamp)));
                values.push(Value::Text(row.level_status.as_str().to_string()));
                for (value, column) in row.values.iter().zip(&schema.columns) {
                    values.push(match column.dtype {
                        FeatureDType::F64 => optional_real(*value),
                        FeatureDType::I64 => optional_integer(*value),
                    });
                }
                stmt.execute(params_from_iter(values))?;
            }
        }
        tx.commit()?;

        info!(
            component = "store",
            event = "store.features.replaced",
            rows = rows.len(),
            columns = schema.columns.len(),
            fingerprint = %schema.fingerprint
        );
        Ok(())
    }

    pub fn load_feature_schema(&self) -> Result<Option<FeatureSchema>, StoreError> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT schema_json FROM flow_features_schema WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub fn load_features(&self) -> Result<Option<(FeatureSchema, Vec<FeatureRow>)>, StoreError> {
        let Some(schema) = self.load_feature_schema()? else {
            return Ok(None);
        };

        let mut stmt = self
            .conn
            .prepare(&format!("SELECT * FROM {FEATURES_TABLE} ORDER BY id ASC"))?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let id: i64 = row.get(0)?;
            let raw_ts: String = row.get(1)?;
            let status: String = row.get(2)?;
            let Some(level_status) = LevelStatus::parse(&status) else {
                return Err(StoreError::CorruptRow(format!("unknown level_status '{status}'")));
            };

            let mut values = Vec::with_capacity(schema.columns.len());
            for idx in 0..schema.columns.len() {
                let value: Option<f64> = match row.get_ref(3 + idx)? {
                    rusqlite::types::ValueRef::Null => None,
                    rusqlite::types::ValueRef::Integer(v) => Some(v as f64),
                    rusqlite::types::ValueRef::Real(v) => Some(v),
                    other => {
                        return Err(StoreError::CorruptRow(format!(
                            "column {} holds {:?}",
                            schema.columns[idx].name,
                            other.data_type()
                        )));
                    }
                };
                values.push(value);
            }

            out.push(FeatureRow {
                id: id as u64,
                timestamp: parse_timestamp(&raw_ts)?,
                level_status,
                values,
            });
        }

        Ok(Some((schema, out)))
    }

    pub fn count_features(&self) -> Result<u64, StoreError> {
        let exists: Option<String> = self
            .conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![FEATURES_TABLE],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Ok(0);
        }
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {FEATURES_TABLE}"),
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

/// Header is `id,timestamp,level_status,<schema columns>`; missing values
/// are written as empty cells.
pub fn write_features_csv_to<W: Write>(
    writer: W,
    schema: &FeatureSchema,
    rows: &[FeatureRow],
) -> Result<(), StoreError> {
    let mut csv_writer = csv::Writer::from_writer(writer);

    let mut header = vec!["id", "timestamp", "level_status"];
    header.extend(schema.columns.iter().map(|c| c.name.as_str()));
    csv_writer.write_record(&header)?;

    for row in rows {
        let mut record = Vec::with_capacity(3 + row.values.len());
        record.push(row.id.to_string());
        record.push(format_timestamp(row.timestamp));
        record.push(row.level_status.as_str().to_string());
        for (value, column) in row.values.iter().zip(&schema.columns) {
            record.push(match (value, column.dtype) {
                (None, _) => String::new(),
                (Some(v), FeatureDType::F64) => v.to_string(),
                (Some(v), FeatureDType::I64) => (*v as i64).to_string(),
            });
        }
        csv_writer.write_record(&record)?;
    }

    csv_writer.flush().map_err(|source| StoreError::Io {
        path: PathBuf::from("<writer>"),
        source,
    })?;
    Ok(())
}

pub fn write_features_csv(
    path: &Path,
    schema: &FeatureSchema,
    rows: &[FeatureRow],
) -> Result<(), StoreError> {
    let file = create_file(path)?;
    write_features_csv_to(file, schema, rows)?;
    info!(
        component = "store",
        event = "store.features.csv_written",
        path = %path.display(),
        rows = rows.len()
    );
    Ok(())
}

/// Sidecar read by the trainer before it accepts a feature table.
pub fn write_schema_json(path: &Path, schema: &FeatureSchema) -> Result<(), StoreError> {
    let file = create_file(path)?;
    serde_json::to_writer_pretty(file, schema)?;
    Ok(())
}

pub fn read_schema_json(path: &Path) -> Result<FeatureSchema, StoreError> {
    let bytes = fs::read(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn create_file(path: &Path) -> Result<fs::File, StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }
    fs::File::create(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn ensure_bronze_schema(conn: &Connection) -> Result<(), StoreError> {
    let weather_columns: Vec<String> = WEATHER_CHANNELS
        .iter()
        .map(|name| format!("{name} REAL"))
        .collect();
    conn.execute_batch(&format!(
        "
        CREATE TABLE IF NOT EXISTS elipse_bronze (
            timestamp TEXT PRIMARY KEY,
            flow_in_l_s REAL NOT NULL,
            reservoir_level_percentage REAL NOT NULL,
            pressure_mca REAL NOT NULL,
            gmb_1_is_on INTEGER NOT NULL,
            gmb_2_is_on INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS climate_bronze (
            source TEXT NOT NULL,
            year INTEGER NOT NULL,
            month INTEGER NOT NULL,
            day INTEGER NOT NULL,
            hour INTEGER NOT NULL,
            {},
            PRIMARY KEY (source, year, month, day, hour)
        );

        CREATE TABLE IF NOT EXISTS flow_features_schema (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL,
            fingerprint TEXT NOT NULL,
            schema_json TEXT NOT NULL
        );
        ",
        weather_columns.join(",\n            ")
    ))?;
    Ok(())
}

fn sql_type(dtype: FeatureDType) -> &'static str {
    match dtype {
        FeatureDType::F64 => "REAL",
        FeatureDType::I64 => "INTEGER",
    }
}

fn optional_real(value: Option<f64>) -> Value {
    value.map_or(Value::Null, Value::Real)
}

fn optional_integer(value: Option<f64>) -> Value {
    value.map_or(Value::Null, |v| Value::Integer(v as i64))
}

fn validate_identifier(name: &str) -> Result<(), StoreError> {
    let leads = name.starts_with(|c: char| c.is_ascii_lowercase() || c == '_');
    if leads && name.chars().all(is_identifier_char) {
        Ok(())
    } else {
        Err(StoreError::InvalidColumnName(name.to_string()))
    }
}

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'
}

fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

fn parse_timestamp(raw: &str) -> Result<NaiveDateTime, StoreError> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .map_err(|err| StoreError::CorruptRow(format!("timestamp '{raw}': {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureColumn;
    use chrono::{Duration, NaiveDate};

    fn ts(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 5, 1)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn raw(hour: u32, flow: f64) -> RawSample {
        raw_at(ts(hour), flow)
    }

    fn raw_at(timestamp: NaiveDateTime, flow: f64) -> RawSample {
        RawSample {
            timestamp,
            flow_in_rate: flow,
            reservoir_level_percentage: 60.0,
            pressure: 28.5,
            pump_1_on: flow > 0.0,
            pump_2_on: false,
            level_status: LevelStatus::Observed,
        }
    }

    fn tiny_schema() -> FeatureSchema {
        FeatureSchema {
            version: 1,
            fingerprint: "abc".to_string(),
            columns: vec![
                FeatureColumn {
                    name: "average_pressure_last_1_hour".to_string(),
                    dtype: FeatureDType::F64,
                },
                FeatureColumn {
                    name: "hour".to_string(),
                    dtype: FeatureDType::I64,
                },
            ],
        }
    }

    #[test]
    fn raw_samples_upsert_by_timestamp() {
        let mut store = FlowStore::open_in_memory().unwrap();
        store
            .upsert_raw_samples(&[raw(1, 2.0), raw(0, 1.0)])
            .unwrap();
        store.upsert_raw_samples(&[raw(1, 3.0)]).unwrap();

        let loaded = store.load_raw_samples().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].timestamp, ts(0));
        assert_eq!(loaded[1].flow_in_rate, 3.0);
        assert!(loaded[1].pump_1_on);
    }

    #[test]
    fn sub_second_samples_keep_their_own_rows() {
        let early = ts(0) + Duration::milliseconds(250);
        let late = ts(0) + Duration::milliseconds(750);
        let parsed = crate::normalize::parse_timestamp(0, "2023-05-01 00:00:00.250").unwrap();
        assert_eq!(parsed, early);

        let mut store = FlowStore::open_in_memory().unwrap();
        store
            .upsert_raw_samples(&[raw_at(late, 2.0), raw_at(parsed, 1.0), raw(0, 0.5)])
            .unwrap();

        let loaded = store.load_raw_samples().unwrap();
        let stamps: Vec<NaiveDateTime> = loaded.iter().map(|row| row.timestamp).collect();
        assert_eq!(stamps, vec![ts(0), early, late]);
        let flows: Vec<f64> = loaded.iter().map(|row| row.flow_in_rate).collect();
        assert_eq!(flows, vec![0.5, 1.0, 2.0]);

        assert_eq!(format_timestamp(early), "2023-05-01 00:00:00.250");
        assert_eq!(format_timestamp(ts(0)), "2023-05-01 00:00:00");
        assert_eq!(parse_timestamp("2023-05-01 00:00:00.250").unwrap(), early);
    }

    #[test]
    fn weather_keeps_first_row_per_hour_key() {
        let mut store = FlowStore::open_in_memory().unwrap();
        let key = HourKey {
            year: 2024,
            month: 3,
            day: 2,
            hour: 5,
        };
        let mut first = [None; WEATHER_CHANNEL_COUNT];
        first[0] = Some(1.5);
        let mut second = [None; WEATHER_CHANNEL_COUNT];
        second[0] = Some(9.0);

        let inserted = store
            .insert_weather(
                "primary",
                &[
                    WeatherSample {
                        key,
                        channels: first,
                    },
                    WeatherSample {
                        key,
                        channels: second,
                    },
                ],
            )
            .unwrap();
        assert_eq!(inserted, 1);

        let loaded = store.load_weather("primary").unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].channels[0], Some(1.5));
        assert_eq!(loaded[0].channels[1], None);
        assert!(store.load_weather("override").unwrap().is_empty());
    }

    #[test]
    fn features_table_is_replaced_wholesale() {
        let mut store = FlowStore::open_in_memory().unwrap();
        let schema = tiny_schema();
        let rows = vec![
            FeatureRow {
                id: 577,
                timestamp: ts(2),
                level_status: LevelStatus::Observed,
                values: vec![Some(30.25), Some(2.0)],
            },
            FeatureRow {
                id: 578,
                timestamp: ts(3),
                level_status: LevelStatus::Unrepaired,
                values: vec![None, Some(3.0)],
            },
        ];

        store.replace_features(&schema, &rows).unwrap();
        store.replace_features(&schema, &rows).unwrap();
        assert_eq!(store.count_features().unwrap(), 2);

        let (loaded_schema, loaded) = store.load_features().unwrap().unwrap();
        assert_eq!(loaded_schema, schema);
        assert_eq!(loaded, rows);
    }

    #[test]
    fn row_width_mismatch_rolls_back() {
        let mut store = FlowStore::open_in_memory().unwrap();
        let bad = vec![FeatureRow {
            id: 1,
            timestamp: ts(0),
            level_status: LevelStatus::Observed,
            values: vec![Some(1.0)],
        }];
        let err = store.replace_features(&tiny_schema(), &bad).unwrap_err();
        assert!(matches!(err, StoreError::RowWidthMismatch { .. }));
        assert_eq!(store.count_features().unwrap(), 0);
        assert!(store.load_feature_schema().unwrap().is_none());
    }

    #[test]
    fn csv_export_writes_empty_cells_for_missing_values() {
        let rows = vec![FeatureRow {
            id: 10,
            timestamp: ts(4),
            level_status: LevelStatus::Imputed,
            values: vec![None, Some(4.0)],
        }];
        let mut buf = Vec::new();
        write_features_csv_to(&mut buf, &tiny_schema(), &rows).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(
            text,
            "id,timestamp,level_status,average_pressure_last_1_hour,hour\n\
             10,2023-05-01 04:00:00,imputed,,4\n"
        );
    }

    #[test]
    fn rejects_unsafe_column_names() {
        let mut store = FlowStore::open_in_memory().unwrap();
        let mut schema = tiny_schema();
        schema.columns[0].name = "x; DROP TABLE elipse_bronze".to_string();
        assert!(matches!(
            store.replace_features(&schema, &[]),
            Err(StoreError::InvalidColumnName(_))
        ));
    }
}
