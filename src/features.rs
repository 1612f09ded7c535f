//! Windowed feature synthesis over the weathered series.
//!
//! Every output column is described by a [`ColumnSource`] in one ordered
//! plan. The schema is the plan's names and dtypes; the values are the plan
//! materialized column by column (in parallel) and then transposed into rows.

use chrono::{Datelike, NaiveDateTime, Timelike};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{ConfigError, PipelineConfig, PumpDurationBasis};
use crate::impute::trailing_mean;
use crate::sample::{LevelStatus, WeatheredSample, WEATHER_CHANNELS, WEATHER_CHANNEL_COUNT};

const BASE_CHANNELS: [&str; 7] = [
    "input_flow_rate",
    "reservoir_level_percentage",
    "total_liters_entered",
    "effective_liters_entered",
    "total_liters_out",
    "output_flow_rate",
    "pressure",
];
const INPUT_FLOW_RATE: usize = 0;
const RESERVOIR_LEVEL: usize = 1;
const TOTAL_LITERS_ENTERED: usize = 2;
const EFFECTIVE_LITERS_ENTERED: usize = 3;
const TOTAL_LITERS_OUT: usize = 4;
const OUTPUT_FLOW_RATE: usize = 5;
const PRESSURE: usize = 6;
const FIRST_WEATHER_CHANNEL: usize = BASE_CHANNELS.len();
const CHANNEL_COUNT: usize = BASE_CHANNELS.len() + WEATHER_CHANNEL_COUNT;

const ELAPSED_TOLERANCE_SECONDS: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureDType {
    F64,
    I64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureColumn {
    pub name: String,
    pub dtype: FeatureDType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub version: u32,
    pub fingerprint: String,
    pub columns: Vec<FeatureColumn>,
}

impl FeatureSchema {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub id: u64,
    pub timestamp: NaiveDateTime,
    pub level_status: LevelStatus,
    pub values: Vec<Option<f64>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureTransformReport {
    pub input_rows: u64,
    pub output_rows: u64,
    pub warmup_rows_dropped: u64,
    pub missing_values: u64,
}

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("input rows must be strictly increasing in time; row {index} at {timestamp} is not")]
    UnorderedInput {
        index: usize,
        timestamp: NaiveDateTime,
    },
    #[error("schema version mismatch: expected {expected}, got {actual}")]
    SchemaVersionMismatch { expected: u32, actual: u32 },
    #[error("schema fingerprint mismatch: expected {expected}, got {actual}")]
    SchemaFingerprintMismatch { expected: String, actual: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CalendarField {
    Second,
    Minute,
    Hour,
    Day,
    Weekday,
    WeekOfYear,
    Month,
    Year,
}

impl CalendarField {
    const ALL: [(CalendarField, &'static str); 8] = [
        (CalendarField::Second, "second"),
        (CalendarField::Minute, "minute"),
        (CalendarField::Hour, "hour"),
        (CalendarField::Day, "day"),
        (CalendarField::Weekday, "weekday"),
        (CalendarField::WeekOfYear, "week_of_year"),
        (CalendarField::Month, "month"),
        (CalendarField::Year, "year"),
    ];

    fn of(self, ts: NaiveDateTime) -> f64 {
        match self {
            Self::Second => ts.second() as f64,
            Self::Minute => ts.minute() as f64,
            Self::Hour => ts.hour() as f64,
            Self::Day => ts.day() as f64,
            Self::Weekday => ts.weekday().num_days_from_monday() as f64,
            Self::WeekOfYear => ts.iso_week().week() as f64,
            Self::Month => ts.month() as f64,
            Self::Year => ts.year() as f64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnSource {
    Mean { channel: usize, window: usize },
    Sum { channel: usize, window: usize },
    Last { channel: usize },
    PumpOnSeconds { pump: usize, window: usize },
    PumpStatus { pump: usize },
    Calendar(CalendarField),
    Target,
}

#[derive(Debug, Clone)]
struct PlannedColumn {
    column: FeatureColumn,
    source: ColumnSource,
}

/// Column-major view of the weathered series.
struct SeriesColumns {
    channels: Vec<Vec<Option<f64>>>,
    pumps: [Vec<Option<f64>>; 2],
    elapsed_seconds: Vec<f64>,
    timestamps: Vec<NaiveDateTime>,
}

impl SeriesColumns {
    fn from_rows(rows: &[WeatheredSample]) -> Self {
        let mut channels: Vec<Vec<Option<f64>>> = (0..CHANNEL_COUNT)
            .map(|_| Vec::with_capacity(rows.len()))
            .collect();
        let mut pumps = [
            Vec::with_capacity(rows.len()),
            Vec::with_capacity(rows.len()),
        ];
        let mut elapsed_seconds = Vec::with_capacity(rows.len());
        let mut timestamps = Vec::with_capacity(rows.len());

        for row in rows {
            let r = &row.reconciled;
            channels[INPUT_FLOW_RATE].push(Some(r.sample.flow_in_rate));
            channels[RESERVOIR_LEVEL].push(Some(r.sample.reservoir_level_percentage));
            channels[TOTAL_LITERS_ENTERED].push(Some(r.inflow_liters));
            channels[EFFECTIVE_LITERS_ENTERED].push(Some(r.level_delta_liters));
            channels[TOTAL_LITERS_OUT].push(Some(r.outflow_liters));
            channels[OUTPUT_FLOW_RATE].push(Some(r.output_flow_rate));
            channels[PRESSURE].push(Some(r.sample.pressure));
            for (k, value) in row.weather.iter().enumerate() {
                channels[FIRST_WEATHER_CHANNEL + k].push(*value);
            }
            pumps[0].push(Some(pump_value(r.sample.pump_1_on)));
            pumps[1].push(Some(pump_value(r.sample.pump_2_on)));
            elapsed_seconds.push(r.elapsed_seconds);
            timestamps.push(r.timestamp());
        }

        Self {
            channels,
            pumps,
            elapsed_seconds,
            timestamps,
        }
    }
}

fn pump_value(on: bool) -> f64 {
    if on {
        1.0
    } else {
        0.0
    }
}

fn channel_name(channel: usize) -> &'static str {
    if channel < FIRST_WEATHER_CHANNEL {
        BASE_CHANNELS[channel]
    } else {
        WEATHER_CHANNELS[channel - FIRST_WEATHER_CHANNEL]
    }
}

fn column_plan(cfg: &PipelineConfig) -> Vec<PlannedColumn> {
    let mut plan = Vec::new();
    let mut push = |name: String, dtype: FeatureDType, source: ColumnSource| {
        plan.push(PlannedColumn {
            column: FeatureColumn { name, dtype },
            source,
        });
    };

    for window in &cfg.windows {
        let w = &window.name;
        let samples = window.samples(cfg.nominal_interval_seconds);
        let mean = |channel| ColumnSource::Mean {
            channel,
            window: samples,
        };
        let sum = |channel| ColumnSource::Sum {
            channel,
            window: samples,
        };

        push(
            format!("average_input_flow_rate_{w}"),
            FeatureDType::F64,
            mean(INPUT_FLOW_RATE),
        );
        push(
            format!("average_change_reservoir_level_percentage_{w}"),
            FeatureDType::F64,
            mean(RESERVOIR_LEVEL),
        );
        push(
            format!("average_total_liters_entered_{w}"),
            FeatureDType::F64,
            mean(TOTAL_LITERS_ENTERED),
        );
        push(
            format!("sum_total_liters_entered_last_{w}"),
            FeatureDType::F64,
            sum(TOTAL_LITERS_ENTERED),
        );
        push(
            format!("average_effective_liters_entered_{w}"),
            FeatureDType::F64,
            mean(EFFECTIVE_LITERS_ENTERED),
        );
        push(
            format!("sum_effective_liters_entered_last_{w}"),
            FeatureDType::F64,
            sum(EFFECTIVE_LITERS_ENTERED),
        );
        push(
            format!("average_total_liters_out_last_{w}"),
            FeatureDType::F64,
            mean(TOTAL_LITERS_OUT),
        );
        push(
            format!("sum_total_liters_out_last_{w}"),
            FeatureDType::F64,
            sum(TOTAL_LITERS_OUT),
        );
        push(
            format!("average_output_flow_rate_last_{w}"),
            FeatureDType::F64,
            mean(OUTPUT_FLOW_RATE),
        );
        push(
            format!("average_pressure_last_{w}"),
            FeatureDType::F64,
            mean(PRESSURE),
        );
        for k in 0..WEATHER_CHANNEL_COUNT {
            let channel = FIRST_WEATHER_CHANNEL + k;
            push(
                format!("average_{}_last_{w}", channel_name(channel)),
                FeatureDType::F64,
                mean(channel),
            );
        }
    }

    for channel in 0..CHANNEL_COUNT {
        push(
            format!("last_{}", channel_name(channel)),
            FeatureDType::F64,
            ColumnSource::Last { channel },
        );
    }

    if let Some(largest) = cfg
        .windows
        .iter()
        .max_by_key(|w| w.samples(cfg.nominal_interval_seconds))
    {
        let samples = largest.samples(cfg.nominal_interval_seconds);
        for pump in 0..2 {
            push(
                format!("total_time_pump_{}_was_on_last_{}", pump + 1, largest.name),
                FeatureDType::F64,
                ColumnSource::PumpOnSeconds {
                    pump,
                    window: samples,
                },
            );
        }
    }
    for pump in 0..2 {
        push(
            format!("last_pump_{}_status", pump + 1),
            FeatureDType::I64,
            ColumnSource::PumpStatus { pump },
        );
    }

    for (field, name) in CalendarField::ALL {
        push(
            name.to_string(),
            FeatureDType::I64,
            ColumnSource::Calendar(field),
        );
    }

    push(
        "output_flow_rate".to_string(),
        FeatureDType::F64,
        ColumnSource::Target,
    );

    plan
}

pub fn build_feature_schema(cfg: &PipelineConfig) -> FeatureSchema {
    let columns: Vec<FeatureColumn> = column_plan(cfg).into_iter().map(|p| p.column).collect();
    let fingerprint = schema_fingerprint(cfg, &columns);

    info!(
        component = "features",
        event = "features.schema.built",
        version = cfg.schema_version,
        windows = ?cfg.window_samples(),
        column_count = columns.len(),
        fingerprint = fingerprint
    );

    FeatureSchema {
        version: cfg.schema_version,
        fingerprint,
        columns,
    }
}

/// Turn the weathered series into the training table. Rows inside the
/// warm-up prefix feed the rolling windows but are not emitted.
pub fn synthesize_features(
    rows: &[WeatheredSample],
    cfg: &PipelineConfig,
) -> Result<(FeatureSchema, Vec<FeatureRow>, FeatureTransformReport), FeatureError> {
    cfg.validate()?;
    validate_order(rows)?;

    let warmup = cfg.effective_warmup_rows();
    info!(
        component = "features",
        event = "features.transform.start",
        input_rows = rows.len(),
        warmup_rows = warmup,
        pump_duration_basis = ?cfg.pump_duration_basis
    );

    let schema = build_feature_schema(cfg);
    let mut report = FeatureTransformReport {
        input_rows: rows.len() as u64,
        warmup_rows_dropped: warmup.min(rows.len()) as u64,
        ..FeatureTransformReport::default()
    };

    if rows.len() <= warmup {
        warn!(
            component = "features",
            event = "features.warmup.insufficient_rows",
            input_rows = rows.len(),
            warmup_rows = warmup
        );
        return Ok((schema, Vec::new(), report));
    }

    let series = SeriesColumns::from_rows(rows);
    if cfg.pump_duration_basis == PumpDurationBasis::NominalInterval {
        warn_on_basis_discrepancy(&series, cfg.nominal_interval_seconds);
    }

    let plan = column_plan(cfg);
    let columns: Vec<Vec<Option<f64>>> = plan
        .par_iter()
        .map(|planned| {
            let mut full = materialize(planned.source, &series, cfg);
            full.split_off(warmup)
        })
        .collect();

    let mut iters: Vec<std::vec::IntoIter<Option<f64>>> =
        columns.into_iter().map(Vec::into_iter).collect();
    let mut out = Vec::with_capacity(rows.len() - warmup);
    for row in &rows[warmup..] {
        let values: Vec<Option<f64>> = iters
            .iter_mut()
            .map(|column| column.next().flatten())
            .collect();
        report.missing_values += values.iter().filter(|v| v.is_none()).count() as u64;
        out.push(FeatureRow {
            id: row.reconciled.id,
            timestamp: row.reconciled.timestamp(),
            level_status: row.reconciled.sample.level_status,
            values,
        });
    }

    report.output_rows = out.len() as u64;
    if report.missing_values > 0 {
        warn!(
            component = "features",
            event = "features.transform.missing_values",
            missing_values = report.missing_values
        );
    }
    info!(
        component = "features",
        event = "features.transform.finish",
        input_rows = report.input_rows,
        output_rows = report.output_rows,
        warmup_rows_dropped = report.warmup_rows_dropped,
        missing_values = report.missing_values
    );

    Ok((schema, out, report))
}

pub fn assert_schema_compatible(
    expected_version: u32,
    expected_fingerprint: &str,
    actual: &FeatureSchema,
) -> Result<(), FeatureError> {
    if expected_version != actual.version {
        return Err(FeatureError::SchemaVersionMismatch {
            expected: expected_version,
            actual: actual.version,
        });
    }

    if expected_fingerprint != actual.fingerprint {
        return Err(FeatureError::SchemaFingerprintMismatch {
            expected: expected_fingerprint.to_string(),
            actual: actual.fingerprint.clone(),
        });
    }

    Ok(())
}

fn validate_order(rows: &[WeatheredSample]) -> Result<(), FeatureError> {
    for (idx, pair) in rows.windows(2).enumerate() {
        if pair[1].reconciled.timestamp() <= pair[0].reconciled.timestamp() {
            return Err(FeatureError::UnorderedInput {
                index: idx + 1,
                timestamp: pair[1].reconciled.timestamp(),
            });
        }
    }
    Ok(())
}

fn warn_on_basis_discrepancy(series: &SeriesColumns, nominal_interval_seconds: u32) {
    let nominal = nominal_interval_seconds as f64;
    let deviating = series
        .elapsed_seconds
        .iter()
        .filter(|elapsed| (**elapsed - nominal).abs() > ELAPSED_TOLERANCE_SECONDS)
        .count();
    if deviating > 0 {
        warn!(
            component = "features",
            event = "features.pump_duration.basis_discrepancy",
            nominal_interval_seconds,
            deviating_rows = deviating,
            total_rows = series.elapsed_seconds.len()
        );
    }
}

fn materialize(
    source: ColumnSource,
    series: &SeriesColumns,
    cfg: &PipelineConfig,
) -> Vec<Option<f64>> {
    match source {
        ColumnSource::Mean { channel, window } => trailing_mean(&series.channels[channel], window),
        ColumnSource::Sum { channel, window } => trailing_sum(&series.channels[channel], window),
        ColumnSource::Last { channel } => series.channels[channel].clone(),
        ColumnSource::PumpOnSeconds { pump, window } => match cfg.pump_duration_basis {
            PumpDurationBasis::NominalInterval => {
                let nominal = cfg.nominal_interval_seconds as f64;
                trailing_sum(&series.pumps[pump], window)
                    .into_iter()
                    .map(|count| count.map(|c| c * nominal))
                    .collect()
            }
            PumpDurationBasis::ElapsedSeconds => {
                let on_seconds: Vec<Option<f64>> = series.pumps[pump]
                    .iter()
                    .zip(&series.elapsed_seconds)
                    .map(|(state, elapsed)| state.map(|s| s * elapsed))
                    .collect();
                trailing_sum(&on_seconds, window)
            }
        },
        ColumnSource::PumpStatus { pump } => series.pumps[pump].clone(),
        ColumnSource::Calendar(field) => series
            .timestamps
            .iter()
            .map(|ts| Some(field.of(*ts)))
            .collect(),
        ColumnSource::Target => series.channels[OUTPUT_FLOW_RATE].clone(),
    }
}

/// Trailing sum over the last `window` entries, skipping `None`; `None` when
/// the window holds no value at all.
fn trailing_sum(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    let window = window.max(1);
    let mut out = Vec::with_capacity(values.len());
    let mut sum = 0.0;
    let mut count = 0usize;
    for (idx, value) in values.iter().enumerate() {
        if let Some(v) = value {
            sum += v;
            count += 1;
        }
        if idx >= window {
            if let Some(old) = values[idx - window] {
                sum -= old;
                count -= 1;
            }
        }
        out.push((count > 0).then_some(sum));
    }
    out
}

fn schema_fingerprint(cfg: &PipelineConfig, columns: &[FeatureColumn]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("version:{};", cfg.schema_version));
    hasher.update(format!("nominal_interval_seconds:{};", cfg.nominal_interval_seconds));
    hasher.update(format!("pump_duration_basis:{:?};", cfg.pump_duration_basis));
    hasher.update("windows:");
    for window in &cfg.windows {
        hasher.update(format!("{}={},", window.name, window.duration_seconds));
    }
    hasher.update(";columns:");
    for column in columns {
        hasher.update(column.name.as_bytes());
        match column.dtype {
            FeatureDType::F64 => hasher.update(":f64;"),
            FeatureDType::I64 => hasher.update(":i64;"),
        }
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeatureWindow;
    use crate::sample::{RawSample, ReconciledSample};
    use chrono::{Duration, NaiveDate};

    fn t0() -> NaiveDateTime {
        // A Monday.
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn small_cfg() -> PipelineConfig {
        PipelineConfig {
            windows: vec![
                FeatureWindow::new("1_hour", 3_600),
                FeatureWindow::new("10_minutes", 600),
            ],
            ..PipelineConfig::default()
        }
    }

    fn row(i: u64, offset_s: i64, output_flow_rate: f64, pump_1_on: bool) -> WeatheredSample {
        WeatheredSample {
            reconciled: ReconciledSample {
                id: i,
                sample: RawSample {
                    timestamp: t0() + Duration::seconds(offset_s),
                    flow_in_rate: 10.0,
                    reservoir_level_percentage: 50.0,
                    pressure: 30.0,
                    pump_1_on,
                    pump_2_on: false,
                    level_status: LevelStatus::Observed,
                },
                reservoir_level_liters: 500_000.0,
                elapsed_seconds: 150.0,
                inflow_liters: 1_500.0,
                level_delta_liters: 0.0,
                outflow_liters: output_flow_rate * 150.0,
                output_flow_rate,
                flow_rate_adjusted: false,
            },
            weather: [Some(1.0); WEATHER_CHANNEL_COUNT],
        }
    }

    fn series(n: u64) -> Vec<WeatheredSample> {
        (1..=n)
            .map(|i| row(i, 150 * i as i64, i as f64, i % 2 == 0))
            .collect()
    }

    fn value(schema: &FeatureSchema, row: &FeatureRow, name: &str) -> Option<f64> {
        let idx = schema
            .column_index(name)
            .unwrap_or_else(|| panic!("missing column {name}"));
        row.values[idx]
    }

    #[test]
    fn default_schema_has_full_column_layout() {
        let schema = build_feature_schema(&PipelineConfig::default());
        // 4 windows x (10 + 17), 24 last values, 4 pump, 8 calendar, 1 target.
        assert_eq!(schema.columns.len(), 4 * 27 + 24 + 4 + 8 + 1);
        assert_eq!(schema.columns[0].name, "average_input_flow_rate_24_hours");
        assert_eq!(
            schema.columns[26].name,
            "average_wind_speed_m_s_last_24_hours"
        );
        assert_eq!(schema.columns[27].name, "average_input_flow_rate_10_hours");
        assert!(schema
            .column_index("total_time_pump_1_was_on_last_24_hours")
            .is_some());
        assert!(schema
            .column_index("last_relative_humidity_percentage")
            .is_some());
        assert_eq!(
            schema.columns.last().map(|c| c.name.as_str()),
            Some("output_flow_rate")
        );
        let week = schema.column_index("week_of_year").unwrap();
        assert_eq!(schema.columns[week].dtype, FeatureDType::I64);
    }

    #[test]
    fn fingerprint_tracks_layout_and_compatibility_check() {
        let cfg = PipelineConfig::default();
        let a = build_feature_schema(&cfg);
        let b = build_feature_schema(&cfg);
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_eq!(a.fingerprint.len(), 64);
        assert_schema_compatible(a.version, &a.fingerprint, &b)
            .expect("identical layouts are compatible");

        let other = build_feature_schema(&small_cfg());
        assert_ne!(a.fingerprint, other.fingerprint);
        assert!(matches!(
            assert_schema_compatible(a.version, &a.fingerprint, &other),
            Err(FeatureError::SchemaFingerprintMismatch { .. })
        ));
        assert!(matches!(
            assert_schema_compatible(a.version + 1, &a.fingerprint, &a),
            Err(FeatureError::SchemaVersionMismatch { .. })
        ));
    }

    #[test]
    fn warmup_prefix_is_dropped() {
        let rows = series(30);
        let (schema, out, report) = synthesize_features(&rows, &small_cfg()).unwrap();

        assert_eq!(out.len(), 6);
        assert_eq!(out[0].id, 25);
        assert_eq!(out[0].timestamp, rows[24].reconciled.timestamp());
        assert_eq!(report.warmup_rows_dropped, 24);
        assert_eq!(report.output_rows, 6);
        assert_eq!(report.missing_values, 0);
        assert!(out.iter().all(|r| r.values.len() == schema.columns.len()));
    }

    #[test]
    fn rolling_means_and_sums_cover_the_trailing_window() {
        let rows = series(30);
        let (schema, out, _) = synthesize_features(&rows, &small_cfg()).unwrap();
        let first = &out[0];

        // Row id 25: output flow ids 22..=25 in the 4-sample window.
        assert_eq!(
            value(&schema, first, "average_output_flow_rate_last_10_minutes"),
            Some(23.5)
        );
        // Ids 2..=25 in the 24-sample window.
        assert_eq!(
            value(&schema, first, "average_output_flow_rate_last_1_hour"),
            Some(13.5)
        );
        assert_eq!(
            value(&schema, first, "sum_total_liters_entered_last_1_hour"),
            Some(24.0 * 1_500.0)
        );
        assert_eq!(
            value(&schema, first, "sum_total_liters_out_last_10_minutes"),
            Some((22.0 + 23.0 + 24.0 + 25.0) * 150.0)
        );
        assert_eq!(value(&schema, first, "last_output_flow_rate"), Some(25.0));
        assert_eq!(value(&schema, first, "output_flow_rate"), Some(25.0));
        assert_eq!(value(&schema, first, "last_air_temp_c"), Some(1.0));
    }

    #[test]
    fn pump_on_seconds_use_largest_window() {
        let rows = series(30);
        let (schema, out, _) = synthesize_features(&rows, &small_cfg()).unwrap();
        // Ids 2..=25: the twelve even ids have pump 1 on.
        assert_eq!(
            value(&schema, &out[0], "total_time_pump_1_was_on_last_1_hour"),
            Some(12.0 * 150.0)
        );
        assert_eq!(
            value(&schema, &out[0], "total_time_pump_2_was_on_last_1_hour"),
            Some(0.0)
        );
        assert_eq!(value(&schema, &out[0], "last_pump_1_status"), Some(0.0));
        assert_eq!(value(&schema, &out[1], "last_pump_1_status"), Some(1.0));
    }

    #[test]
    fn elapsed_basis_counts_true_seconds() {
        let mut rows = series(30);
        for r in rows.iter_mut() {
            r.reconciled.elapsed_seconds = 100.0;
        }
        let cfg = PipelineConfig {
            pump_duration_basis: PumpDurationBasis::ElapsedSeconds,
            ..small_cfg()
        };
        let (schema, out, _) = synthesize_features(&rows, &cfg).unwrap();
        assert_eq!(
            value(&schema, &out[0], "total_time_pump_1_was_on_last_1_hour"),
            Some(12.0 * 100.0)
        );
    }

    #[test]
    fn calendar_fields_follow_timestamp() {
        let rows = series(30);
        let (schema, out, _) = synthesize_features(&rows, &small_cfg()).unwrap();
        // Id 25 sits at 2024-01-01 01:02:30, a Monday in ISO week 1.
        let first = &out[0];
        assert_eq!(value(&schema, first, "hour"), Some(1.0));
        assert_eq!(value(&schema, first, "minute"), Some(2.0));
        assert_eq!(value(&schema, first, "second"), Some(30.0));
        assert_eq!(value(&schema, first, "weekday"), Some(0.0));
        assert_eq!(value(&schema, first, "week_of_year"), Some(1.0));
        assert_eq!(value(&schema, first, "year"), Some(2024.0));
    }

    #[test]
    fn short_series_yields_empty_table() {
        let rows = series(24);
        let (schema, out, report) = synthesize_features(&rows, &small_cfg()).unwrap();
        assert!(out.is_empty());
        assert!(!schema.columns.is_empty());
        assert_eq!(report.input_rows, 24);
        assert_eq!(report.warmup_rows_dropped, 24);
        assert_eq!(report.output_rows, 0);
    }

    #[test]
    fn missing_weather_is_counted_not_invented() {
        let mut rows = series(30);
        for r in rows.iter_mut() {
            r.weather[0] = None;
        }
        let (schema, out, report) = synthesize_features(&rows, &small_cfg()).unwrap();
        assert_eq!(
            value(&schema, &out[0], "average_total_precip_mm_last_1_hour"),
            None
        );
        assert_eq!(value(&schema, &out[0], "last_total_precip_mm"), None);
        // Two window averages and one last value per output row.
        assert_eq!(report.missing_values, 3 * 6);
    }

    #[test]
    fn unordered_input_is_rejected() {
        let mut rows = series(5);
        rows.swap(1, 2);
        assert!(matches!(
            synthesize_features(&rows, &small_cfg()),
            Err(FeatureError::UnorderedInput { index: 2, .. })
        ));
    }

    #[test]
    fn trailing_sum_skips_missing_values() {
        let values = vec![Some(1.0), None, Some(3.0), None, None];
        assert_eq!(
            trailing_sum(&values, 2),
            vec![Some(1.0), Some(1.0), Some(3.0), Some(3.0), None]
        );
    }
}
