//! Reservoir outflow feature pipeline.
//!
//! Batch stages, leaf first:
//! - `normalize`: vendor telemetry fields to typed samples
//! - `impute`: zero-level, zero-pressure and pump-state repair
//! - `reconcile`: volume and flow quantities under mass balance
//! - `weather`: hourly weather join and gap filling
//! - `features`: trailing-window feature table with a fingerprinted schema
//!
//! `ingest` and `store` read the raw CSV exports and persist bronze and
//! feature tables; `analytics` answers the two descriptive questions asked
//! of the reconciled series.

mod analytics;
mod config;
mod features;
mod impute;
mod ingest;
mod normalize;
mod observability;
mod pipeline;
mod reconcile;
mod sample;
mod store;
#[cfg(test)]
mod test_support;
mod weather;

pub use analytics::{
    average_output_flow_by_hour, format_hours_minutes, pump_usage_peak_offpeak, HourlyOutputFlow,
    PumpUsage,
};
pub use config::{
    pipeline_config_from_env, ConfigError, FeatureWindow, PeakHours, PipelineConfig,
    PumpDurationBasis, WeatherOverrideWindow, DEFAULT_RESERVOIR_CAPACITY_LITERS,
    DEFAULT_SAMPLE_INTERVAL_SECONDS, FEATURE_SCHEMA_VERSION,
};
pub use features::{
    assert_schema_compatible, build_feature_schema, synthesize_features, FeatureColumn,
    FeatureDType, FeatureError, FeatureRow, FeatureSchema, FeatureTransformReport,
};
pub use impute::{
    fill_missing_pressure, fix_pump_on_without_pumps, fix_pumps_on_without_flow, impute_all,
    impute_reservoir_levels, ImputeReport,
};
pub use ingest::{
    parse_inmet_weather, parse_vendor_csv, read_inmet_weather, read_inmet_weather_files,
    read_vendor_csv, IngestError, INMET_PREAMBLE_LINES,
};
pub use normalize::{
    normalize_row, normalize_rows, parse_decimal, parse_timestamp, NormalizeError, NormalizeReport,
    VendorRow,
};
pub use observability::{
    init_logging, log_app_start, log_input_loaded, log_output_written, logging_config_from_env,
    LogFormat, LoggingConfig, LoggingInitError,
};
pub use pipeline::{run_pipeline, PipelineError, PipelineOutput, PipelineReport};
pub use reconcile::{reconcile, ReconcileError, ReconcileReport};
pub use sample::{
    round_to, HourKey, LevelStatus, RawSample, ReconciledSample, WeatherChannels, WeatherSample,
    WeatheredSample, WEATHER_CHANNELS, WEATHER_CHANNEL_COUNT,
};
pub use store::{
    read_schema_json, write_features_csv, write_features_csv_to, write_schema_json, FlowStore,
    StoreError,
};
pub use weather::{align_weather, WeatherReport};
