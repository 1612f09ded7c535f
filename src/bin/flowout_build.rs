use std::env;
use std::path::PathBuf;

use flowout::{
    average_output_flow_by_hour, format_hours_minutes, init_logging, log_app_start,
    log_input_loaded, log_output_written, logging_config_from_env, pipeline_config_from_env,
    pump_usage_peak_offpeak, read_inmet_weather_files, read_vendor_csv, run_pipeline,
    write_features_csv, write_schema_json, FlowStore,
};
use tracing::info;

const DEFAULT_OUTPUT_CSV: &str = "data/training/flow_features.csv";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    let cfg = pipeline_config_from_env();
    log_app_start(&logging_cfg, &cfg);

    let telemetry_path = env::var("FLOWOUT_TELEMETRY_CSV")
        .map(PathBuf::from)
        .map_err(|_| "FLOWOUT_TELEMETRY_CSV must point at the telemetry CSV export")?;
    let weather_paths = path_list("FLOWOUT_WEATHER_CSV");
    let override_paths = path_list("FLOWOUT_WEATHER_OVERRIDE_CSV");
    let output_csv = env::var("FLOWOUT_OUTPUT_CSV")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_OUTPUT_CSV));
    let output_sqlite = env::var("FLOWOUT_OUTPUT_SQLITE").ok().map(PathBuf::from);

    let telemetry = read_vendor_csv(&telemetry_path)?;
    log_input_loaded("telemetry", &telemetry_path, telemetry.len());
    let weather = read_inmet_weather_files(&weather_paths)?;
    let weather_override = read_inmet_weather_files(&override_paths)?;

    let output = run_pipeline(&telemetry, &weather, &weather_override, &cfg)?;

    write_features_csv(&output_csv, &output.schema, &output.rows)?;
    log_output_written("csv", &output_csv, output.rows.len());
    let schema_path = output_csv.with_extension("schema.json");
    write_schema_json(&schema_path, &output.schema)?;
    log_output_written("schema_json", &schema_path, output.schema.columns.len());

    if let Some(path) = output_sqlite {
        let mut store = FlowStore::open(&path)?;
        store.upsert_raw_samples(&output.normalized)?;
        store.insert_weather("primary", &weather)?;
        store.insert_weather("override", &weather_override)?;
        store.replace_features(&output.schema, &output.rows)?;
        log_output_written("sqlite", &path, output.rows.len());
    }

    let reconciled = || output.weathered.iter().map(|row| &row.reconciled);
    for hour in average_output_flow_by_hour(reconciled()) {
        info!(
            component = "flowout_build",
            event = "analytics.output_flow_by_hour",
            hour = hour.hour,
            avg_weekday_output_flow = ?hour.avg_weekday_output_flow,
            avg_weekend_output_flow = ?hour.avg_weekend_output_flow
        );
    }
    for usage in pump_usage_peak_offpeak(reconciled(), &cfg.peak_hours) {
        info!(
            component = "flowout_build",
            event = "analytics.pump_usage",
            pump = usage.pump,
            peak = %format_hours_minutes(usage.peak_minutes_per_day),
            offpeak = %format_hours_minutes(usage.offpeak_minutes_per_day)
        );
    }

    info!(
        component = "flowout_build",
        event = "app.finish",
        report = %serde_json::to_string(&output.report)?
    );
    Ok(())
}

fn path_list(var: &str) -> Vec<PathBuf> {
    env::var(var)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(PathBuf::from)
                .collect()
        })
        .unwrap_or_default()
}
