//! Batch orchestration: normalize, impute, reconcile, align weather, synthesize.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::config::{ConfigError, PipelineConfig};
use crate::features::{
    synthesize_features, FeatureError, FeatureRow, FeatureSchema, FeatureTransformReport,
};
use crate::impute::{impute_all, ImputeReport};
use crate::normalize::{normalize_rows, NormalizeError, NormalizeReport, VendorRow};
use crate::reconcile::{reconcile, ReconcileError, ReconcileReport};
use crate::sample::{RawSample, WeatherSample, WeatheredSample};
use crate::weather::{align_weather, WeatherReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub normalize: NormalizeReport,
    pub impute: ImputeReport,
    pub reconcile: ReconcileReport,
    pub weather: WeatherReport,
    pub features: FeatureTransformReport,
}

#[derive(Debug)]
pub struct PipelineOutput {
    pub schema: FeatureSchema,
    pub rows: Vec<FeatureRow>,
    /// Deduplicated, sorted telemetry before any repair.
    pub normalized: Vec<RawSample>,
    /// Full reconciled series with weather, warm-up prefix included.
    pub weathered: Vec<WeatheredSample>,
    pub report: PipelineReport,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("normalize: {0}")]
    Normalize(#[from] NormalizeError),
    #[error("reconcile: {0}")]
    Reconcile(#[from] ReconcileError),
    #[error("features: {0}")]
    Feature(#[from] FeatureError),
}

pub fn run_pipeline(
    telemetry: &[VendorRow],
    weather: &[WeatherSample],
    weather_override: &[WeatherSample],
    cfg: &PipelineConfig,
) -> Result<PipelineOutput, PipelineError> {
    cfg.validate()?;
    info!(
        component = "pipeline",
        event = "pipeline.run.start",
        telemetry_rows = telemetry.len(),
        weather_rows = weather.len(),
        override_rows = weather_override.len()
    );

    let (normalized, normalize_report) = normalize_rows(telemetry)?;
    let (imputed, impute_report) = impute_all(&normalized, cfg);
    let (reconciled, reconcile_report) = reconcile(&imputed, cfg)?;
    drop(imputed);
    let (weathered, weather_report) = align_weather(reconciled, weather, weather_override, cfg);
    let (schema, rows, feature_report) = synthesize_features(&weathered, cfg)?;

    let report = PipelineReport {
        normalize: normalize_report,
        impute: impute_report,
        reconcile: reconcile_report,
        weather: weather_report,
        features: feature_report,
    };

    info!(
        component = "pipeline",
        event = "pipeline.run.finish",
        input_rows = report.normalize.input_rows,
        reconciled_rows = report.reconcile.output_rows,
        feature_rows = report.features.output_rows,
        levels_unrepaired = report.impute.levels_unrepaired,
        rows_adjusted = report.reconcile.rows_adjusted,
        weather_unmatched = report.weather.unmatched_rows,
        missing_values = report.features.missing_values,
        fingerprint = %schema.fingerprint
    );

    Ok(PipelineOutput {
        schema,
        rows,
        normalized,
        weathered,
        report,
    })
}
