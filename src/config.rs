//! Pipeline constants hoisted into one configuration value.

use std::collections::HashSet;
use std::env;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const FEATURE_SCHEMA_VERSION: u32 = 1;

pub const DEFAULT_RESERVOIR_CAPACITY_LITERS: f64 = 1_000_000.0;
pub const DEFAULT_SAMPLE_INTERVAL_SECONDS: u32 = 150;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PumpDurationBasis {
    /// Every "on" sample counts as one nominal interval.
    NominalInterval,
    /// Every "on" sample counts as its own elapsed seconds.
    ElapsedSeconds,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureWindow {
    pub name: String,
    pub duration_seconds: u32,
}

impl FeatureWindow {
    pub fn new(name: impl Into<String>, duration_seconds: u32) -> Self {
        Self {
            name: name.into(),
            duration_seconds,
        }
    }

    /// Trailing sample count, truncated. Assumes near-uniform cadence.
    pub fn samples(&self, nominal_interval_seconds: u32) -> usize {
        if nominal_interval_seconds == 0 {
            return 0;
        }
        (self.duration_seconds / nominal_interval_seconds) as usize
    }
}

/// Date range whose rows in the secondary weather source take priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeatherOverrideWindow {
    pub month: u32,
    pub first_day: u32,
    pub last_day: u32,
}

impl WeatherOverrideWindow {
    pub fn contains(&self, day: u32, month: u32) -> bool {
        month == self.month && day >= self.first_day && day <= self.last_day
    }
}

impl Default for WeatherOverrideWindow {
    fn default() -> Self {
        Self {
            month: 3,
            first_day: 1,
            last_day: 11,
        }
    }
}

/// Inclusive hour range treated as peak demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeakHours {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl PeakHours {
    pub fn contains(&self, hour: u32) -> bool {
        hour >= self.start_hour && hour <= self.end_hour
    }
}

impl Default for PeakHours {
    fn default() -> Self {
        Self {
            start_hour: 18,
            end_hour: 21,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub reservoir_capacity_liters: f64,
    pub nominal_interval_seconds: u32,
    pub windows: Vec<FeatureWindow>,
    pub imputation_window: usize,
    pub weather_fill_window: usize,
    /// `None` drops one full largest window.
    pub warmup_rows: Option<usize>,
    pub pump_duration_basis: PumpDurationBasis,
    pub weather_override: WeatherOverrideWindow,
    pub peak_hours: PeakHours,
    pub rounding_decimals: u32,
    pub schema_version: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            reservoir_capacity_liters: DEFAULT_RESERVOIR_CAPACITY_LITERS,
            nominal_interval_seconds: DEFAULT_SAMPLE_INTERVAL_SECONDS,
            windows: vec![
                FeatureWindow::new("24_hours", 86_400),
                FeatureWindow::new("10_hours", 36_000),
                FeatureWindow::new("1_hour", 3_600),
                FeatureWindow::new("10_minutes", 600),
            ],
            imputation_window: 10,
            weather_fill_window: 10,
            warmup_rows: None,
            pump_duration_basis: PumpDurationBasis::NominalInterval,
            weather_override: WeatherOverrideWindow::default(),
            peak_hours: PeakHours::default(),
            rounding_decimals: 2,
            schema_version: FEATURE_SCHEMA_VERSION,
        }
    }
}

impl PipelineConfig {
    pub fn window_samples(&self) -> Vec<usize> {
        self.windows
            .iter()
            .map(|w| w.samples(self.nominal_interval_seconds))
            .collect()
    }

    pub fn largest_window_samples(&self) -> usize {
        self.window_samples().into_iter().max().unwrap_or(0)
    }

    pub fn effective_warmup_rows(&self) -> usize {
        self.warmup_rows
            .unwrap_or_else(|| self.largest_window_samples())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.reservoir_capacity_liters.is_finite() || self.reservoir_capacity_liters <= 0.0 {
            return Err(ConfigError::Invalid(
                "reservoir_capacity_liters must be a positive number".to_string(),
            ));
        }
        if self.nominal_interval_seconds == 0 {
            return Err(ConfigError::Invalid("nominal_interval_seconds must be > 0".to_string()));
        }
        if self.windows.is_empty() {
            return Err(ConfigError::Invalid("at least one feature window is required".to_string()));
        }

        let mut seen = HashSet::new();
        for window in &self.windows {
            if window.name.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "feature window names must not be empty".to_string(),
                ));
            }
            if !seen.insert(window.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate feature window name '{}'",
                    window.name
                )));
            }
            if window.samples(self.nominal_interval_seconds) == 0 {
                return Err(ConfigError::Invalid(format!(
                    "feature window '{}' ({}s) is shorter than one {}s sample",
                    window.name, window.duration_seconds, self.nominal_interval_seconds
                )));
            }
        }

        if self.imputation_window == 0 || self.weather_fill_window == 0 {
            return Err(ConfigError::Invalid("moving-average windows must be > 0".to_string()));
        }
        if self.weather_override.first_day > self.weather_override.last_day
            || !(1..=12).contains(&self.weather_override.month)
        {
            return Err(ConfigError::Invalid(
                "weather override window is empty or has an invalid month".to_string(),
            ));
        }
        if self.peak_hours.start_hour > self.peak_hours.end_hour || self.peak_hours.end_hour > 23 {
            return Err(ConfigError::Invalid(
                "peak hours must satisfy start <= end <= 23".to_string(),
            ));
        }
        if self.schema_version != FEATURE_SCHEMA_VERSION {
            return Err(ConfigError::Invalid(format!(
                "schema_version must equal FEATURE_SCHEMA_VERSION ({FEATURE_SCHEMA_VERSION})"
            )));
        }

        Ok(())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid pipeline config: {0}")]
    Invalid(String),
}

pub fn pipeline_config_from_env() -> PipelineConfig {
    let mut config = PipelineConfig::default();

    if let Ok(raw) = env::var("FLOWOUT_RESERVOIR_CAPACITY_LITERS") {
        if let Ok(parsed) = raw.trim().parse::<f64>() {
            config.reservoir_capacity_liters = parsed;
        }
    }

    if let Ok(raw) = env::var("FLOWOUT_SAMPLE_INTERVAL_SECONDS") {
        if let Ok(parsed) = raw.trim().parse::<u32>() {
            config.nominal_interval_seconds = parsed;
        }
    }

    if let Ok(raw) = env::var("FLOWOUT_PUMP_DURATION_BASIS") {
        if let Some(parsed) = parse_pump_duration_basis(&raw) {
            config.pump_duration_basis = parsed;
        }
    }

    if let Ok(raw) = env::var("FLOWOUT_WARMUP_ROWS") {
        if let Ok(parsed) = raw.trim().parse::<usize>() {
            config.warmup_rows = Some(parsed);
        }
    }

    config
}

fn parse_pump_duration_basis(raw: &str) -> Option<PumpDurationBasis> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "nominal" => Some(PumpDurationBasis::NominalInterval),
        "elapsed" => Some(PumpDurationBasis::ElapsedSeconds),
        _ => None,
    }
}
