//! Typed rows flowing between pipeline stages.

use chrono::{Datelike, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

pub const WEATHER_CHANNEL_COUNT: usize = 17;

pub const WEATHER_CHANNELS: [&str; WEATHER_CHANNEL_COUNT] = [
    "total_precip_mm",
    "station_pressure_mb",
    "max_pressure_last_hour_mb",
    "min_pressure_last_hour_mb",
    "global_radiation_kj_m2",
    "air_temp_c",
    "dew_point_temp_c",
    "max_temp_last_hour_c",
    "min_temp_last_hour_c",
    "max_dew_point_last_hour_c",
    "min_dew_point_last_hour_c",
    "max_humidity_last_hour_percentage",
    "min_humidity_last_hour_percentage",
    "relative_humidity_percentage",
    "wind_direction_deg",
    "max_wind_gust_m_s",
    "wind_speed_m_s",
];

pub type WeatherChannels = [Option<f64>; WEATHER_CHANNEL_COUNT];

/// Provenance of a sample's reservoir level reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LevelStatus {
    Observed,
    Imputed,
    /// Zero reading with no valid neighbor on one side; value left as read.
    Unrepaired,
}

impl LevelStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Observed => "observed",
            Self::Imputed => "imputed",
            Self::Unrepaired => "unrepaired",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "observed" => Some(Self::Observed),
            "imputed" => Some(Self::Imputed),
            "unrepaired" => Some(Self::Unrepaired),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    pub timestamp: NaiveDateTime,
    /// L/s
    pub flow_in_rate: f64,
    pub reservoir_level_percentage: f64,
    /// mca
    pub pressure: f64,
    pub pump_1_on: bool,
    pub pump_2_on: bool,
    pub level_status: LevelStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciledSample {
    pub id: u64,
    pub sample: RawSample,
    pub reservoir_level_liters: f64,
    pub elapsed_seconds: f64,
    pub inflow_liters: f64,
    pub level_delta_liters: f64,
    pub outflow_liters: f64,
    pub output_flow_rate: f64,
    pub flow_rate_adjusted: bool,
}

impl ReconciledSample {
    pub fn timestamp(&self) -> NaiveDateTime {
        self.sample.timestamp
    }
}

/// Hourly join key shared by telemetry and weather rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HourKey {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
}

impl HourKey {
    pub fn from_timestamp(ts: NaiveDateTime) -> Self {
        Self {
            year: ts.year(),
            month: ts.month(),
            day: ts.day(),
            hour: ts.hour(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSample {
    pub key: HourKey,
    pub channels: WeatherChannels,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatheredSample {
    pub reconciled: ReconciledSample,
    pub weather: WeatherChannels,
}

/// Round half to even at `decimals`, matching the numeric library the
/// training side was built against.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    if !value.is_finite() {
        return value;
    }
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round_ties_even() / factor
}
