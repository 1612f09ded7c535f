//! Hourly weather alignment and gap filling.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::impute::trailing_mean;
use crate::sample::{
    HourKey, ReconciledSample, WeatherChannels, WeatherSample, WeatheredSample, WEATHER_CHANNELS,
    WEATHER_CHANNEL_COUNT,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeatherReport {
    pub telemetry_rows: u64,
    pub duplicate_primary_keys: u64,
    pub override_source_rows_in_window: u64,
    pub unmatched_rows: u64,
    pub override_hits: u64,
    pub filled_moving_average: u64,
    pub filled_forward: u64,
    pub filled_backward: u64,
    pub still_missing: u64,
}

/// Left-join reconciled telemetry to hourly weather, let the override source
/// win inside its configured date range, then fill remaining gaps per
/// channel: trailing moving average, forward fill, back fill.
pub fn align_weather(
    rows: Vec<ReconciledSample>,
    primary: &[WeatherSample],
    override_source: &[WeatherSample],
    cfg: &PipelineConfig,
) -> (Vec<WeatheredSample>, WeatherReport) {
    let mut report = WeatherReport {
        telemetry_rows: rows.len() as u64,
        ..WeatherReport::default()
    };

    let mut primary_by_key: HashMap<HourKey, &WeatherChannels> =
        HashMap::with_capacity(primary.len());
    for row in primary {
        if primary_by_key.contains_key(&row.key) {
            report.duplicate_primary_keys += 1;
        } else {
            primary_by_key.insert(row.key, &row.channels);
        }
    }

    let mut override_by_key: HashMap<HourKey, WeatherChannels> = HashMap::new();
    for row in override_source {
        if !cfg.weather_override.contains(row.key.day, row.key.month) {
            continue;
        }
        report.override_source_rows_in_window += 1;
        let merged = override_by_key
            .entry(row.key)
            .or_insert([None; WEATHER_CHANNEL_COUNT]);
        for (slot, value) in merged.iter_mut().zip(row.channels.iter()) {
            if value.is_some() {
                *slot = *value;
            }
        }
    }

    let mut joined: Vec<WeatheredSample> = rows
        .into_iter()
        .map(|reconciled| {
            let key = HourKey::from_timestamp(reconciled.timestamp());
            let mut weather = match primary_by_key.get(&key) {
                Some(channels) => **channels,
                None => {
                    report.unmatched_rows += 1;
                    [None; WEATHER_CHANNEL_COUNT]
                }
            };
            if let Some(overrides) = override_by_key.get(&key) {
                report.override_hits += 1;
                for (slot, value) in weather.iter_mut().zip(overrides.iter()) {
                    if value.is_some() {
                        *slot = *value;
                    }
                }
            }
            WeatheredSample {
                reconciled,
                weather,
            }
        })
        .collect();

    for channel in 0..WEATHER_CHANNEL_COUNT {
        let column: Vec<Option<f64>> = joined.iter().map(|row| row.weather[channel]).collect();
        if column.iter().all(Option::is_some) {
            continue;
        }
        let filled = fill_channel(&column, cfg.weather_fill_window, &mut report);
        if filled.iter().all(Option::is_none) {
            warn!(
                component = "weather",
                event = "weather.channel.empty",
                channel = WEATHER_CHANNELS[channel]
            );
        }
        for (row, value) in joined.iter_mut().zip(filled) {
            row.weather[channel] = value;
        }
    }

    if report.unmatched_rows > 0 {
        warn!(
            component = "weather",
            event = "weather.join.unmatched",
            unmatched_rows = report.unmatched_rows
        );
    }
    info!(
        component = "weather",
        event = "weather.align.finish",
        rows = joined.len(),
        override_hits = report.override_hits,
        filled_moving_average = report.filled_moving_average,
        filled_forward = report.filled_forward,
        filled_backward = report.filled_backward,
        still_missing = report.still_missing
    );

    (joined, report)
}

fn fill_channel(
    column: &[Option<f64>],
    window: usize,
    report: &mut WeatherReport,
) -> Vec<Option<f64>> {
    let moving = trailing_mean(column, window.max(1));
    let mut filled: Vec<Option<f64>> = column
        .iter()
        .zip(&moving)
        .map(|(value, average)| match (value, average) {
            (Some(v), _) => Some(*v),
            (None, Some(avg)) => {
                report.filled_moving_average += 1;
                Some(*avg)
            }
            (None, None) => None,
        })
        .collect();

    let mut last = None;
    for value in filled.iter_mut() {
        match value {
            Some(v) => last = Some(*v),
            None => {
                if last.is_some() {
                    report.filled_forward += 1;
                    *value = last;
                }
            }
        }
    }

    let mut next = None;
    for value in filled.iter_mut().rev() {
        match value {
            Some(v) => next = Some(*v),
            None => {
                if next.is_some() {
                    report.filled_backward += 1;
                    *value = next;
                } else {
                    report.still_missing += 1;
                }
            }
        }
    }

    filled
}
