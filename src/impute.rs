//! Value-level fault repair over the ordered raw series.
//!
//! Four passes, always applied in this order:
//! 1. zero reservoir level: mean of nearest non-zero neighbors (level and flow)
//! 2. zero pressure: trailing moving average, then global mean
//! 3. flow without any pump on: pump 2 is switched on
//! 4. pumps on without flow: both pumps are switched off
//!
//! Every pass reads an immutable slice and returns a new series.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::sample::{round_to, LevelStatus, RawSample};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImputeReport {
    pub levels_imputed: u64,
    pub levels_unrepaired: u64,
    pub pressures_filled_moving_average: u64,
    pub pressures_filled_global_mean: u64,
    pub pressures_missing: u64,
    pub pumps_switched_on: u64,
    pub pumps_switched_off: u64,
}

pub fn impute_all(samples: &[RawSample], cfg: &PipelineConfig) -> (Vec<RawSample>, ImputeReport) {
    let mut report = ImputeReport::default();

    let levels = impute_reservoir_levels(samples, cfg.rounding_decimals, &mut report);
    let pressures = fill_missing_pressure(
        &levels,
        cfg.imputation_window,
        cfg.rounding_decimals,
        &mut report,
    );
    let pumps_on = fix_pump_on_without_pumps(&pressures, &mut report);
    let out = fix_pumps_on_without_flow(&pumps_on, &mut report);

    info!(
        component = "impute",
        event = "impute.finish",
        rows = out.len(),
        levels_imputed = report.levels_imputed,
        levels_unrepaired = report.levels_unrepaired,
        pressures_filled_moving_average = report.pressures_filled_moving_average,
        pressures_filled_global_mean = report.pressures_filled_global_mean,
        pumps_switched_on = report.pumps_switched_on,
        pumps_switched_off = report.pumps_switched_off
    );

    (out, report)
}

/// Pass 1. Neighbors are searched in the input series, so a run of faulty
/// rows between two valid readings all receive the same midpoint.
pub fn impute_reservoir_levels(
    samples: &[RawSample],
    decimals: u32,
    report: &mut ImputeReport,
) -> Vec<RawSample> {
    let prev_valid = nearest_valid_before(samples);
    let next_valid = nearest_valid_after(samples);

    samples
        .iter()
        .enumerate()
        .map(|(idx, sample)| {
            if !is_level_fault(sample) {
                return sample.clone();
            }

            match (prev_valid[idx], next_valid[idx]) {
                (Some(prev), Some(next)) => {
                    let before = &samples[prev];
                    let after = &samples[next];
                    report.levels_imputed += 1;
                    RawSample {
                        reservoir_level_percentage: round_to(
                            (before.reservoir_level_percentage
                                + after.reservoir_level_percentage)
                                / 2.0,
                            decimals,
                        ),
                        flow_in_rate: round_to(
                            (before.flow_in_rate + after.flow_in_rate) / 2.0,
                            decimals,
                        ),
                        level_status: LevelStatus::Imputed,
                        ..sample.clone()
                    }
                }
                (prev, next) => {
                    report.levels_unrepaired += 1;
                    warn!(
                        component = "impute",
                        event = "impute.level.unrepaired",
                        timestamp = %sample.timestamp,
                        has_previous = prev.is_some(),
                        has_next = next.is_some()
                    );
                    RawSample {
                        level_status: LevelStatus::Unrepaired,
                        ..sample.clone()
                    }
                }
            }
        })
        .collect()
}

/// Pass 2. A zero pressure is a missing reading.
pub fn fill_missing_pressure(
    samples: &[RawSample],
    window: usize,
    decimals: u32,
    report: &mut ImputeReport,
) -> Vec<RawSample> {
    let observed: Vec<Option<f64>> = samples
        .iter()
        .map(|s| (s.pressure != 0.0).then_some(s.pressure))
        .collect();
    let moving = trailing_mean(&observed, window.max(1));

    let mut filled: Vec<Option<f64>> = Vec::with_capacity(observed.len());
    for (value, average) in observed.iter().zip(&moving) {
        match (value, average) {
            (Some(v), _) => filled.push(Some(*v)),
            (None, Some(avg)) => {
                report.pressures_filled_moving_average += 1;
                filled.push(Some(*avg));
            }
            (None, None) => filled.push(None),
        }
    }

    let present: Vec<f64> = filled.iter().flatten().copied().collect();
    let global_mean = if present.is_empty() {
        None
    } else {
        Some(present.iter().sum::<f64>() / present.len() as f64)
    };

    samples
        .iter()
        .zip(filled)
        .map(|(sample, value)| {
            let pressure = match (value, global_mean) {
                (Some(v), _) => round_to(v, decimals),
                (None, Some(mean)) => {
                    report.pressures_filled_global_mean += 1;
                    round_to(mean, decimals)
                }
                (None, None) => {
                    report.pressures_missing += 1;
                    sample.pressure
                }
            };
            RawSample {
                pressure,
                ..sample.clone()
            }
        })
        .collect()
}

/// Pass 3.
pub fn fix_pump_on_without_pumps(
    samples: &[RawSample],
    report: &mut ImputeReport,
) -> Vec<RawSample> {
    samples
        .iter()
        .map(|sample| {
            if sample.flow_in_rate > 0.0 && !sample.pump_1_on && !sample.pump_2_on {
                report.pumps_switched_on += 1;
                debug!(
                    component = "impute",
                    event = "impute.pump.switched_on",
                    timestamp = %sample.timestamp
                );
                RawSample {
                    pump_2_on: true,
                    ..sample.clone()
                }
            } else {
                sample.clone()
            }
        })
        .collect()
}

/// Pass 4.
pub fn fix_pumps_on_without_flow(
    samples: &[RawSample],
    report: &mut ImputeReport,
) -> Vec<RawSample> {
    samples
        .iter()
        .map(|sample| {
            if sample.flow_in_rate == 0.0 && (sample.pump_1_on || sample.pump_2_on) {
                report.pumps_switched_off += 1;
                debug!(
                    component = "impute",
                    event = "impute.pump.switched_off",
                    timestamp = %sample.timestamp
                );
                RawSample {
                    pump_1_on: false,
                    pump_2_on: false,
                    ..sample.clone()
                }
            } else {
                sample.clone()
            }
        })
        .collect()
}

fn is_level_fault(sample: &RawSample) -> bool {
    sample.reservoir_level_percentage == 0.0
}

fn nearest_valid_before(samples: &[RawSample]) -> Vec<Option<usize>> {
    let mut out = Vec::with_capacity(samples.len());
    let mut last_valid = None;
    for (idx, sample) in samples.iter().enumerate() {
        out.push(last_valid);
        if !is_level_fault(sample) {
            last_valid = Some(idx);
        }
    }
    out
}

fn nearest_valid_after(samples: &[RawSample]) -> Vec<Option<usize>> {
    let mut out = vec![None; samples.len()];
    let mut next_valid = None;
    for (idx, sample) in samples.iter().enumerate().rev() {
        out[idx] = next_valid;
        if !is_level_fault(sample) {
            next_valid = Some(idx);
        }
    }
    out
}

/// Trailing mean over the last `window` entries, skipping `None`, requiring
/// at least one present value.
pub(crate) fn trailing_mean(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
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
        out.push((count > 0).then(|| sum / count as f64));
    }
    out
}
