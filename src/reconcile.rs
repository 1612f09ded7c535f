//! Mass-balance reconciliation of inflow, stored volume and outflow.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::sample::{round_to, RawSample, ReconciledSample};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub input_rows: u64,
    pub output_rows: u64,
    pub rows_adjusted: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("timestamps must be strictly increasing: {previous} then {current}")]
    NonIncreasingTimestamp {
        previous: NaiveDateTime,
        current: NaiveDateTime,
    },
}

/// Derive volume and flow quantities for every sample that has a
/// predecessor. The first sample is consumed as the baseline and dropped.
///
/// Outflow is computed from the signed level change, so a falling level adds
/// to the outflow. The reported `level_delta_liters` is the clamped
/// (non-negative) change, and rows whose inflow cannot explain that change
/// are rewritten so that all inflow went to storage.
pub fn reconcile(
    samples: &[RawSample],
    cfg: &PipelineConfig,
) -> Result<(Vec<ReconciledSample>, ReconcileReport), ReconcileError> {
    let capacity = cfg.reservoir_capacity_liters;
    let decimals = cfg.rounding_decimals;
    let mut out = Vec::with_capacity(samples.len().saturating_sub(1));
    let mut report = ReconcileReport {
        input_rows: samples.len() as u64,
        ..ReconcileReport::default()
    };

    for (idx, pair) in samples.windows(2).enumerate() {
        let (previous, current) = (&pair[0], &pair[1]);
        let elapsed_ms = (current.timestamp - previous.timestamp).num_milliseconds();
        if elapsed_ms <= 0 {
            return Err(ReconcileError::NonIncreasingTimestamp {
                previous: previous.timestamp,
                current: current.timestamp,
            });
        }
        let elapsed_seconds = elapsed_ms as f64 / 1_000.0;

        let previous_liters = level_liters(previous, capacity);
        let reservoir_level_liters = level_liters(current, capacity);
        let signed_delta = reservoir_level_liters - previous_liters;

        let mut flow_in_rate = current.flow_in_rate;
        let mut inflow_liters = flow_in_rate * elapsed_seconds;
        let mut outflow_liters = inflow_liters - signed_delta;
        let mut output_flow_rate = outflow_liters / elapsed_seconds;
        let level_delta_liters = signed_delta.max(0.0);

        let flow_rate_adjusted = inflow_liters < level_delta_liters;
        if flow_rate_adjusted {
            flow_in_rate = level_delta_liters / elapsed_seconds;
            inflow_liters = level_delta_liters;
            outflow_liters = 0.0;
            output_flow_rate = 0.0;
            report.rows_adjusted += 1;
            debug!(
                component = "reconcile",
                event = "reconcile.flow.adjusted",
                timestamp = %current.timestamp,
                reported_flow_in_rate = current.flow_in_rate,
                adjusted_flow_in_rate = flow_in_rate
            );
        }

        out.push(ReconciledSample {
            id: (idx + 1) as u64,
            sample: RawSample {
                flow_in_rate: round_to(flow_in_rate, decimals),
                reservoir_level_percentage: round_to(current.reservoir_level_percentage, decimals),
                pressure: round_to(current.pressure, decimals),
                ..current.clone()
            },
            reservoir_level_liters: round_to(reservoir_level_liters, decimals),
            elapsed_seconds: round_to(elapsed_seconds, decimals),
            inflow_liters: round_to(inflow_liters, decimals),
            level_delta_liters: round_to(level_delta_liters, decimals),
            outflow_liters: round_to(outflow_liters, decimals),
            output_flow_rate: round_to(output_flow_rate, decimals),
            flow_rate_adjusted,
        });
    }

    report.output_rows = out.len() as u64;
    info!(
        component = "reconcile",
        event = "reconcile.finish",
        input_rows = report.input_rows,
        output_rows = report.output_rows,
        rows_adjusted = report.rows_adjusted
    );

    Ok((out, report))
}

fn level_liters(sample: &RawSample, capacity_liters: f64) -> f64 {
    sample.reservoir_level_percentage * capacity_liters / 100.0
}
