//! Descriptive summaries over the reconciled series.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate, Timelike};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::PeakHours;
use crate::sample::ReconciledSample;

const WEEKEND_FIRST_DAY: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HourlyOutputFlow {
    pub hour: u32,
    pub avg_weekday_output_flow: Option<f64>,
    pub avg_weekend_output_flow: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PumpUsage {
    pub pump: u8,
    /// Mean over days with at least one peak-hour sample.
    pub peak_minutes_per_day: Option<f64>,
    /// Mean over days with at least one off-peak sample.
    pub offpeak_minutes_per_day: Option<f64>,
}

#[derive(Default)]
struct Mean {
    sum: f64,
    count: u64,
}

impl Mean {
    fn push(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    fn value(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

/// Mean output flow per hour of day, split into weekdays (Mon-Fri) and
/// weekends. Hours absent from both groups are omitted.
pub fn average_output_flow_by_hour<'a>(
    rows: impl IntoIterator<Item = &'a ReconciledSample>,
) -> Vec<HourlyOutputFlow> {
    let mut by_hour: BTreeMap<u32, (Mean, Mean)> = BTreeMap::new();
    for row in rows {
        let ts = row.timestamp();
        let (weekday, weekend) = by_hour.entry(ts.hour()).or_default();
        if ts.weekday().num_days_from_monday() < WEEKEND_FIRST_DAY {
            weekday.push(row.output_flow_rate);
        } else {
            weekend.push(row.output_flow_rate);
        }
    }

    let out: Vec<HourlyOutputFlow> = by_hour
        .into_iter()
        .map(|(hour, (weekday, weekend))| HourlyOutputFlow {
            hour,
            avg_weekday_output_flow: weekday.value(),
            avg_weekend_output_flow: weekend.value(),
        })
        .collect();

    info!(
        component = "analytics",
        event = "analytics.output_flow_by_hour.finish",
        hours = out.len()
    );
    out
}

/// Average daily minutes each pump ran inside and outside peak hours, using
/// each sample's true elapsed seconds.
pub fn pump_usage_peak_offpeak<'a>(
    rows: impl IntoIterator<Item = &'a ReconciledSample>,
    peak: &PeakHours,
) -> [PumpUsage; 2] {
    // Per day: seconds each pump was on.
    let mut peak_days: BTreeMap<NaiveDate, [f64; 2]> = BTreeMap::new();
    let mut offpeak_days: BTreeMap<NaiveDate, [f64; 2]> = BTreeMap::new();

    for row in rows {
        let ts = row.timestamp();
        let days = if peak.contains(ts.hour()) {
            &mut peak_days
        } else {
            &mut offpeak_days
        };
        let seconds = days.entry(ts.date()).or_insert([0.0; 2]);
        if row.sample.pump_1_on {
            seconds[0] += row.elapsed_seconds;
        }
        if row.sample.pump_2_on {
            seconds[1] += row.elapsed_seconds;
        }
    }

    let daily_minutes = |days: &BTreeMap<NaiveDate, [f64; 2]>, pump: usize| {
        let mut mean = Mean::default();
        for seconds in days.values() {
            mean.push(seconds[pump]);
        }
        mean.value().map(|s| s / 60.0)
    };

    let usage = [0usize, 1].map(|pump| PumpUsage {
        pump: pump as u8 + 1,
        peak_minutes_per_day: daily_minutes(&peak_days, pump),
        offpeak_minutes_per_day: daily_minutes(&offpeak_days, pump),
    });

    info!(
        component = "analytics",
        event = "analytics.pump_usage.finish",
        peak_days = peak_days.len(),
        offpeak_days = offpeak_days.len()
    );
    usage
}

/// `"H hours and M minutes"`, truncating fractional minutes; no data reads as zero.
pub fn format_hours_minutes(minutes: Option<f64>) -> String {
    let total = minutes.map(|m| m.max(0.0) as u64).unwrap_or(0);
    format!("{} hours and {} minutes", total / 60, total % 60)
}
