//! Period aggregation for reports.
//!
//! Daily aggregates come straight from the store; monthly and yearly
//! summaries roll the daily results up. Gauges keep a count-weighted
//! mean plus the global min/max (with timestamps); counters keep the
//! reboot-reconciled total and the reset count.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::NaiveDate;
use tracing::debug;

use crate::catalog::{
    is_counter_metric, Role, COMPANION_CHART_METRICS, REPEATER_CHART_METRICS,
};
use crate::series::counter::{counter_total, CounterSample};
use crate::series::Sample;
use crate::store::MetricStore;

/// Metrics aggregated into reports for a role.
pub fn report_metrics(role: Role) -> &'static [&'static str] {
    match role {
        Role::Companion => COMPANION_CHART_METRICS,
        Role::Repeater => REPEATER_CHART_METRICS,
    }
}

/// Statistics for a single metric over a period.
///
/// Gauge metrics populate `mean`/`min`/`max`; counter metrics populate
/// `total` and `reboot_count`. Absent values mean "not enough data",
/// never zero.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MetricStats {
    pub mean: Option<f64>,
    pub min_value: Option<f64>,
    pub min_ts: Option<i64>,
    pub max_value: Option<f64>,
    pub max_ts: Option<i64>,
    /// Counter metrics: sum of positive deltas, reboot-corrected.
    pub total: Option<i64>,
    /// Samples that contributed.
    pub count: u32,
    /// Counter resets detected within the period.
    pub reboot_count: u32,
}

impl MetricStats {
    pub fn has_data(&self) -> bool {
        self.count > 0
    }
}

/// Aggregated metrics for one calendar day.
#[derive(Debug, Clone, Default)]
pub struct DailyAggregate {
    pub date: Option<NaiveDate>,
    pub metrics: BTreeMap<String, MetricStats>,
    /// Distinct poll timestamps seen this day.
    pub snapshot_count: usize,
}

/// Aggregated metrics for one month, with the daily breakdown.
#[derive(Debug, Clone)]
pub struct MonthlyAggregate {
    pub year: i32,
    pub month: u32,
    pub role: Role,
    pub daily: Vec<DailyAggregate>,
    pub summary: BTreeMap<String, MetricStats>,
}

/// Aggregated metrics for one year, with the monthly breakdown.
#[derive(Debug, Clone)]
pub struct YearlyAggregate {
    pub year: i32,
    pub role: Role,
    pub monthly: Vec<MonthlyAggregate>,
    pub summary: BTreeMap<String, MetricStats>,
}

fn gauge_stats(samples: &[Sample]) -> MetricStats {
    if samples.is_empty() {
        return MetricStats::default();
    }

    let mut min = samples[0];
    let mut max = samples[0];
    let mut sum = 0.0;

    for &sample in samples {
        if sample.value < min.value {
            min = sample;
        }
        if sample.value > max.value {
            max = sample;
        }
        sum += sample.value;
    }

    MetricStats {
        mean: Some(sum / samples.len() as f64),
        min_value: Some(min.value),
        min_ts: Some(min.ts),
        max_value: Some(max.value),
        max_ts: Some(max.ts),
        count: samples.len() as u32,
        ..MetricStats::default()
    }
}

fn counter_stats(samples: &[Sample]) -> MetricStats {
    if samples.is_empty() {
        return MetricStats::default();
    }

    // Reconcile at full precision so fractional readings (airtime
    // seconds) accumulate exactly; round once for the reported total.
    let readings: Vec<CounterSample<f64>> = samples
        .iter()
        .map(|s| CounterSample::new(s.ts, s.value))
        .collect();
    let (total, reboot_count) = counter_total(&readings);

    MetricStats {
        total: total.map(|t| t.round() as i64),
        count: samples.len() as u32,
        reboot_count,
        ..MetricStats::default()
    }
}

/// Aggregate one calendar day of store data for a role.
pub fn aggregate_daily<S: MetricStore>(
    store: &S,
    role: Role,
    date: NaiveDate,
) -> Result<DailyAggregate> {
    let start_ts = date.and_hms_opt(0, 0, 0).expect("midnight exists").and_utc().timestamp();
    let end_ts = start_ts + 86_399;

    let data = store.metrics_for_period(role, start_ts, end_ts)?;

    let mut agg = DailyAggregate {
        date: Some(date),
        ..DailyAggregate::default()
    };

    let mut timestamps = std::collections::BTreeSet::new();
    for samples in data.values() {
        for sample in samples {
            timestamps.insert(sample.ts);
        }
    }
    agg.snapshot_count = timestamps.len();

    for &metric in report_metrics(role) {
        let Some(samples) = data.get(metric) else {
            continue;
        };
        let stats = if is_counter_metric(metric) {
            counter_stats(samples)
        } else {
            gauge_stats(samples)
        };
        if stats.has_data() {
            agg.metrics.insert(metric.to_string(), stats);
        }
    }

    debug!(
        %role,
        date = %date,
        snapshots = agg.snapshot_count,
        metrics = agg.metrics.len(),
        "aggregated daily metrics",
    );
    Ok(agg)
}

/// Merge daily gauge stats into a period summary: count-weighted mean,
/// global min/max with their timestamps.
fn merge_gauge_summaries<'a, I>(parts: I) -> MetricStats
where
    I: Iterator<Item = &'a MetricStats>,
{
    let mut weighted_sum = 0.0;
    let mut total_count = 0u32;
    let mut min: Option<(f64, Option<i64>)> = None;
    let mut max: Option<(f64, Option<i64>)> = None;

    for stats in parts {
        if !stats.has_data() {
            continue;
        }

        if let Some(mean) = stats.mean {
            weighted_sum += mean * f64::from(stats.count);
            total_count += stats.count;
        }

        if let Some(value) = stats.min_value {
            if min.map_or(true, |(current, _)| value < current) {
                min = Some((value, stats.min_ts));
            }
        }

        if let Some(value) = stats.max_value {
            if max.map_or(true, |(current, _)| value > current) {
                max = Some((value, stats.max_ts));
            }
        }
    }

    if total_count == 0 {
        return MetricStats::default();
    }

    MetricStats {
        mean: Some(weighted_sum / f64::from(total_count)),
        min_value: min.map(|(v, _)| v),
        min_ts: min.and_then(|(_, ts)| ts),
        max_value: max.map(|(v, _)| v),
        max_ts: max.and_then(|(_, ts)| ts),
        count: total_count,
        ..MetricStats::default()
    }
}

/// Merge daily counter stats into a period summary: totals and reboot
/// counts sum.
fn merge_counter_summaries<'a, I>(parts: I) -> MetricStats
where
    I: Iterator<Item = &'a MetricStats>,
{
    let mut total = 0i64;
    let mut total_count = 0u32;
    let mut reboots = 0u32;

    for stats in parts {
        if let Some(part_total) = stats.total {
            total += part_total;
            total_count += stats.count;
            reboots += stats.reboot_count;
        }
    }

    if total_count == 0 {
        return MetricStats::default();
    }

    MetricStats {
        total: Some(total),
        count: total_count,
        reboot_count: reboots,
        ..MetricStats::default()
    }
}

fn summarize(
    role: Role,
    parts: &[&BTreeMap<String, MetricStats>],
) -> BTreeMap<String, MetricStats> {
    let mut summary = BTreeMap::new();

    for &metric in report_metrics(role) {
        let stats_iter = parts.iter().filter_map(|m| m.get(metric));
        let merged = if is_counter_metric(metric) {
            merge_counter_summaries(stats_iter)
        } else {
            merge_gauge_summaries(stats_iter)
        };
        if merged.has_data() {
            summary.insert(metric.to_string(), merged);
        }
    }

    summary
}

/// Aggregate a calendar month from daily data. Days after `today` are
/// not queried.
pub fn aggregate_monthly<S: MetricStore>(
    store: &S,
    role: Role,
    year: i32,
    month: u32,
    today: NaiveDate,
) -> Result<MonthlyAggregate> {
    let mut daily = Vec::new();

    for day in 1..=31u32 {
        let Some(date) = NaiveDate::from_ymd_opt(year, month, day) else {
            break; // Past the end of the month.
        };
        if date > today {
            break;
        }

        let agg = aggregate_daily(store, role, date)?;
        if agg.snapshot_count > 0 {
            daily.push(agg);
        }
    }

    let metric_maps: Vec<&BTreeMap<String, MetricStats>> =
        daily.iter().map(|d| &d.metrics).collect();
    let summary = summarize(role, &metric_maps);

    Ok(MonthlyAggregate {
        year,
        month,
        role,
        daily,
        summary,
    })
}

/// Aggregate a calendar year from monthly data. Future months are not
/// queried.
pub fn aggregate_yearly<S: MetricStore>(
    store: &S,
    role: Role,
    year: i32,
    today: NaiveDate,
) -> Result<YearlyAggregate> {
    let mut monthly = Vec::new();

    for month in 1..=12u32 {
        let first = NaiveDate::from_ymd_opt(year, month, 1).expect("valid month");
        if first > today {
            break;
        }

        let agg = aggregate_monthly(store, role, year, month, today)?;
        if !agg.daily.is_empty() {
            monthly.push(agg);
        }
    }

    let metric_maps: Vec<&BTreeMap<String, MetricStats>> =
        monthly.iter().map(|m| &m.summary).collect();
    let summary = summarize(role, &metric_maps);

    Ok(YearlyAggregate {
        year,
        role,
        monthly,
        summary,
    })
}
