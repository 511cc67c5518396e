//! Multi-resolution chart aggregation.
//!
//! This module turns raw stored samples into the per-metric, per-period
//! statistics that reports consume, and drives chart rendering through
//! the [`ChartRenderer`] seam. Counter metrics are converted to rates
//! (reboot-aware), gauges are transformed and scaled, and longer periods
//! are binned down to a sane point density. Pixels are somebody else's
//! problem: the renderer only ever receives finished series.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::catalog::{
    self, chart_metrics, chart_scale, is_counter_metric, transform_value, MetricClass, Period,
    Role,
};
use crate::config::Config;
use crate::series::{calculate_statistics, ChartStatistics, DataPoint, Sample, TimeSeries};
use crate::store::MetricStore;

/// Allow small scheduling jitter before dropping a counter sample.
const MIN_COUNTER_INTERVAL_RATIO: f64 = 0.9;

/// Statistics keyed by metric name, then period.
pub type StatsByMetric = BTreeMap<String, BTreeMap<Period, ChartStatistics>>;

/// Time aggregation settings for one chart period.
///
/// Bin sizes target roughly 100-400 points per chart.
#[derive(Debug, Clone, Copy)]
pub struct PeriodSpec {
    /// How far back the chart looks, in seconds.
    pub lookback_secs: i64,
    /// Mean-bin width in seconds; `None` charts raw points.
    pub bin_seconds: Option<i64>,
}

/// Lookback and binning for a period.
pub const fn period_spec(period: Period) -> PeriodSpec {
    match period {
        Period::Day => PeriodSpec {
            lookback_secs: Period::Day.lookback_secs(),
            bin_seconds: None,
        },
        Period::Week => PeriodSpec {
            lookback_secs: Period::Week.lookback_secs(),
            bin_seconds: Some(1800),
        },
        Period::Month => PeriodSpec {
            lookback_secs: Period::Month.lookback_secs(),
            bin_seconds: Some(7200),
        },
        Period::Year => PeriodSpec {
            lookback_secs: Period::Year.lookback_secs(),
            bin_seconds: Some(86_400),
        },
    }
}

/// Chart color theme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Theme {
    Light,
    Dark,
}

impl Theme {
    pub const ALL: [Theme; 2] = [Theme::Light, Theme::Dark];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Dark => "dark",
        }
    }
}

/// Rendering seam: receives finished series, produces artifact identifiers.
///
/// The production implementation rasterizes SVG files outside this crate.
pub trait ChartRenderer {
    fn render(&mut self, series: &TimeSeries, theme: Theme) -> Result<String>;
}

/// Renderer that produces identifiers without drawing anything. Used when
/// only statistics are wanted, and as the default for tests.
#[derive(Debug, Default)]
pub struct NoopRenderer;

impl ChartRenderer for NoopRenderer {
    fn render(&mut self, series: &TimeSeries, theme: Theme) -> Result<String> {
        Ok(artifact_id(series, theme))
    }
}

/// Canonical artifact identifier for a rendered chart.
pub fn artifact_id(series: &TimeSeries, theme: Theme) -> String {
    format!(
        "{}/{}_{}_{}.svg",
        series.role,
        series.metric,
        series.period,
        theme.as_str(),
    )
}

/// Per-call aggregation options, re-derived from configuration by the
/// caller before every call so flag flips apply without a restart.
#[derive(Debug, Clone, Copy)]
pub struct ChartOptions {
    /// Include discovered telemetry.* channels for repeaters.
    pub telemetry_enabled: bool,
    /// Expected companion sampling interval, seconds.
    pub companion_step_secs: f64,
    /// Expected repeater sampling interval, seconds.
    pub repeater_step_secs: f64,
}

impl ChartOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            telemetry_enabled: cfg.telemetry_enabled,
            companion_step_secs: cfg.companion.step.as_secs_f64(),
            repeater_step_secs: cfg.repeater.step.as_secs_f64(),
        }
    }

    fn step_secs(&self, role: Role) -> f64 {
        match role {
            Role::Companion => self.companion_step_secs,
            Role::Repeater => self.repeater_step_secs,
        }
    }
}

/// Build a chart-ready series from raw samples for one metric.
///
/// Gauges get the metric's transform and scale applied. Counters become
/// per-second rates scaled by the metric's factor; samples closer
/// together than ~one polling step are dropped (scheduling jitter), and
/// negative deltas (reboots) contribute no rate point. Finally the
/// period's bin width is applied.
pub fn load_series(
    metric: &str,
    role: Role,
    period: Period,
    samples: &[Sample],
    step_secs: f64,
) -> TimeSeries {
    if samples.is_empty() {
        return TimeSeries::empty(metric, role, period);
    }

    let scale = chart_scale(metric);

    let mut points: Vec<DataPoint> = if is_counter_metric(metric) {
        counter_rates(metric, samples, step_secs, scale)
    } else {
        samples
            .iter()
            .map(|s| DataPoint {
                ts: s.ts,
                value: transform_value(metric, s.value) * scale,
            })
            .collect()
    };

    if let Some(bin_seconds) = period_spec(period).bin_seconds {
        if points.len() > 1 {
            points = bin_mean(&points, bin_seconds);
        }
    }

    TimeSeries {
        metric: metric.to_string(),
        role,
        period,
        points,
    }
}

fn counter_rates(metric: &str, samples: &[Sample], step_secs: f64, scale: f64) -> Vec<DataPoint> {
    let min_interval = (step_secs * MIN_COUNTER_INTERVAL_RATIO).max(1.0);
    let mut rates = Vec::with_capacity(samples.len().saturating_sub(1));

    let mut prev = samples[0];
    for &curr in &samples[1..] {
        let delta_secs = (curr.ts - prev.ts) as f64;

        if delta_secs <= 0.0 {
            continue;
        }
        if delta_secs < min_interval {
            debug!(
                metric,
                ts = curr.ts,
                delta_secs,
                min_interval,
                "skipping counter sample below minimum interval",
            );
            continue;
        }

        let delta_val = curr.value - prev.value;
        if delta_val < 0.0 {
            debug!(metric, ts = curr.ts, "counter reset detected");
            prev = curr;
            continue;
        }

        rates.push(DataPoint {
            ts: curr.ts,
            value: delta_val / delta_secs * scale,
        });
        prev = curr;
    }

    rates
}

/// Aggregate points into fixed-width time bins by mean. Bin timestamps
/// land at the bin center.
fn bin_mean(points: &[DataPoint], bin_seconds: i64) -> Vec<DataPoint> {
    let mut bins: BTreeMap<i64, (f64, u32)> = BTreeMap::new();

    for point in points {
        let bin_key = point.ts.div_euclid(bin_seconds) * bin_seconds;
        let entry = bins.entry(bin_key).or_insert((0.0, 0));
        entry.0 += point.value;
        entry.1 += 1;
    }

    bins.into_iter()
        .map(|(bin_key, (sum, count))| DataPoint {
            ts: bin_key + bin_seconds / 2,
            value: sum / f64::from(count),
        })
        .collect()
}

/// Aggregate and render every chart for a role.
///
/// Iterates the role's chart metrics (base set plus telemetry discovered
/// from the store when enabled, unless an explicit `metrics` set is
/// given) across all periods and both themes. Returns the rendered
/// artifact identifiers and the statistics map.
///
/// A metric with no data for a period gets no entry in the statistics
/// map at all; a metric whose data exists but reduces to an empty series
/// (e.g. a lone counter sample) gets an entry with absent statistics.
pub fn render_all<S, R>(
    store: &S,
    renderer: &mut R,
    role: Role,
    options: &ChartOptions,
    now_ts: i64,
    metrics: Option<&[String]>,
) -> Result<(Vec<String>, StatsByMetric)>
where
    S: MetricStore,
    R: ChartRenderer,
{
    let metrics: Vec<String> = match metrics {
        Some(explicit) => explicit.to_vec(),
        None => {
            let available = store
                .available_metrics(role)
                .context("enumerating available metrics")?;
            chart_metrics(role, &available, options.telemetry_enabled)
        }
    };

    let step_secs = options.step_secs(role);
    let mut generated = Vec::new();
    let mut stats: StatsByMetric = BTreeMap::new();

    for period in Period::ALL {
        let start_ts = now_ts - period_spec(period).lookback_secs;
        let period_data = store
            .metrics_for_period(role, start_ts, now_ts)
            .with_context(|| format!("querying {role} metrics for {period}"))?;

        for metric in &metrics {
            let Some(samples) = period_data.get(metric) else {
                continue;
            };

            let series = load_series(metric, role, period, samples, step_secs);
            stats
                .entry(metric.clone())
                .or_default()
                .insert(period, calculate_statistics(&series));

            for theme in Theme::ALL {
                generated.push(renderer.render(&series, theme)?);
            }
        }
    }

    info!(
        %role,
        charts = generated.len(),
        metrics = stats.len(),
        "rendered charts",
    );
    Ok((generated, stats))
}

/// Write the statistics map to `{out_dir}/assets/{role}/chart_stats.json`.
pub fn save_chart_stats(out_dir: &Path, role: Role, stats: &StatsByMetric) -> Result<PathBuf> {
    let stats_path = out_dir
        .join("assets")
        .join(role.as_str())
        .join("chart_stats.json");

    if let Some(parent) = stats_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    let json: BTreeMap<&str, BTreeMap<&str, serde_json::Value>> = stats
        .iter()
        .map(|(metric, by_period)| {
            let periods = by_period
                .iter()
                .map(|(period, s)| {
                    let value = serde_json::json!({
                        "min": s.min,
                        "avg": s.avg,
                        "max": s.max,
                        "current": s.current,
                    });
                    (period.as_str(), value)
                })
                .collect();
            (metric.as_str(), periods)
        })
        .collect();

    let data = serde_json::to_string_pretty(&json).context("serializing chart stats")?;
    std::fs::write(&stats_path, data)
        .with_context(|| format!("writing {}", stats_path.display()))?;

    debug!(path = %stats_path.display(), "saved chart stats");
    Ok(stats_path)
}

/// One chart inside a group: its metric, statistics, and artifact stem
/// (theme suffixing happens at render/consumption time).
#[derive(Debug, Clone)]
pub struct ChartEntry {
    pub metric: String,
    pub stats: ChartStatistics,
    pub artifact: String,
}

/// An ordered, titled run of charts on a report page.
#[derive(Debug, Clone)]
pub struct ChartGroup {
    pub title: &'static str,
    pub charts: Vec<ChartEntry>,
}

const REPEATER_CHART_GROUPS: &[(&str, &[&str])] = &[
    ("Power", &["bat", "bat_pct"]),
    ("Signal Quality", &["last_rssi", "last_snr", "noise_floor"]),
    (
        "Packet Traffic",
        &[
            "nb_recv",
            "nb_sent",
            "recv_flood",
            "sent_flood",
            "recv_direct",
            "sent_direct",
        ],
    ),
    ("Airtime", &["airtime", "rx_airtime"]),
    (
        "Duplicates & Queue",
        &["flood_dups", "direct_dups", "tx_queue_len", "uptime"],
    ),
];

const COMPANION_CHART_GROUPS: &[(&str, &[&str])] = &[
    ("Power", &["battery_mv", "bat_pct"]),
    ("Network", &["contacts", "uptime_secs"]),
    ("Packet Traffic", &["recv", "sent"]),
];

/// Build the ordered chart groups for one role and period from the
/// statistics map.
///
/// Base metrics land in fixed semantic groups. For repeaters, telemetry
/// metrics present in the map are appended as a final "Telemetry" group,
/// restricted to the allow-listed chartable kinds; voltage and GPS
/// channels never appear here even when data exists, because they need
/// rendering this numeric-chart path does not provide.
pub fn build_chart_groups(role: Role, period: Period, stats: &StatsByMetric) -> Vec<ChartGroup> {
    let base_groups = match role {
        Role::Repeater => REPEATER_CHART_GROUPS,
        Role::Companion => COMPANION_CHART_GROUPS,
    };

    let mut groups = Vec::with_capacity(base_groups.len() + 1);

    for &(title, metrics) in base_groups {
        let charts: Vec<ChartEntry> = metrics
            .iter()
            .filter_map(|&metric| chart_entry(metric, role, period, stats))
            .collect();
        if !charts.is_empty() {
            groups.push(ChartGroup { title, charts });
        }
    }

    if role == Role::Repeater {
        let telemetry: Vec<ChartEntry> = stats
            .keys()
            .filter(|name| {
                matches!(catalog::classify(name), MetricClass::Telemetry { kind } if kind.chartable())
            })
            .filter_map(|name| chart_entry(name, role, period, stats))
            .collect();

        if !telemetry.is_empty() {
            groups.push(ChartGroup {
                title: "Telemetry",
                charts: telemetry,
            });
        }
    }

    groups
}

fn chart_entry(
    metric: &str,
    role: Role,
    period: Period,
    stats: &StatsByMetric,
) -> Option<ChartEntry> {
    let period_stats = stats.get(metric)?.get(&period)?;
    Some(ChartEntry {
        metric: metric.to_string(),
        stats: *period_stats,
        artifact: format!("{role}/{metric}_{period}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(step: i64, values: &[f64]) -> Vec<Sample> {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| Sample::new(1_700_000_000 + i as i64 * step, v))
            .collect()
    }

    #[test]
    fn test_gauge_series_applies_transform_and_scale() {
        let series = load_series(
            "bat",
            Role::Repeater,
            Period::Day,
            &samples(900, &[4080.0, 4100.0]),
            900.0,
        );

        assert_eq!(series.points.len(), 2);
        assert!((series.points[0].value - 4.08).abs() < 1e-9);
        assert!((series.points[1].value - 4.10).abs() < 1e-9);
    }

    #[test]
    fn test_counter_series_becomes_scaled_rate() {
        // 900 apart in 900s => 1/s => 60/min after scaling.
        let series = load_series(
            "nb_recv",
            Role::Repeater,
            Period::Day,
            &samples(900, &[0.0, 900.0, 1800.0]),
            900.0,
        );

        assert_eq!(series.points.len(), 2);
        for p in &series.points {
            assert!((p.value - 60.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_counter_reboot_produces_no_rate_point() {
        let series = load_series(
            "nb_recv",
            Role::Repeater,
            Period::Day,
            &samples(900, &[1000.0, 1900.0, 50.0, 950.0]),
            900.0,
        );

        // Growth, reset (skipped), growth from the new baseline.
        assert_eq!(series.points.len(), 2);
        assert!(series.points.iter().all(|p| p.value >= 0.0));
    }

    #[test]
    fn test_counter_sub_interval_samples_are_dropped() {
        let raw = vec![
            Sample::new(1_700_000_000, 0.0),
            Sample::new(1_700_000_010, 5000.0), // 10s after previous: jitter
            Sample::new(1_700_000_900, 900.0 + 0.0),
        ];
        let series = load_series("nb_recv", Role::Repeater, Period::Day, &raw, 900.0);

        // The jitter sample never becomes a rate point and never becomes
        // the delta baseline.
        assert_eq!(series.points.len(), 1);
        assert!((series.points[0].value - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_single_counter_sample_yields_empty_series() {
        let series = load_series(
            "nb_recv",
            Role::Repeater,
            Period::Day,
            &samples(900, &[500.0]),
            900.0,
        );
        assert!(series.is_empty());
    }

    #[test]
    fn test_week_series_is_binned() {
        // 30-minute bins over 4 hours of 15-minute gauge samples.
        let values: Vec<f64> = (0..16).map(f64::from).collect();
        let series = load_series(
            "last_rssi",
            Role::Repeater,
            Period::Week,
            &samples(900, &values),
            900.0,
        );

        assert!(series.points.len() <= 9);
        assert!(series.points.len() >= 8);
        // Binned means preserve the overall mean.
        let mean: f64 =
            series.points.iter().map(|p| p.value).sum::<f64>() / series.points.len() as f64;
        assert!((mean - 7.5).abs() < 1.0);
    }

    #[test]
    fn test_bin_mean_centers_timestamps() {
        let points = vec![
            DataPoint { ts: 0, value: 1.0 },
            DataPoint { ts: 10, value: 3.0 },
            DataPoint { ts: 100, value: 5.0 },
        ];
        let binned = bin_mean(&points, 60);

        assert_eq!(binned.len(), 2);
        assert_eq!(binned[0].ts, 30);
        assert_eq!(binned[0].value, 2.0);
        assert_eq!(binned[1].ts, 90);
        assert_eq!(binned[1].value, 5.0);
    }

    #[test]
    fn test_build_chart_groups_orders_base_metrics() {
        let mut stats: StatsByMetric = BTreeMap::new();
        for metric in ["bat", "last_rssi", "nb_recv"] {
            stats
                .entry(metric.to_string())
                .or_default()
                .insert(Period::Day, ChartStatistics::default());
        }

        let groups = build_chart_groups(Role::Repeater, Period::Day, &stats);
        let titles: Vec<&str> = groups.iter().map(|g| g.title).collect();
        assert_eq!(titles, vec!["Power", "Signal Quality", "Packet Traffic"]);
        assert_eq!(groups[0].charts[0].metric, "bat");
        assert_eq!(groups[0].charts[0].artifact, "repeater/bat_day");
    }

    #[test]
    fn test_build_chart_groups_appends_telemetry_for_repeater() {
        let mut stats: StatsByMetric = BTreeMap::new();
        for metric in [
            "bat",
            "telemetry.temperature.1",
            "telemetry.humidity.1",
            "telemetry.voltage.1",
            "telemetry.gps.0.latitude",
        ] {
            stats
                .entry(metric.to_string())
                .or_default()
                .insert(Period::Day, ChartStatistics::default());
        }

        let groups = build_chart_groups(Role::Repeater, Period::Day, &stats);
        let telemetry = groups.last().expect("groups");
        assert_eq!(telemetry.title, "Telemetry");

        let metrics: Vec<&str> = telemetry.charts.iter().map(|c| c.metric.as_str()).collect();
        assert_eq!(
            metrics,
            vec!["telemetry.humidity.1", "telemetry.temperature.1"]
        );
    }

    #[test]
    fn test_build_chart_groups_companion_has_no_telemetry_group() {
        let mut stats: StatsByMetric = BTreeMap::new();
        for metric in ["battery_mv", "telemetry.temperature.1"] {
            stats
                .entry(metric.to_string())
                .or_default()
                .insert(Period::Day, ChartStatistics::default());
        }

        let groups = build_chart_groups(Role::Companion, Period::Day, &stats);
        assert!(groups.iter().all(|g| g.title != "Telemetry"));
    }

    #[test]
    fn test_build_chart_groups_skips_metrics_missing_for_period() {
        let mut stats: StatsByMetric = BTreeMap::new();
        stats
            .entry("bat".to_string())
            .or_default()
            .insert(Period::Year, ChartStatistics::default());

        let groups = build_chart_groups(Role::Repeater, Period::Day, &stats);
        assert!(groups.is_empty());
    }
}
