//! Time-series data model and summary statistics.
//!
//! A [`TimeSeries`] is a chronologically ordered run of points for one
//! metric/role/period. Ordering is the caller's contract; nothing here
//! re-sorts. Statistics are explicit optionals so "computed zero" and
//! "no data" never collide.

pub mod counter;

use crate::catalog::{Period, Role};

/// A raw stored reading: unix timestamp and value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub ts: i64,
    pub value: f64,
}

impl Sample {
    pub const fn new(ts: i64, value: f64) -> Self {
        Self { ts, value }
    }
}

/// A single chart-ready data point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataPoint {
    pub ts: i64,
    pub value: f64,
}

/// Time series for a single metric, ready for statistics and rendering.
#[derive(Debug, Clone)]
pub struct TimeSeries {
    pub metric: String,
    pub role: Role,
    pub period: Period,
    /// Points in ascending timestamp order (caller-guaranteed).
    pub points: Vec<DataPoint>,
}

impl TimeSeries {
    /// Create an empty series for a metric/role/period.
    pub fn empty(metric: impl Into<String>, role: Role, period: Period) -> Self {
        Self {
            metric: metric.into(),
            role,
            period,
            points: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().map(|p| p.value)
    }
}

/// Summary statistics for one time series.
///
/// All fields are `None` when the source series is empty. `current` is the
/// value of the chronologically last point, not a max-timestamp search.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChartStatistics {
    pub min: Option<f64>,
    pub avg: Option<f64>,
    pub max: Option<f64>,
    pub current: Option<f64>,
}

/// Reduce a time series to min/avg/max/current.
///
/// The mean is computed over all point values at full precision; no
/// resampling or bucketing happens here.
pub fn calculate_statistics(series: &TimeSeries) -> ChartStatistics {
    if series.is_empty() {
        return ChartStatistics::default();
    }

    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut sum = 0.0;

    for value in series.values() {
        min = min.min(value);
        max = max.max(value);
        sum += value;
    }

    ChartStatistics {
        min: Some(min),
        avg: Some(sum / series.points.len() as f64),
        max: Some(max),
        current: series.points.last().map(|p| p.value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(values: &[f64]) -> TimeSeries {
        TimeSeries {
            metric: "bat".to_string(),
            role: Role::Repeater,
            period: Period::Day,
            points: values
                .iter()
                .enumerate()
                .map(|(i, &v)| DataPoint {
                    ts: 1_700_000_000 + i as i64 * 900,
                    value: v,
                })
                .collect(),
        }
    }

    #[test]
    fn test_empty_series_has_no_statistics() {
        let stats = calculate_statistics(&series(&[]));
        assert_eq!(stats, ChartStatistics::default());
    }

    #[test]
    fn test_single_point_statistics() {
        let stats = calculate_statistics(&series(&[4.08]));
        assert_eq!(stats.min, Some(4.08));
        assert_eq!(stats.avg, Some(4.08));
        assert_eq!(stats.max, Some(4.08));
        assert_eq!(stats.current, Some(4.08));
    }

    #[test]
    fn test_ascending_run_statistics() {
        let values: Vec<f64> = (0..10).map(f64::from).collect();
        let stats = calculate_statistics(&series(&values));
        assert_eq!(stats.min, Some(0.0));
        assert_eq!(stats.max, Some(9.0));
        assert_eq!(stats.avg, Some(4.5));
        assert_eq!(stats.current, Some(9.0));
    }

    #[test]
    fn test_current_is_last_point_not_extremum() {
        let stats = calculate_statistics(&series(&[5.0, 9.0, 2.0]));
        assert_eq!(stats.current, Some(2.0));
        assert_eq!(stats.max, Some(9.0));
        assert_eq!(stats.min, Some(2.0));
    }

    #[test]
    fn test_negative_values() {
        let stats = calculate_statistics(&series(&[-97.0, -95.0, -99.0]));
        assert_eq!(stats.min, Some(-99.0));
        assert_eq!(stats.max, Some(-95.0));
        assert_eq!(stats.avg, Some(-97.0));
        assert_eq!(stats.current, Some(-99.0));
    }
}
