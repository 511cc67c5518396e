//! Metric catalog: the single source of truth for metric semantics.
//!
//! Metric names are the firmware field names as reported by the devices
//! (e.g. `bat`, `nb_recv`, `battery_mv`). The catalog records whether a
//! metric is a gauge or a monotonic counter, how to scale it for charts,
//! and which metrics each node role displays. Telemetry channels are not
//! part of the fixed set; they are classified by key shape and filtered
//! through an explicit allow-list of chart-worthy kinds.

pub mod battery;

use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use serde::{Deserialize, Serialize};

/// Monitored node class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Companion,
    Repeater,
}

impl Role {
    pub const ALL: [Role; 2] = [Role::Companion, Role::Repeater];

    /// Returns the canonical string representation for storage/paths.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Companion => "companion",
            Self::Repeater => "repeater",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "companion" => Ok(Self::Companion),
            "repeater" => Ok(Self::Repeater),
            other => bail!("unknown role: {other:?}"),
        }
    }
}

/// Report/chart time resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Day,
    Week,
    Month,
    Year,
}

impl Period {
    pub const ALL: [Period; 4] = [Period::Day, Period::Week, Period::Month, Period::Year];

    /// Returns the canonical string representation for storage/paths.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Year => "year",
        }
    }

    /// How far back this period looks, in seconds.
    pub const fn lookback_secs(self) -> i64 {
        match self {
            Self::Day => 86_400,
            Self::Week => 7 * 86_400,
            Self::Month => 31 * 86_400,
            Self::Year => 365 * 86_400,
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a metric reports an instantaneous value or a cumulative count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Gauge,
    Counter,
}

/// Display and scaling properties of a known base metric.
#[derive(Debug, Clone, Copy)]
pub struct MetricSpec {
    /// Human-readable label for charts/reports.
    pub label: &'static str,
    /// Display unit (e.g. "V", "dBm", "/min").
    pub unit: &'static str,
    pub kind: MetricKind,
    /// Multiply raw values by this for charts (e.g. 60 for per-minute rates).
    pub scale: f64,
    /// Raw value is millivolts and displays as volts.
    pub millivolts: bool,
}

const fn gauge(label: &'static str, unit: &'static str) -> MetricSpec {
    MetricSpec {
        label,
        unit,
        kind: MetricKind::Gauge,
        scale: 1.0,
        millivolts: false,
    }
}

const fn counter_per_min(label: &'static str, unit: &'static str) -> MetricSpec {
    MetricSpec {
        label,
        unit,
        kind: MetricKind::Counter,
        scale: 60.0,
        millivolts: false,
    }
}

/// Look up the spec for a base metric by firmware field name.
pub fn metric_spec(name: &str) -> Option<MetricSpec> {
    let spec = match name {
        // Companion metrics.
        "battery_mv" => MetricSpec {
            millivolts: true,
            ..gauge("Battery Voltage", "V")
        },
        "uptime_secs" => MetricSpec {
            scale: 1.0 / 86_400.0,
            ..gauge("System Uptime", "days")
        },
        "contacts" => gauge("Known Contacts", ""),
        "recv" => counter_per_min("Total Packets Received", "/min"),
        "sent" => counter_per_min("Total Packets Sent", "/min"),

        // Repeater metrics.
        "bat" => MetricSpec {
            millivolts: true,
            ..gauge("Battery Voltage", "V")
        },
        "uptime" => MetricSpec {
            scale: 1.0 / 86_400.0,
            ..gauge("System Uptime", "days")
        },
        "last_rssi" => gauge("Signal Strength (RSSI)", "dBm"),
        "last_snr" => gauge("Signal-to-Noise Ratio", "dB"),
        "noise_floor" => gauge("RF Noise Floor", "dBm"),
        "tx_queue_len" => gauge("Transmit Queue Depth", ""),
        "nb_recv" => counter_per_min("Total Packets Received", "/min"),
        "nb_sent" => counter_per_min("Total Packets Sent", "/min"),
        "airtime" => counter_per_min("Transmit Airtime", "s/min"),
        "rx_airtime" => counter_per_min("Receive Airtime", "s/min"),
        "flood_dups" => counter_per_min("Flood Duplicates Dropped", "/min"),
        "direct_dups" => counter_per_min("Direct Duplicates Dropped", "/min"),
        "sent_flood" => counter_per_min("Flood Packets Sent", "/min"),
        "recv_flood" => counter_per_min("Flood Packets Received", "/min"),
        "sent_direct" => counter_per_min("Direct Packets Sent", "/min"),
        "recv_direct" => counter_per_min("Direct Packets Received", "/min"),

        // Derived from battery voltage at query time, never stored.
        "bat_pct" => gauge("Charge Level", "%"),

        _ => return None,
    };
    Some(spec)
}

/// Raw battery-voltage metric (millivolts) for a role; the source for
/// the derived `bat_pct` series.
pub const fn battery_field(role: Role) -> &'static str {
    match role {
        Role::Companion => "battery_mv",
        Role::Repeater => "bat",
    }
}

/// Whether a metric accumulates monotonically (and resets on reboot).
pub fn is_counter_metric(name: &str) -> bool {
    matches!(metric_spec(name), Some(spec) if spec.kind == MetricKind::Counter)
}

/// Chart scale factor for a metric (1.0 when unknown).
pub fn chart_scale(name: &str) -> f64 {
    metric_spec(name).map_or(1.0, |spec| spec.scale)
}

/// Apply any configured raw-value transform (millivolts to volts).
pub fn transform_value(name: &str, value: f64) -> f64 {
    match metric_spec(name) {
        Some(spec) if spec.millivolts => value / 1000.0,
        _ => value,
    }
}

/// Base metrics charted for a companion node, in display order.
pub const COMPANION_CHART_METRICS: &[&str] = &[
    "battery_mv",
    "bat_pct",
    "uptime_secs",
    "contacts",
    "recv",
    "sent",
];

/// Base metrics charted for a repeater node, in display order.
pub const REPEATER_CHART_METRICS: &[&str] = &[
    "bat",
    "bat_pct",
    "last_rssi",
    "last_snr",
    "noise_floor",
    "uptime",
    "tx_queue_len",
    "nb_recv",
    "nb_sent",
    "airtime",
    "rx_airtime",
    "flood_dups",
    "direct_dups",
    "sent_flood",
    "recv_flood",
    "sent_direct",
    "recv_direct",
];

/// Reserved namespace for dynamically discovered telemetry channels.
pub const TELEMETRY_PREFIX: &str = "telemetry.";

/// Sensor kind of a telemetry channel, parsed from the metric key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryKind {
    Temperature,
    Humidity,
    Voltage,
    Gps,
    Other,
}

impl TelemetryKind {
    fn from_segment(segment: &str) -> Self {
        match segment {
            "temperature" => Self::Temperature,
            "humidity" => Self::Humidity,
            "voltage" => Self::Voltage,
            "gps" => Self::Gps,
            _ => Self::Other,
        }
    }

    /// Whether this kind renders through the generic numeric-chart path.
    ///
    /// Voltage needs battery-specific axes and GPS coordinates are not
    /// numeric charts at all, so only plain environmental sensors qualify.
    pub const fn chartable(self) -> bool {
        matches!(self, Self::Temperature | Self::Humidity)
    }
}

/// Classification of a metric name, computed once per discovery pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricClass {
    /// A fixed base metric (or unknown non-telemetry name).
    Base,
    /// A `telemetry.{type}.{channel}[...]` channel.
    Telemetry { kind: TelemetryKind },
}

/// Classify a metric name as base or telemetry.
pub fn classify(name: &str) -> MetricClass {
    match name.strip_prefix(TELEMETRY_PREFIX) {
        Some(rest) => {
            let segment = rest.split('.').next().unwrap_or("");
            MetricClass::Telemetry {
                kind: TelemetryKind::from_segment(segment),
            }
        }
        None => MetricClass::Base,
    }
}

/// Whether a metric name lives in the reserved telemetry namespace.
pub fn is_telemetry_metric(name: &str) -> bool {
    name.starts_with(TELEMETRY_PREFIX)
}

/// Select the telemetry metrics worth charting from the available set.
///
/// Output is sorted so discovery order is deterministic across runs.
pub fn discover_telemetry_chart_metrics(available: &[String]) -> Vec<String> {
    let mut discovered: Vec<String> = available
        .iter()
        .filter(|name| matches!(classify(name), MetricClass::Telemetry { kind } if kind.chartable()))
        .cloned()
        .collect();
    discovered.sort();
    discovered
}

/// Full chart metric list for a role.
///
/// Base metrics always chart. Discovered telemetry channels are appended
/// only for repeaters and only while `telemetry_enabled` is set; the flag
/// is passed per call so flipping it takes effect without a restart.
pub fn chart_metrics(role: Role, available: &[String], telemetry_enabled: bool) -> Vec<String> {
    let base: Vec<String> = match role {
        Role::Companion => COMPANION_CHART_METRICS,
        Role::Repeater => REPEATER_CHART_METRICS,
    }
    .iter()
    .map(|m| m.to_string())
    .collect();

    if role != Role::Repeater || !telemetry_enabled {
        return base;
    }

    let mut metrics = base;
    metrics.extend(discover_telemetry_chart_metrics(available));
    metrics
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_role_round_trip() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().expect("parses"), role);
        }
        assert!("gateway".parse::<Role>().is_err());
    }

    #[test]
    fn test_counter_classification() {
        assert!(is_counter_metric("nb_recv"));
        assert!(is_counter_metric("airtime"));
        assert!(!is_counter_metric("bat"));
        assert!(!is_counter_metric("nonexistent"));
    }

    #[test]
    fn test_transform_millivolts() {
        assert_eq!(transform_value("bat", 4080.0), 4.08);
        assert_eq!(transform_value("battery_mv", 3700.0), 3.7);
        assert_eq!(transform_value("last_rssi", -97.0), -97.0);
    }

    #[test]
    fn test_chart_scale() {
        assert_eq!(chart_scale("nb_recv"), 60.0);
        assert_eq!(chart_scale("uptime"), 1.0 / 86_400.0);
        assert_eq!(chart_scale("unknown"), 1.0);
    }

    #[test]
    fn test_classify_metric_names() {
        assert_eq!(classify("bat"), MetricClass::Base);
        assert_eq!(
            classify("telemetry.temperature.1"),
            MetricClass::Telemetry {
                kind: TelemetryKind::Temperature
            }
        );
        assert_eq!(
            classify("telemetry.gps.0.latitude"),
            MetricClass::Telemetry {
                kind: TelemetryKind::Gps
            }
        );
        assert_eq!(
            classify("telemetry.pressure.2"),
            MetricClass::Telemetry {
                kind: TelemetryKind::Other
            }
        );
    }

    #[test]
    fn test_discovery_excludes_voltage_and_gps() {
        let discovered = discover_telemetry_chart_metrics(&names(&[
            "telemetry.temperature.1",
            "telemetry.voltage.1",
            "telemetry.humidity.1",
            "telemetry.gps.0.latitude",
        ]));
        assert_eq!(
            discovered,
            names(&["telemetry.humidity.1", "telemetry.temperature.1"])
        );
    }

    #[test]
    fn test_discovery_is_deterministic() {
        let discovered = discover_telemetry_chart_metrics(&names(&[
            "telemetry.temperature.2",
            "telemetry.humidity.1",
            "telemetry.temperature.1",
        ]));
        assert_eq!(
            discovered,
            names(&[
                "telemetry.humidity.1",
                "telemetry.temperature.1",
                "telemetry.temperature.2",
            ])
        );
    }

    #[test]
    fn test_repeater_includes_telemetry_when_enabled() {
        let available = names(&[
            "bat",
            "telemetry.temperature.1",
            "telemetry.humidity.1",
            "telemetry.voltage.1",
        ]);

        let metrics = chart_metrics(Role::Repeater, &available, true);

        assert!(metrics.contains(&"telemetry.temperature.1".to_string()));
        assert!(metrics.contains(&"telemetry.humidity.1".to_string()));
        assert!(!metrics.contains(&"telemetry.voltage.1".to_string()));
    }

    #[test]
    fn test_repeater_excludes_telemetry_when_disabled() {
        let available = names(&["telemetry.temperature.1", "telemetry.humidity.1"]);

        let metrics = chart_metrics(Role::Repeater, &available, false);

        assert!(!metrics.iter().any(|m| is_telemetry_metric(m)));
    }

    #[test]
    fn test_companion_never_includes_telemetry() {
        let metrics =
            chart_metrics(Role::Companion, &names(&["telemetry.temperature.1"]), true);
        assert_eq!(metrics, names(COMPANION_CHART_METRICS));
    }
}
