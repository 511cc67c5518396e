//! Metric store boundary.
//!
//! The collector writes raw samples through [`MetricStore`] and the
//! aggregation layers read them back by closed time range. The real
//! deployment backs this with a time-series database; [`MemoryStore`]
//! is the in-process implementation used for tests and for working from
//! JSON snapshot files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::catalog::{battery, battery_field, Role};
use crate::series::Sample;

/// Errors from snapshot file handling.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("reading store snapshot {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("writing store snapshot {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing store snapshot {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Read/write access to persisted metric samples.
///
/// `metrics_for_period` returns, per metric name, samples within the
/// closed range `[start_ts, end_ts]` in ascending timestamp order, plus
/// the derived `bat_pct` series when the role's battery-voltage metric
/// has data in the range (implementations apply
/// [`derive_battery_percentage`] before returning).
/// `available_metrics` enumerates every stored metric name for a role;
/// chart discovery uses it to find telemetry channels, and derived
/// metrics do not appear in it.
pub trait MetricStore {
    fn insert_samples(&mut self, role: Role, ts: i64, values: &BTreeMap<String, f64>)
        -> Result<()>;

    fn metrics_for_period(
        &self,
        role: Role,
        start_ts: i64,
        end_ts: i64,
    ) -> Result<BTreeMap<String, Vec<Sample>>>;

    fn available_metrics(&self, role: Role) -> Result<Vec<String>>;
}

/// Derive the `bat_pct` series from the role's raw battery-voltage
/// samples (millivolts). Replaces any existing `bat_pct` entry so the
/// derivation stays the single source of truth.
pub fn derive_battery_percentage(role: Role, metrics: &mut BTreeMap<String, Vec<Sample>>) {
    let Some(raw) = metrics.get(battery_field(role)) else {
        return;
    };

    let derived: Vec<Sample> = raw
        .iter()
        .map(|s| Sample::new(s.ts, battery::voltage_to_percentage(s.value / 1000.0)))
        .collect();

    if !derived.is_empty() {
        metrics.insert("bat_pct".to_string(), derived);
    }
}

/// In-memory metric store with optional JSON snapshot persistence.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct MemoryStore {
    /// role -> metric -> ts -> value. BTreeMaps keep range queries
    /// ordered without re-sorting.
    data: BTreeMap<Role, BTreeMap<String, BTreeMap<i64, f64>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a store from a JSON snapshot file.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let data = std::fs::read_to_string(path).map_err(|source| StoreError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let store: Self = serde_json::from_str(&data).map_err(|source| StoreError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        info!(
            path = %path.display(),
            observations = store.observation_count(),
            "loaded metric store snapshot",
        );
        Ok(store)
    }

    /// Write the store to a JSON snapshot file.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let data = serde_json::to_string_pretty(self).expect("store serializes");
        std::fs::write(path, data).map_err(|source| StoreError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Total number of stored samples across all roles and metrics.
    pub fn observation_count(&self) -> usize {
        self.data
            .values()
            .flat_map(|metrics| metrics.values())
            .map(BTreeMap::len)
            .sum()
    }
}

impl MetricStore for MemoryStore {
    fn insert_samples(
        &mut self,
        role: Role,
        ts: i64,
        values: &BTreeMap<String, f64>,
    ) -> Result<()> {
        let metrics = self.data.entry(role).or_default();
        for (metric, &value) in values {
            metrics.entry(metric.clone()).or_default().insert(ts, value);
        }
        Ok(())
    }

    fn metrics_for_period(
        &self,
        role: Role,
        start_ts: i64,
        end_ts: i64,
    ) -> Result<BTreeMap<String, Vec<Sample>>> {
        let mut out = BTreeMap::new();

        let Some(metrics) = self.data.get(&role) else {
            return Ok(out);
        };

        for (metric, samples) in metrics {
            let in_range: Vec<Sample> = samples
                .range(start_ts..=end_ts)
                .map(|(&ts, &value)| Sample::new(ts, value))
                .collect();
            if !in_range.is_empty() {
                out.insert(metric.clone(), in_range);
            }
        }

        derive_battery_percentage(role, &mut out);
        Ok(out)
    }

    fn available_metrics(&self, role: Role) -> Result<Vec<String>> {
        let names = self
            .data
            .get(&role)
            .map(|metrics| {
                metrics
                    .iter()
                    .filter(|(_, samples)| !samples.is_empty())
                    .map(|(name, _)| name.clone())
                    .collect()
            })
            .unwrap_or_default();
        Ok(names)
    }
}
