//! Collection loop: polls a node and feeds the results downstream.
//!
//! One cycle per role runs to completion before the next; there is no
//! overlapping polling of the same node. The circuit breaker is
//! consulted before any contact and told about the outcome afterwards.
//! Device transport lives behind [`NodeClient`]; this module never
//! speaks the radio protocol itself.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::breaker::CircuitBreaker;
use crate::catalog::Role;
use crate::config::Config;
use crate::store::MetricStore;
use crate::telemetry::{extract_lpp, extract_telemetry_metrics};

/// One successful poll of a device.
#[derive(Debug, Clone)]
pub struct PollReading {
    /// Unix timestamp of the reading.
    pub ts: i64,
    /// Metric values keyed by firmware field name.
    pub values: BTreeMap<String, f64>,
    /// Raw telemetry payload (Cayenne LPP), when the device returned one.
    pub telemetry: Option<serde_json::Value>,
}

/// Device transport boundary. Implementations own the serial/TCP/BLE
/// session and produce one reading per call.
pub trait NodeClient {
    fn poll(&mut self) -> impl Future<Output = Result<PollReading>> + Send;
}

/// Reliability settings for one role's collection cycle.
#[derive(Debug, Clone, Copy)]
pub struct CycleConfig {
    pub role: Role,
    pub retry_attempts: u32,
    pub retry_backoff: Duration,
    pub max_failures: u32,
    pub cooldown: Duration,
}

impl CycleConfig {
    pub fn from_config(cfg: &Config, role: Role) -> Self {
        Self {
            role,
            retry_attempts: cfg.remote.retry_attempts,
            retry_backoff: cfg.remote.retry_backoff,
            max_failures: cfg.remote.max_failures,
            cooldown: cfg.remote.cooldown,
        }
    }
}

/// Result of one collection cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The breaker was open; the device was not contacted.
    Skipped { cooldown_remaining_secs: u64 },
    /// Samples were stored.
    Stored { metrics: usize },
    /// All attempts failed; the breaker recorded the failure.
    Failed { consecutive_failures: u32 },
}

/// Poll a device with bounded retries and a fixed backoff between
/// attempts. Returns the last error when every attempt fails.
async fn poll_with_retries<C: NodeClient>(
    client: &mut C,
    role: Role,
    attempts: u32,
    backoff: Duration,
) -> Result<PollReading> {
    let mut last_err = None;

    for attempt in 1..=attempts {
        match client.poll().await {
            Ok(reading) => {
                if attempt > 1 {
                    info!(%role, attempt, attempts, "poll succeeded after retry");
                }
                return Ok(reading);
            }
            Err(e) => {
                info!(%role, attempt, attempts, error = %e, "poll attempt failed");
                last_err = Some(e);
                if attempt < attempts {
                    debug!(%role, backoff_secs = backoff.as_secs(), "retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    Err(last_err.expect("at least one attempt"))
}

/// Run one collection cycle for a role.
///
/// Consults the breaker first; an open circuit means the device is not
/// contacted at all. A successful poll stores the reading (telemetry
/// payload flattened into `telemetry.*` metrics) and resets the breaker.
/// A failed poll feeds the breaker and resolves to
/// [`CycleOutcome::Failed`] rather than an error; poll failures are an
/// expected operational condition.
pub async fn run_cycle<C, S>(
    client: &mut C,
    store: &mut S,
    breaker: &CircuitBreaker,
    cfg: &CycleConfig,
) -> Result<CycleOutcome>
where
    C: NodeClient,
    S: MetricStore,
{
    if breaker.is_open() {
        let remaining = breaker.cooldown_remaining();
        info!(
            role = %cfg.role,
            cooldown_remaining_secs = remaining,
            "circuit open, skipping poll",
        );
        return Ok(CycleOutcome::Skipped {
            cooldown_remaining_secs: remaining,
        });
    }

    let reading =
        match poll_with_retries(client, cfg.role, cfg.retry_attempts, cfg.retry_backoff).await {
            Ok(reading) => reading,
            Err(e) => {
                warn!(role = %cfg.role, error = %e, "poll failed, recording failure");
                breaker.record_failure(cfg.max_failures, cfg.cooldown)?;
                return Ok(CycleOutcome::Failed {
                    consecutive_failures: breaker.snapshot().consecutive_failures,
                });
            }
        };

    breaker.record_success()?;

    let mut values = reading.values;
    if let Some(payload) = &reading.telemetry {
        if let Some(lpp) = extract_lpp(payload) {
            let lpp_value = serde_json::Value::Array(lpp.clone());
            values.extend(extract_telemetry_metrics(&lpp_value));
        }
    }

    let stored = values.len();
    store
        .insert_samples(cfg.role, reading.ts, &values)
        .context("storing poll reading")?;

    info!(role = %cfg.role, ts = reading.ts, metrics = stored, "stored poll reading");
    Ok(CycleOutcome::Stored { metrics: stored })
}

/// Drive collection cycles for one role at its configured step until
/// cancelled. Cycle errors (state or store I/O) abort the loop; poll
/// failures do not.
pub async fn run_loop<C, S>(
    client: &mut C,
    store: &mut S,
    breaker: &CircuitBreaker,
    cfg: &CycleConfig,
    step: Duration,
    cancel: CancellationToken,
) -> Result<()>
where
    C: NodeClient,
    S: MetricStore,
{
    let mut interval = tokio::time::interval(step);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!(role = %cfg.role, step_secs = step.as_secs(), "collection loop started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(role = %cfg.role, "collection loop stopped");
                return Ok(());
            }
            _ = interval.tick() => {
                run_cycle(client, store, breaker, cfg).await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    /// Scripted client: pops one result per poll.
    struct ScriptedClient {
        script: Vec<Result<PollReading>>,
        polls: usize,
    }

    impl ScriptedClient {
        fn new(mut script: Vec<Result<PollReading>>) -> Self {
            script.reverse();
            Self { script, polls: 0 }
        }
    }

    impl NodeClient for ScriptedClient {
        async fn poll(&mut self) -> Result<PollReading> {
            self.polls += 1;
            self.script.pop().expect("script exhausted")
        }
    }

    fn reading(ts: i64) -> PollReading {
        PollReading {
            ts,
            values: [("bat".to_string(), 4100.0)].into(),
            telemetry: None,
        }
    }

    fn cycle_config(dir: &tempfile::TempDir) -> (CircuitBreaker, CycleConfig) {
        let breaker = CircuitBreaker::new(dir.path().join("circuit.json"));
        let cfg = CycleConfig {
            role: Role::Repeater,
            retry_attempts: 2,
            retry_backoff: Duration::ZERO,
            max_failures: 3,
            cooldown: Duration::from_secs(3600),
        };
        (breaker, cfg)
    }

    #[tokio::test]
    async fn test_successful_cycle_stores_and_resets_breaker() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (breaker, cfg) = cycle_config(&dir);
        let mut store = MemoryStore::new();
        let mut client = ScriptedClient::new(vec![Ok(reading(1_700_000_000))]);

        let outcome = run_cycle(&mut client, &mut store, &breaker, &cfg)
            .await
            .expect("cycle");

        assert_eq!(outcome, CycleOutcome::Stored { metrics: 1 });
        assert_eq!(store.observation_count(), 1);
        assert!(breaker.snapshot().last_success > 0);
    }

    #[tokio::test]
    async fn test_telemetry_payload_is_flattened_into_metrics() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (breaker, cfg) = cycle_config(&dir);
        let mut store = MemoryStore::new();

        let mut poll = reading(1_700_000_000);
        poll.telemetry = Some(json!({
            "lpp": [{"type": "temperature", "channel": 1, "value": 21.5}]
        }));
        let mut client = ScriptedClient::new(vec![Ok(poll)]);

        let outcome = run_cycle(&mut client, &mut store, &breaker, &cfg)
            .await
            .expect("cycle");

        assert_eq!(outcome, CycleOutcome::Stored { metrics: 2 });
        let names = store.available_metrics(Role::Repeater).expect("enumerate");
        assert!(names.contains(&"telemetry.temperature.1".to_string()));
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (breaker, cfg) = cycle_config(&dir);
        let mut store = MemoryStore::new();
        let mut client = ScriptedClient::new(vec![
            Err(anyhow::anyhow!("timeout")),
            Ok(reading(1_700_000_000)),
        ]);

        let outcome = run_cycle(&mut client, &mut store, &breaker, &cfg)
            .await
            .expect("cycle");

        assert_eq!(outcome, CycleOutcome::Stored { metrics: 1 });
        assert_eq!(client.polls, 2);
        assert_eq!(breaker.snapshot().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_exhausted_retries_feed_the_breaker() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (breaker, cfg) = cycle_config(&dir);
        let mut store = MemoryStore::new();
        let mut client = ScriptedClient::new(vec![
            Err(anyhow::anyhow!("timeout")),
            Err(anyhow::anyhow!("timeout")),
        ]);

        let outcome = run_cycle(&mut client, &mut store, &breaker, &cfg)
            .await
            .expect("cycle");

        assert_eq!(
            outcome,
            CycleOutcome::Failed {
                consecutive_failures: 1
            }
        );
        assert_eq!(client.polls, 2);
        assert_eq!(store.observation_count(), 0);
    }

    #[tokio::test]
    async fn test_open_breaker_skips_device_contact() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (breaker, cfg) = cycle_config(&dir);
        let mut store = MemoryStore::new();

        // Trip the breaker: max_failures is 3.
        for _ in 0..3 {
            breaker
                .record_failure(cfg.max_failures, cfg.cooldown)
                .expect("save");
        }

        let mut client = ScriptedClient::new(vec![]);
        let outcome = run_cycle(&mut client, &mut store, &breaker, &cfg)
            .await
            .expect("cycle");

        assert!(matches!(outcome, CycleOutcome::Skipped { .. }));
        assert_eq!(client.polls, 0);
    }

    #[tokio::test]
    async fn test_failures_accumulate_until_circuit_opens() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (breaker, mut cfg) = cycle_config(&dir);
        cfg.retry_attempts = 1;
        let mut store = MemoryStore::new();

        for expected in 1..=3u32 {
            let mut client = ScriptedClient::new(vec![Err(anyhow::anyhow!("down"))]);
            let outcome = run_cycle(&mut client, &mut store, &breaker, &cfg)
                .await
                .expect("cycle");
            assert_eq!(
                outcome,
                CycleOutcome::Failed {
                    consecutive_failures: expected
                }
            );
        }

        assert!(breaker.is_open());
    }
}
