//! Circuit breaker for remote node polling.
//!
//! A mesh-radio device that is offline or misbehaving must stop being
//! hammered by the poller. The breaker converts the collection loop's
//! success/failure stream into a binary "try now / don't try" decision
//! with a bounded cooldown, and persists its state so the decision
//! survives process restarts.
//!
//! The state file is the single source of truth: it is re-read on every
//! accessor call rather than cached, so a crash loses no committed
//! history and two sequential processes never observe stale state. A
//! missing or unparsable file is a fresh node, never an error.

use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Persisted breaker state, one record per monitored node class.
///
/// Invariant: `cooldown_until == 0` whenever `consecutive_failures == 0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitState {
    /// Failures since the last success.
    #[serde(default)]
    pub consecutive_failures: u32,
    /// Unix timestamp until which the circuit is open (0 = no cooldown).
    #[serde(default)]
    pub cooldown_until: u64,
    /// Unix timestamp of the last successful poll (0 = never).
    #[serde(default)]
    pub last_success: u64,
}

/// Breaker state plus derived fields, for status output.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CircuitSnapshot {
    pub consecutive_failures: u32,
    pub cooldown_until: u64,
    pub last_success: u64,
    pub is_open: bool,
    pub cooldown_remaining_secs: u64,
}

/// File-persisted circuit breaker bound to one state key.
///
/// Two breakers bound to the same path observe each other's writes
/// (last-writer-wins on the whole record; a single collector process per
/// key is assumed).
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    state_file: PathBuf,
}

impl CircuitBreaker {
    /// Bind a breaker to a state-file path. No I/O happens until the
    /// first accessor call.
    pub fn new(state_file: impl Into<PathBuf>) -> Self {
        Self {
            state_file: state_file.into(),
        }
    }

    /// Whether the circuit is open (in cooldown). No side effects.
    pub fn is_open(&self) -> bool {
        now_unix() < self.load().cooldown_until
    }

    /// Seconds remaining in the cooldown, or 0 when closed.
    pub fn cooldown_remaining(&self) -> u64 {
        self.load().cooldown_until.saturating_sub(now_unix())
    }

    /// Record a successful poll: failures and cooldown reset, last
    /// success stamped. Persists synchronously before returning.
    pub fn record_success(&self) -> Result<()> {
        let state = CircuitState {
            consecutive_failures: 0,
            cooldown_until: 0,
            last_success: now_unix(),
        };
        self.save(&state)
    }

    /// Record a failed poll and potentially open the circuit.
    ///
    /// Increments the failure count; once it reaches `max_failures` the
    /// cooldown window is set (or pushed forward on repeated failures).
    /// Persists synchronously before returning.
    pub fn record_failure(&self, max_failures: u32, cooldown: Duration) -> Result<()> {
        let mut state = self.load();
        state.consecutive_failures += 1;

        if state.consecutive_failures >= max_failures {
            state.cooldown_until = now_unix() + cooldown.as_secs();
            warn!(
                state_file = %self.state_file.display(),
                consecutive_failures = state.consecutive_failures,
                cooldown_secs = cooldown.as_secs(),
                "circuit breaker opened",
            );
        }

        self.save(&state)
    }

    /// Current state plus derived open/remaining fields.
    pub fn snapshot(&self) -> CircuitSnapshot {
        let state = self.load();
        CircuitSnapshot {
            consecutive_failures: state.consecutive_failures,
            cooldown_until: state.cooldown_until,
            last_success: state.last_success,
            is_open: now_unix() < state.cooldown_until,
            cooldown_remaining_secs: state.cooldown_until.saturating_sub(now_unix()),
        }
    }

    /// Load state fresh from the file. Missing or corrupt state is a
    /// fresh node: logged and substituted with defaults, never an error.
    fn load(&self) -> CircuitState {
        let data = match std::fs::read_to_string(&self.state_file) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return CircuitState::default();
            }
            Err(e) => {
                warn!(
                    state_file = %self.state_file.display(),
                    error = %e,
                    "failed to read circuit breaker state, assuming fresh",
                );
                return CircuitState::default();
            }
        };

        match serde_json::from_str(&data) {
            Ok(state) => state,
            Err(e) => {
                warn!(
                    state_file = %self.state_file.display(),
                    error = %e,
                    "failed to parse circuit breaker state, assuming fresh",
                );
                CircuitState::default()
            }
        }
    }

    fn save(&self, state: &CircuitState) -> Result<()> {
        if let Some(parent) = self.state_file.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating state directory {}", parent.display()))?;
        }

        let data = serde_json::to_string_pretty(state).context("serializing circuit state")?;
        std::fs::write(&self.state_file, data)
            .with_context(|| format!("writing {}", self.state_file.display()))?;

        debug!(
            state_file = %self.state_file.display(),
            consecutive_failures = state.consecutive_failures,
            cooldown_until = state.cooldown_until,
            "circuit breaker state saved",
        );
        Ok(())
    }
}

/// Current wall-clock time as whole unix seconds.
fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}
