//! Mesh-radio node monitor.
//!
//! meshmon periodically polls two classes of mesh-radio nodes ("companion"
//! and "repeater"), persists their telemetry, and reduces the raw readings
//! into the statistics that reports and charts consume. The crate is built
//! around three pieces where incorrect logic silently corrupts history or
//! causes operational trouble:
//!
//! - [`breaker`]: a circuit breaker with file-persisted state that gates
//!   whether a remote node is safe to poll.
//! - [`series`]: the time-series data model, including reconciliation of
//!   monotonically increasing hardware counters across device reboots.
//! - [`charts`]: multi-resolution min/avg/max/current rollups over the two
//!   node roles and a dynamically discovered telemetry metric set.
//!
//! Device transport, pixel rendering, and HTML templating live outside this
//! crate; the [`store::MetricStore`], [`collect::NodeClient`], and
//! [`charts::ChartRenderer`] traits mark those seams.

pub mod breaker;
pub mod catalog;
pub mod charts;
pub mod collect;
pub mod config;
pub mod report;
pub mod series;
pub mod store;
pub mod telemetry;
