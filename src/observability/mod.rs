//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! dispatch (outcome, error kind, latency)  ─┐
//! routing  (cache hit/miss, table size)    ─┼─→ metrics.rs → Prometheus exporter
//! http     (request span with request_id)  ─┘
//!
//! every subsystem → tracing events → logging.rs (pretty or JSON to stdout)
//! ```
//!
//! # Design Decisions
//! - Failures are logged once, at the dispatcher boundary
//! - Recording a metric without an installed exporter is a no-op, so the
//!   core and its tests never need the exporter

pub mod logging;
pub mod metrics;
