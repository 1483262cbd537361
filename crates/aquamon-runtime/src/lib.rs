//! `aquamon-runtime` – process-level wiring for the monitoring core.
//!
//! # Modules
//!
//! - [`pipeline`] – [`MonitorPipeline`]: the [`TelemetrySink`](aquamon_ingest::TelemetrySink)
//!   that forwards every new reading to the map adapter and the alert
//!   notifier, and follows host lifecycle changes.
//! - [`telemetry`] – [`init_tracing`](telemetry::init_tracing): `tracing`
//!   subscriber with optional OTLP span export.

pub mod pipeline;
pub mod telemetry;

pub use pipeline::MonitorPipeline;
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
