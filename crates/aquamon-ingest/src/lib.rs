//! `aquamon-ingest` – the TelemetryIngestor.
//!
//! Turns the realtime push channel and the paged REST backend into a single
//! deduplicated stream of canonical [`SensorReading`](aquamon_types::SensorReading)s.
//!
//! # Modules
//!
//! - [`normalize`] – lenient payload → `SensorReading` / `LocationRecord`.
//! - [`dedup`] – bounded [`DedupSet`] of forwarded reading keys.
//! - [`locations`] – [`LocationCache`] replaced wholesale on refresh.
//! - [`pull`] – [`PullClient`] trait and the `reqwest` [`HttpPullClient`].
//! - [`push`] – [`PushSource`] trait and the WebSocket [`WsPushSource`].
//! - [`ingestor`] – [`TelemetryIngestor`] main loop with backoff and
//!   reconciliation, feeding [`TelemetrySink`]s.

pub mod dedup;
pub mod ingestor;
pub mod locations;
pub mod normalize;
pub mod pull;
pub mod push;

pub use dedup::DedupSet;
pub use ingestor::{
    BatchSummary, IngestConfig, IngestStats, TelemetryIngestor, TelemetrySink, backoff_delay,
};
pub use locations::LocationCache;
pub use pull::{HttpPullClient, PageRequest, PullClient, RawPage};
pub use push::{PushEvents, PushFrame, PushSource, WsPushSource};
