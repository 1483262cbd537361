//! `aquamon-map` – the MapBridgeAdapter.
//!
//! Sits between the pipeline and the [`MessageBridge`](aquamon_bridge::MessageBridge):
//! renders readings and locations as surface commands, and turns validated
//! surface interactions into domain events on the
//! [`EventBus`](aquamon_bridge::EventBus).

pub mod adapter;

pub use adapter::{MAX_ZOOM, MapBridgeAdapter};
