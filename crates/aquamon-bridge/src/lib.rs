//! `aquamon-bridge` – transport between the host and the map surface.
//!
//! Routes asynchronous data between the pipeline, the embedded rendering
//! surface, and the host application without caring about its meaning.
//!
//! # Modules
//!
//! - [`bridge`] – [`MessageBridge`]: typed, ordered, fire-and-forget envelope
//!   transport with ready-buffering.
//! - [`bus`] – [`EventBus`]: topic-based publish/subscribe bus for domain
//!   events, built on Tokio broadcast channels.
//! - [`surface`] – [`SurfaceServer`]: WebSocket endpoint the rendering
//!   surface attaches to.

pub mod bridge;
pub mod bus;
pub mod surface;

pub use bridge::{MessageBridge, RenderTarget, SendOutcome, SurfaceLink};
pub use bus::{EventBus, Topic, TopicReceiver};
pub use surface::SurfaceServer;
