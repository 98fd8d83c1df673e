//! `prisma-events`: mutation events for Prisma-style data layers.
//!
//! Listeners registered on an [`EventHub`] run after each create, update,
//! updateMany or upsert. With a broker configured, events also fan out over
//! MQTT so every process sharing the broker sees writes made by the others.

#![deny(missing_docs)]

mod hub;
mod interceptor;

pub use hub::{EmitReport, EventHub, ListenerHandle};
pub use interceptor::{split_emit_flag, EmitFlags, EMIT_FLAG};

/// Re-export everything from prisma-events-core at the crate root.
#[doc(inline)]
pub use prisma_events_core::*;

/// Broker transports and the publish/subscribe bridge.
pub use prisma_events_mqtt as mqtt;

/// Configuration, observability and health checks.
pub use prisma_events_shared as shared;

pub use prisma_events_shared::{EventsConfig, ObservabilitySystem};

/// Listener callbacks return `anyhow::Result<()>`.
pub use anyhow;
