//! Transition dispatch for the geofence registry.
//!
//! Raw host reports flow through a fixed pipeline:
//!
//! ```text
//! RawTransition ─► normalize (one event per fence) ─► coalesce ─► presence check ─► fan-out
//! ```
//!
//! Fan-out is sequential and in subscription order. Every listener sees
//! event N before any listener sees event N+1, and a panicking listener
//! only loses its own delivery.

mod coalesce;
mod dispatcher;
mod listener;
mod presence;
mod pump;
mod stats;

pub use coalesce::Coalescer;
pub use dispatcher::Dispatcher;
pub use listener::{new_callback, Subscription, TransitionCallback};
pub use presence::{Presence, PresenceAnomaly, PresenceTracker};
pub use pump::{spawn_pump, PumpHandle};
pub use stats::{DispatchCounts, DispatchStats};
