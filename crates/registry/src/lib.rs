//! Geofence registry and transition pipeline.
//!
//! # Architecture
//!
//! ```text
//! caller ──► Registry (validate, mutate fence set) ──► CapabilityProvider
//!                                                            │
//!                                             push stream of RawTransition
//!                                                            ▼
//! listeners ◄── Dispatcher (normalize, coalesce, order) ◄── pump task
//! ```
//!
//! # Example
//!
//! ```ignore
//! use geofence_registry::{new_callback, GeofenceConfig, Registry};
//! use geofence_provider::SimulatedProvider;
//! use std::sync::Arc;
//!
//! let registry = Registry::new(Arc::new(SimulatedProvider::new()));
//! registry.initialize(GeofenceConfig::default()).await?;
//! registry.request_permission().await;
//! registry.add(Fence::new("home", 41.38, 2.17, 100.0)).await?;
//!
//! let sub = registry.subscribe(new_callback(|event| {
//!     println!("{} {}", event.kind, event.fence_id);
//! }))?;
//! ```

mod config;
mod fence_set;
mod permission;
mod registry;

pub use config::{ConfigError, GeofenceConfig};
pub use registry::Registry;

pub use geofence_dispatch::{new_callback, DispatchCounts, Subscription, TransitionCallback};
pub use geofence_model::{
    Fence, GeofenceError, PermissionState, Result, TransitionEvent, TransitionType,
    COUNT_UNSUPPORTED,
};
