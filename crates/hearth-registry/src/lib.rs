//! `hearth-registry` – the anchor registry and its lifecycle.
//!
//! # Modules
//!
//! - [`registry`] – [`AnchorRegistry`][registry::AnchorRegistry]: the façade
//!   the detection and voice layers call (create-or-reuse, erase, reload,
//!   rename, label queries) and the per-frame [`tick`][registry::AnchorRegistry::tick].
//! - [`coordinator`] – [`AnchorLifecycleCoordinator`][coordinator::AnchorLifecycleCoordinator]:
//!   the per-creation state machine from platform instantiate to a durable
//!   record, plus the label priority rule.
//! - [`config`] – [`RegistryConfig`][config::RegistryConfig]: deduplication
//!   thresholds, fallback label and timeouts.
//! - [`events`] – [`AnchorEventBus`][events::AnchorEventBus]: broadcast of
//!   lifecycle transitions to the rendering layer.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: subscriber
//!   setup with optional OTLP span export.

pub mod config;
pub mod coordinator;
pub mod events;
pub mod registry;
pub mod telemetry;

pub use config::RegistryConfig;
pub use coordinator::{
    AnchorLifecycleCoordinator, CreationMetadata, CreationOutcome, CreationState, LabelSources,
    resolve_label,
};
pub use events::{AnchorEventBus, AnchorEventReceiver};
pub use registry::{AnchorRegistry, CreateOutcome, CreateRequest};
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
