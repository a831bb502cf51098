//! `hearth-platform` – the spatial-anchoring service seam.
//!
//! # Modules
//!
//! - [`platform`] – [`AnchorPlatform`][platform::AnchorPlatform]: the
//!   collaborator contract (instantiate, resolve, save, erase, destroy) and
//!   the one-shot [`Completion`][platform::Completion] type its deferred
//!   results arrive through.
//! - [`sim`] – [`SimulatedPlatform`][sim::SimulatedPlatform]: an in-process
//!   stand-in with tick-driven readiness and failure injection, for tests and
//!   headless runs.

pub mod platform;
pub mod sim;

pub use platform::{
    AnchorPlatform, Completer, Completion, Instantiation, PlatformError, Realized, completed,
    completion, poll_completion,
};
pub use sim::SimulatedPlatform;
