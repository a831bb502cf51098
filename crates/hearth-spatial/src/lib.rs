//! `hearth-spatial` – in-memory indices over live anchors.
//!
//! # Modules
//!
//! - [`dedup`] – [`DeduplicationIndex`][dedup::DeduplicationIndex]: answers
//!   "is there already an anchor near this point, with this label and a
//!   similar surface orientation?" and owns the live
//!   [`AnchorEntry`][dedup::AnchorEntry] records.
//! - [`finder`] – [`AnchorFinder`][finder::AnchorFinder]: label-based lookup
//!   of live handles plus linear scans of the durable record store.

pub mod dedup;
pub mod finder;

pub use dedup::{AnchorEntry, DedupSettings, DeduplicationIndex, Persistence};
pub use finder::AnchorFinder;
