//! # Meridian Common
//!
//! Shared data types, financial math, errors and the event protocol for the
//! Meridian perpetual-futures core. This crate is a leaf: every other crate
//! in the workspace depends on it.

pub mod errors;
pub mod events;
pub mod math;
pub mod types;

pub use errors::MeridianError;
pub use events::Event;
pub use types::*;
