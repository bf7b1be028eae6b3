//! Facility booking core: rooms, contractor and guest visits, and weekend
//! caretakers, with recurring-series expansion and double-booking checks.

pub mod compactor;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod recurrence;
pub mod store;
pub mod wal;
pub mod wire;
