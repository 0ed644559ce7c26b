//! In-memory stores for the sensor hub
//!
//! Each store keeps its records in a [`dashmap::DashMap`] and implements the
//! matching interface from `hub-core` or `hub-rules`. They back the server
//! binary when no external persistence is configured, and the test suites.

mod measurements;
mod rules;
mod sensors;
mod sequences;

pub use measurements::MemoryMeasurementStore;
pub use rules::MemoryRuleStore;
pub use sensors::MemorySensorStore;
pub use sequences::MemorySequenceStore;
