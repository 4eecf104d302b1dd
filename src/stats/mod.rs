//! Per-session statistics
//!
//! Counters are owned by the provider session task; a [`SessionStatistics`]
//! copy is pushed to consumers as a `status` event on every stats tick.

pub mod metrics;

pub use metrics::{RateWindow, SessionCounters, SessionStatistics};
