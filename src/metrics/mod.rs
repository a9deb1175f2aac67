//! Metrics for connection lifecycle and authentication
//!
//! Recorded through the `metrics` facade; nothing is exported unless the
//! embedding application installs a recorder.

pub mod counters;
pub mod histograms;
pub mod labels;
