//! Shared performance workloads used by benches and the CLI runner.
//!
//! Centralizing the workloads here keeps Criterion benches and the `tidal run`
//! reporter in sync so the same scenario is measured everywhere.

pub mod scenarios;
pub mod units;
