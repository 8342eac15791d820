//! Canonical default values shared by the scheduler, the loader and the CLI.

/// How often a gate-pending instance re-checks its precondition.
pub const DEFAULT_POKE_INTERVAL_SECS: u64 = 5 * 60;
/// Longest single sleep while waiting for source quiescence.
pub const QUIESCENCE_SLICE_SECS: u64 = 5;
pub const DEFAULT_SCHEMA_SUFFIX: &str = "_next";
pub const DEFAULT_REGISTRY_URL: &str = "sqlite:weir_runs.sqlite";
pub const FULL_REFRESH_JOB_SUFFIX: &str = "_Periodic_Full_Refresh";
pub const INCREMENTAL_JOB_SUFFIX: &str = "_Intraperiod_Incremental";
pub const CANCELLED_MESSAGE: &str = "Cancelled by user";
