//! Scheduling core: when may an instance of a job cadence run?
//!
//! - [`ScheduleAligner`] derives the paired full-refresh / incremental cadences.
//! - [`DependencyGate`] decides whether one instance may start, by querying
//!   a [`RunRegistry`].
//! - [`GatePoller`] re-evaluates a gate on a timer until it passes.

pub mod aligner;
pub mod cadence;
pub mod cancel;
pub mod gate;
pub mod poller;
pub mod registry;

pub use aligner::{AlignedSchedule, ScheduleAligner, ScheduleError};
pub use cadence::{Cadence, CadenceSchedule};
pub use cancel::{sleep_unless_cancelled, CancellationToken};
pub use gate::{DependencyGate, GateDecision};
pub use poller::{GateError, GatePoller};
pub use registry::{
    InstanceQuery, MemoryRunRegistry, RegistryError, RunRegistry, SqliteRunRegistry,
    TimestampPredicate,
};
