//! Canonical types shared by the scheduler, the loader and the store drivers.
//!
//! Everything that crosses a crate boundary lives here: identifiers, the
//! closed enums (strategy, engine, instance state, field type), record
//! values, column definitions, watermarks and the deterministic naming
//! helpers used for indexes and staging tables.

pub mod columns;
pub mod defaults;
pub mod duration;
pub mod error;
pub mod hashing;
pub mod ids;
pub mod instance;
pub mod naming;
pub mod time;
pub mod types;
pub mod value;

pub use columns::{ColumnSpec, Columns};
pub use duration::{format_duration, parse_duration};
pub use error::ParseError;
pub use hashing::{HashAlgorithm, HashSpec};
pub use ids::{JobId, RunId};
pub use instance::{JobInstance, Watermark};
pub use naming::{index_name, stage_table_name};
pub use time::parse_aware_timestamp;
pub use types::{Engine, FieldType, InstanceState, Strategy};
pub use value::{record_from_json, Record, RecordBatch, Value};
