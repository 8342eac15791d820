//! Weir test utilities.
//!
//! In-process fakes for the loader's collaborators plus an isolated-schema
//! guard for tests against a real PostgreSQL.
//!
//! # Usage
//!
//! ```rust,ignore
//! use weir_test_utils::{json_batch, MemoryStore, ScriptedSource};
//!
//! let store = MemoryStore::new().fail_on_write(2);
//! let source = ScriptedSource::new()
//!     .batch(json_batch(json!([{"id": 1}])))
//!     .batch(json_batch(json!([{"id": 2}])));
//! ```

pub mod fixtures;
pub mod postgres;
pub mod source;
pub mod store;
pub mod transport;

pub use fixtures::{json_batch, utc};
pub use postgres::{test_postgres_url, PostgresTestGuard};
pub use source::ScriptedSource;
pub use store::{MemoryStore, MemoryTable, StoreCall};
pub use transport::RecordingTransport;
