//! # fleetcost core
//!
//! Cluster cost accounting without I/O: joins a host inventory and an app/task
//! snapshot, prices every running container, and manages the billing
//! watermark.
//!
//! ## Architecture
//!
//! ```text
//! PriceTable ──► ClusterReconciler ──► CostAttributor ──► RecordSink
//!                                            │
//!                                     CheckpointStore
//! ```
//!
//! - [`pricing`]: instance type → USD/hour
//! - [`reconcile`]: host inventory → cluster totals + host index
//! - [`attribute`]: tasks × host index → one [`CostRecord`] per container
//! - [`checkpoint`]: durable RFC 3339 watermark
//! - [`pass`]: the ordered reconcile → attribute → persist sequence
//!
//! Pollers, S3 adapters and the timer loop live in the agent crate.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod attribute;
pub mod checkpoint;
pub mod error;
pub mod pass;
pub mod pricing;
pub mod reconcile;
pub mod record;
pub mod types;

pub use attribute::{CostAttributor, PassReport, CONTAINER_CREATED_FORMAT};
pub use checkpoint::{
    format_checkpoint, parse_checkpoint, CheckpointStore, FileCheckpointStore,
    MemoryCheckpointStore,
};
pub use error::{CostError, Result};
pub use pass::Accountant;
pub use pricing::{PriceTable, StaticPriceTable};
pub use reconcile::{
    ClusterReconciler, ClusterSnapshot, HostCost, HostIndex, DEFAULT_INSTANCE_TYPE_PREFIX,
};
pub use record::{ClusterSummary, CostRecord, MemorySink, RecordSink, TracingSink, COST_TARGET};
pub use types::{AppSnapshot, HostSnapshot, Resources, TaskSnapshot, DEFAULT_INSTANCE_TYPE_ATTRIBUTE};
