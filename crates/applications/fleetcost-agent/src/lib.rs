//! # fleetcost agent
//!
//! Runs cluster cost accounting against live Marathon and Mesos masters.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────── Driver (interval) ────────────┐
//! │ MarathonClient ──► apps  ─┐               │
//! │ MesosClient    ──► hosts ─┴─► Accountant ─┼──► tracing (fleetcost::cost)
//! └───────────────────────────────────────────┘         │
//!                                              CheckpointStore (file | S3)
//!
//! Marathon event bus ──► listener (axum) ──► mpsc ──► tracing (fleetcost::events)
//! ```
//!
//! The accounting core lives in `fleetcost-core`; this crate adds the HTTP
//! clients, S3 storage, the push listener and the poll loop.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod driver;
pub mod error;
pub mod http;
pub mod listener;
pub mod logging;
pub mod marathon;
pub mod mesos;
pub mod prices;
pub mod s3_store;

pub use config::{AgentConfig, ListenerConfig, Location};
pub use driver::{checkpoint_store, Driver};
pub use error::{AgentError, Result};
pub use listener::{MarathonEvent, Subscription};
pub use logging::{init_tracing, LogFormat};
pub use marathon::MarathonClient;
pub use mesos::MesosClient;
pub use prices::load_prices;
pub use s3_store::{create_s3_client, S3CheckpointStore};
