//! One accounting pass: reconcile → attribute → persist
//!
//! ```text
//! hosts ──► ClusterReconciler ──► (ClusterSnapshot, HostIndex)
//!                                          │
//! apps ───────────────────────────► CostAttributor ──► RecordSink
//!                                          │
//!                                   CheckpointStore.store(now)
//!                                          │
//!                                   attributor.commit(now)
//! ```
//!
//! A malformed host snapshot stops the pass before anything is emitted or
//! written. A failed checkpoint write leaves the in-memory watermark where it
//! was. There is no retry here; the caller decides what a failure means.

use crate::attribute::{CostAttributor, PassReport};
use crate::checkpoint::CheckpointStore;
use crate::error::Result;
use crate::pricing::PriceTable;
use crate::reconcile::ClusterReconciler;
use crate::record::RecordSink;
use crate::types::{AppSnapshot, HostSnapshot};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

/// Runs accounting passes against fixed collaborators
pub struct Accountant<K: RecordSink> {
    reconciler: ClusterReconciler,
    prices: Arc<dyn PriceTable>,
    attributor: CostAttributor<K>,
    checkpoints: Box<dyn CheckpointStore>,
}

impl<K: RecordSink> Accountant<K> {
    /// Load the watermark and build an accountant
    ///
    /// Fails when the watermark is missing or unreadable.
    pub async fn start(
        reconciler: ClusterReconciler,
        prices: Arc<dyn PriceTable>,
        checkpoints: Box<dyn CheckpointStore>,
        sink: K,
    ) -> Result<Self> {
        let last_ran = checkpoints.load().await?;
        info!(
            checkpoint = %checkpoints.describe(),
            last_ran = %last_ran,
            "Loaded billing watermark"
        );

        Ok(Self {
            reconciler,
            prices,
            attributor: CostAttributor::new(sink, last_ran),
            checkpoints,
        })
    }

    /// End of the last completed pass
    pub fn last_ran(&self) -> DateTime<Utc> {
        self.attributor.last_ran()
    }

    /// The record sink
    pub fn sink(&self) -> &K {
        self.attributor.sink()
    }

    /// Run one pass with `now` as the end of the billing window
    pub async fn run_pass(
        &mut self,
        apps: &[AppSnapshot],
        hosts: &[HostSnapshot],
        now: DateTime<Utc>,
    ) -> Result<PassReport> {
        let (cluster, index) = self.reconciler.reconcile(hosts, self.prices.as_ref())?;

        let report = self.attributor.attribute(apps, &cluster, &index, now);

        self.checkpoints.store(report.watermark).await?;
        self.attributor.commit(report.watermark);

        Ok(report)
    }
}
