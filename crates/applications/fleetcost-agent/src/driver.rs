//! Poll loop
//!
//! ## Tick schedule
//!
//! ```text
//! tick:   0     1     2    ...   9    10    11   ...
//! poll:   ✓     ✓     ✓          ✓     ✓     ✓
//! pass:   ✓                            ✓
//! ```
//!
//! Every tick polls Marathon and Mesos and logs their gauges. Every
//! `cost_every`-th tick, starting with the first, also runs an accounting
//! pass over that tick's snapshots. The first error ends the loop.

use crate::config::{AgentConfig, Location};
use crate::error::{AgentError, Result};
use crate::marathon::{self, MarathonClient};
use crate::mesos::{self, MesosClient};
use crate::prices::load_prices;
use crate::s3_store::{create_s3_client, S3CheckpointStore};
use chrono::Utc;
use fleetcost_core::{
    Accountant, AppSnapshot, CheckpointStore, FileCheckpointStore, HostSnapshot, PassReport, RecordSink,
    TracingSink,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Checkpoint store for a configured location
pub fn checkpoint_store(location: &Location, s3: Option<aws_sdk_s3::Client>) -> Result<Box<dyn CheckpointStore>> {
    match location {
        Location::File(path) => Ok(Box::new(FileCheckpointStore::new(path))),
        Location::S3 { bucket, key } => {
            let client = s3.ok_or_else(|| AgentError::config("S3 checkpoint location without an S3 client"))?;
            Ok(Box::new(S3CheckpointStore::new(client, bucket, key)))
        }
    }
}

/// Polls collaborators and runs accounting passes
pub struct Driver<K: RecordSink = TracingSink> {
    marathon: MarathonClient,
    mesos: MesosClient,
    accountant: Accountant<K>,
    poll_interval: Duration,
    cost_every: u64,
    log_tasks: bool,
}

impl Driver<TracingSink> {
    /// Load prices and the watermark, then build the production driver
    ///
    /// Any failure here is fatal: a missing price table or watermark means
    /// no pass can be billed correctly.
    pub async fn start(config: &AgentConfig) -> Result<Self> {
        config.validate()?;

        let s3 = if config.needs_s3() {
            Some(create_s3_client(&config.region).await)
        } else {
            None
        };

        let prices = load_prices(&config.prices, s3.as_ref()).await?;
        let checkpoints = checkpoint_store(&config.checkpoint, s3)?;
        let accountant = Accountant::start(config.reconciler(), Arc::new(prices), checkpoints, TracingSink).await?;

        Self::from_parts(config, accountant)
    }
}

impl<K: RecordSink> Driver<K> {
    /// Build around an already started accountant
    pub fn from_parts(config: &AgentConfig, accountant: Accountant<K>) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            marathon: MarathonClient::new(&config.marathon_url, config.http_timeout)?,
            mesos: MesosClient::new(&config.mesos_url, config.http_timeout)?,
            accountant,
            poll_interval: config.poll_interval,
            cost_every: config.cost_every,
            log_tasks: config.log_tasks,
        })
    }

    /// The accountant
    pub fn accountant(&self) -> &Accountant<K> {
        &self.accountant
    }

    /// Fetch both snapshots and log their gauges
    pub async fn poll(&self) -> Result<(Vec<AppSnapshot>, Vec<HostSnapshot>)> {
        let apps = self.marathon.get_apps().await?;
        marathon::log_state(&apps, self.log_tasks);

        let state = self.mesos.get_state().await?;
        mesos::log_state(&state);

        Ok((apps.iter().map(AppSnapshot::from).collect(), state.hosts()))
    }

    /// One tick: always poll, run a pass on every `cost_every`-th tick
    pub async fn tick(&mut self, tick: u64) -> Result<Option<PassReport>> {
        let (apps, hosts) = self.poll().await?;

        if tick % self.cost_every != 0 {
            debug!(tick, "Poll only");
            return Ok(None);
        }

        self.pass(&apps, &hosts).await.map(Some)
    }

    /// Poll once and run one pass
    pub async fn run_once(&mut self) -> Result<PassReport> {
        let (apps, hosts) = self.poll().await?;
        self.pass(&apps, &hosts).await
    }

    /// Tick forever; returns only on error
    pub async fn run(&mut self) -> Result<()> {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            poll_interval = ?self.poll_interval,
            cost_every = self.cost_every,
            last_ran = %self.accountant.last_ran(),
            "Driver started"
        );

        let mut tick: u64 = 0;
        loop {
            interval.tick().await;
            self.tick(tick).await?;
            tick = tick.wrapping_add(1);
        }
    }

    async fn pass(&mut self, apps: &[AppSnapshot], hosts: &[HostSnapshot]) -> Result<PassReport> {
        let report = self.accountant.run_pass(apps, hosts, Utc::now()).await?;

        info!(
            billable_hours = report.billable_hours,
            records = report.records_emitted,
            unresolved_hosts = report.unresolved_hosts,
            unparsed_start_times = report.unparsed_start_times,
            watermark = %report.watermark,
            "Cost pass complete"
        );

        Ok(report)
    }
}
