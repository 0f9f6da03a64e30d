//! Mesos master state polling
//!
//! ## Leader redirect
//!
//! Any master answers `/state.json`, but only the leader's view is
//! authoritative. The client asks the configured master first and re-fetches
//! from whatever `leader` it reports:
//!
//! ```text
//! GET {configured}/state.json  ──► leader: "master@10.0.0.7:5050"
//! GET http://10.0.0.7:5050/state.json  ──► State
//! ```

use crate::config::normalize_base_url;
use crate::error::Result;
use crate::http::{build_client, get_json};
use fleetcost_core::{HostSnapshot, Resources};
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

/// Tracing target for Mesos gauges
pub const MESOS_TARGET: &str = "fleetcost::mesos";

/// Master state (the subset the agent reads)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct State {
    /// Master ID
    pub id: String,
    /// Master hostname
    pub hostname: String,
    /// Leading master PID, `master@host:port`
    pub leader: String,
    /// Mesos version
    pub version: String,
    /// Master start time (epoch seconds)
    pub start_time: f64,
    /// Active agent count
    pub activated_slaves: u64,
    /// Inactive agent count
    pub deactivated_slaves: u64,
    /// Finished task counter
    pub finished_tasks: u64,
    /// Killed task counter
    pub killed_tasks: u64,
    /// Lost task counter
    pub lost_tasks: u64,
    /// Staged task counter
    pub staged_tasks: u64,
    /// Started task counter
    pub started_tasks: u64,
    /// Registered agents
    pub slaves: Vec<Slave>,
    /// Registered frameworks
    pub frameworks: Vec<Framework>,
}

/// One Mesos agent
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Slave {
    /// Agent ID
    pub id: String,
    /// Hostname tasks report
    pub hostname: String,
    /// Whether the agent is active
    pub active: bool,
    /// Agent attributes, values stringified
    #[serde(deserialize_with = "stringified_attributes")]
    pub attributes: BTreeMap<String, String>,
    /// Total agent capacity
    pub resources: MesosResources,
}

/// Scalar resources
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct MesosResources {
    /// CPUs
    pub cpus: f64,
    /// Memory (MB)
    pub mem: f64,
    /// Disk (MB)
    pub disk: f64,
}

/// A registered framework
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Framework {
    /// Framework ID
    pub id: String,
    /// Framework name
    pub name: String,
    /// Resources held by running tasks
    pub resources: MesosResources,
    /// Outstanding offers
    pub offers: Vec<Offer>,
}

/// An outstanding offer
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Offer {
    /// Offer ID
    pub id: String,
    /// Offered resources
    pub resources: MesosResources,
}

fn stringified_attributes<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, serde_json::Value>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(k, v)| {
            let v = match v {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            (k, v)
        })
        .collect())
}

impl From<&Slave> for HostSnapshot {
    fn from(slave: &Slave) -> Self {
        Self {
            hostname: slave.hostname.clone(),
            active: slave.active,
            attributes: slave.attributes.clone(),
            resources: Resources::new(slave.resources.cpus, slave.resources.mem, slave.resources.disk),
        }
    }
}

impl State {
    /// Host inventory for the reconciler
    pub fn hosts(&self) -> Vec<HostSnapshot> {
        self.slaves.iter().map(HostSnapshot::from).collect()
    }

    /// Leader address without the `master@` prefix
    pub fn leader_address(&self) -> Option<&str> {
        let leader = self.leader.strip_prefix("master@").unwrap_or(&self.leader);
        (!leader.is_empty()).then_some(leader)
    }
}

/// Mesos master client
#[derive(Debug, Clone)]
pub struct MesosClient {
    client: reqwest::Client,
    base_url: String,
}

impl MesosClient {
    /// Create a client for any master in the quorum
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.into(),
        })
    }

    /// Fetch state from the leading master
    pub async fn get_state(&self) -> Result<State> {
        let url = format!("{}/state.json", self.base_url);
        let state: State = get_json(&self.client, &url).await?;

        let Some(leader) = state.leader_address() else {
            return Ok(state);
        };

        let leader_url = format!("{}/state.json", normalize_base_url(leader));
        debug!(leader = %leader, "Following Mesos leader");
        get_json(&self.client, &leader_url).await
    }
}

/// Emit the `mesos-state` gauge
pub fn log_state(state: &State) {
    let total_cpu: f64 = state.slaves.iter().map(|s| s.resources.cpus).sum();
    let total_mem: f64 = state.slaves.iter().map(|s| s.resources.mem).sum();

    let used_cpu: f64 = state.frameworks.iter().map(|f| f.resources.cpus).sum();
    let used_mem: f64 = state.frameworks.iter().map(|f| f.resources.mem).sum();

    let offers = state.frameworks.iter().flat_map(|f| &f.offers);
    let (offered_cpu, offered_mem) = offers.fold((0.0, 0.0), |(cpu, mem), o| {
        (cpu + o.resources.cpus, mem + o.resources.mem)
    });

    info!(
        target: MESOS_TARGET,
        title = "mesos-state",
        activated_slaves = state.activated_slaves,
        deactivated_slaves = state.deactivated_slaves,
        finished_tasks = state.finished_tasks,
        killed_tasks = state.killed_tasks,
        lost_tasks = state.lost_tasks,
        staged_tasks = state.staged_tasks,
        started_tasks = state.started_tasks,
        hostname = %state.hostname,
        id = %state.id,
        version = %state.version,
        start_time = state.start_time,
        used_cpu,
        used_mem,
        offered_cpu,
        offered_mem,
        total_cpu,
        total_mem,
        r#type = "gauge",
    );
}
