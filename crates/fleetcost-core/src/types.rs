//! Snapshot types shared by the reconciler and the attributor
//!
//! These are point-in-time copies of orchestrator state. The agent converts
//! its wire formats into them once per poll; nothing in the core mutates them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default attribute key carrying a host's instance type
pub const DEFAULT_INSTANCE_TYPE_ATTRIBUTE: &str = "instance_type";

/// CPU, memory and disk amounts
///
/// Used both for host capacity and for a container's resource request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    /// CPU shares
    pub cpus: f64,

    /// Memory in MB
    pub mem: f64,

    /// Disk in MB
    pub disk: f64,
}

impl Resources {
    /// Create a resource triple
    pub fn new(cpus: f64, mem: f64, disk: f64) -> Self {
        Self { cpus, mem, disk }
    }

    /// Name of the first field that is NaN, infinite or negative
    pub fn invalid_field(&self) -> Option<&'static str> {
        [("cpus", self.cpus), ("mem", self.mem), ("disk", self.disk)]
            .into_iter()
            .find(|(_, v)| !v.is_finite() || *v < 0.0)
            .map(|(name, _)| name)
    }
}

/// One host from the resource manager's inventory
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostSnapshot {
    /// Hostname, the join key for tasks
    pub hostname: String,

    /// Whether the host is currently an active cluster member
    pub active: bool,

    /// Free-form host attributes (instance type lives here)
    pub attributes: BTreeMap<String, String>,

    /// Total capacity
    pub resources: Resources,
}

impl HostSnapshot {
    /// Create an active host with the given instance-type attribute
    pub fn new(hostname: impl Into<String>, instance_type: impl Into<String>, resources: Resources) -> Self {
        let mut attributes = BTreeMap::new();
        attributes.insert(DEFAULT_INSTANCE_TYPE_ATTRIBUTE.to_string(), instance_type.into());
        Self {
            hostname: hostname.into(),
            active: true,
            attributes,
            resources,
        }
    }

    /// Set the active flag
    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// Raw attribute value, if present
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// One running task of an app
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    /// Task ID
    pub id: String,

    /// Hostname the task runs on
    pub host: String,

    /// Start time as reported by the orchestrator (RFC 3339)
    pub started_at: String,
}

impl TaskSnapshot {
    /// Create a task snapshot
    pub fn new(id: impl Into<String>, host: impl Into<String>, started_at: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            started_at: started_at.into(),
        }
    }
}

/// One app and its tasks
///
/// Every task of an app shares the app's labels and resource request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppSnapshot {
    /// App ID (e.g. `/team/service`)
    pub id: String,

    /// App labels (`creator`, `env`, `version`, `application`, ...)
    pub labels: BTreeMap<String, String>,

    /// Per-task resource request
    pub resources: Resources,

    /// Running task count reported by the orchestrator
    pub tasks_running: u64,

    /// Staged task count reported by the orchestrator
    pub tasks_staged: u64,

    /// Tasks present in this snapshot
    pub tasks: Vec<TaskSnapshot>,
}

impl AppSnapshot {
    /// Create an app with no labels and no tasks
    pub fn new(id: impl Into<String>, resources: Resources) -> Self {
        Self {
            id: id.into(),
            resources,
            ..Default::default()
        }
    }

    /// Add a label
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Add a task; also counts it as running
    pub fn with_task(mut self, task: TaskSnapshot) -> Self {
        self.tasks.push(task);
        self.tasks_running += 1;
        self
    }

    /// Label value, or empty string when absent
    pub fn label(&self, key: &str) -> &str {
        self.labels.get(key).map(String::as_str).unwrap_or("")
    }
}
