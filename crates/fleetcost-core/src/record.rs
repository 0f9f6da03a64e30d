//! Cost records and the sinks that receive them
//!
//! Field names are consumed by downstream analytics and must not change.

use serde::{Deserialize, Serialize};
use tracing::info;

/// Tracing target every cost record is emitted under
pub const COST_TARGET: &str = "fleetcost::cost";

/// Billable cost of one container for one pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostRecord {
    /// Task ID
    pub task_id: String,
    /// `creator` label of the owning app
    pub creator: String,
    /// Owning app ID
    pub name: String,
    /// `env` label of the owning app
    pub environment: String,
    /// `version` label of the owning app
    pub version: String,
    /// `application` label of the owning app
    pub application: String,
    /// Hours since the previous pass, shared by every record of this pass
    pub new_billable_hours: f64,

    /// Task start time, `YYYY-MM-DD HH:MM:SS` UTC
    pub container_created: String,
    /// Requested memory
    pub container_mem: f64,
    /// Requested CPUs
    pub container_cpus: f64,
    /// Requested disk
    pub container_disk: f64,

    /// Host instance type (empty when the host was not found)
    pub host_instance_type: String,
    /// Host USD/hour (0 when unknown or not found)
    pub host_price_per_hr: f64,
    /// Host CPUs
    pub host_cpus: f64,
    /// Host memory
    pub host_mem: f64,
    /// Host disk
    pub host_disk: f64,

    /// Membership counts per instance type, as JSON
    pub cluster: String,
    /// Cluster USD/hour
    pub cluster_price_per_hr: f64,
    /// Cluster memory
    pub cluster_mem: f64,
    /// Cluster CPUs
    pub cluster_cpus: f64,
    /// Cluster disk
    pub cluster_disk: f64,
    /// Active host count
    pub cluster_member_count: u32,
}

/// Once-per-pass summary of apps and cluster totals
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterSummary {
    /// Apps in the snapshot
    pub total_apps: u64,
    /// Sum of running task counts
    pub running_tasks: u64,
    /// Sum of staged task counts
    pub staged_tasks: u64,
    /// Hours since the previous pass
    pub new_billable_hours: f64,

    /// Membership counts per instance type, as JSON
    pub cluster: String,
    /// Cluster USD/hour
    pub cluster_price_per_hr: f64,
    /// Cluster memory
    pub cluster_mem: f64,
    /// Cluster CPUs
    pub cluster_cpus: f64,
    /// Cluster disk
    pub cluster_disk: f64,
    /// Active host count
    pub cluster_member_count: u32,
}

/// Receives records produced by a pass
pub trait RecordSink {
    /// One container's cost
    fn container_cost(&mut self, record: &CostRecord);

    /// The pass summary
    fn cluster_summary(&mut self, summary: &ClusterSummary);
}

impl<K: RecordSink + ?Sized> RecordSink for &mut K {
    fn container_cost(&mut self, record: &CostRecord) {
        (**self).container_cost(record);
    }

    fn cluster_summary(&mut self, summary: &ClusterSummary) {
        (**self).cluster_summary(summary);
    }
}

impl<K: RecordSink + ?Sized> RecordSink for Box<K> {
    fn container_cost(&mut self, record: &CostRecord) {
        (**self).container_cost(record);
    }

    fn cluster_summary(&mut self, summary: &ClusterSummary) {
        (**self).cluster_summary(summary);
    }
}

/// Emits each record as one structured `info` event
///
/// With a JSON subscriber every record field becomes a top-level key.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl RecordSink for TracingSink {
    fn container_cost(&mut self, r: &CostRecord) {
        info!(
            target: COST_TARGET,
            title = "container-cost",
            task_id = %r.task_id,
            creator = %r.creator,
            name = %r.name,
            environment = %r.environment,
            version = %r.version,
            application = %r.application,
            new_billable_hours = r.new_billable_hours,
            container_created = %r.container_created,
            container_mem = r.container_mem,
            container_cpus = r.container_cpus,
            container_disk = r.container_disk,
            host_instance_type = %r.host_instance_type,
            host_price_per_hr = r.host_price_per_hr,
            host_cpus = r.host_cpus,
            host_mem = r.host_mem,
            host_disk = r.host_disk,
            cluster = %r.cluster,
            cluster_price_per_hr = r.cluster_price_per_hr,
            cluster_mem = r.cluster_mem,
            cluster_cpus = r.cluster_cpus,
            cluster_disk = r.cluster_disk,
            cluster_member_count = r.cluster_member_count,
        );
    }

    fn cluster_summary(&mut self, s: &ClusterSummary) {
        info!(
            target: COST_TARGET,
            title = "cluster-cost-summary",
            total_apps = s.total_apps,
            running_tasks = s.running_tasks,
            staged_tasks = s.staged_tasks,
            new_billable_hours = s.new_billable_hours,
            cluster = %s.cluster,
            cluster_price_per_hr = s.cluster_price_per_hr,
            cluster_mem = s.cluster_mem,
            cluster_cpus = s.cluster_cpus,
            cluster_disk = s.cluster_disk,
            cluster_member_count = s.cluster_member_count,
        );
    }
}

/// Keeps records in memory
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    /// Container records in emission order
    pub records: Vec<CostRecord>,

    /// Summaries in emission order
    pub summaries: Vec<ClusterSummary>,
}

impl MemorySink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordSink for MemorySink {
    fn container_cost(&mut self, record: &CostRecord) {
        self.records.push(record.clone());
    }

    fn cluster_summary(&mut self, summary: &ClusterSummary) {
        self.summaries.push(summary.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_cost_record_field_names() {
        let json = serde_json::to_value(CostRecord::default()).unwrap();
        let mut keys: Vec<&str> = json.as_object().unwrap().keys().map(String::as_str).collect();
        keys.sort_unstable();

        let mut expected = record_keys();
        expected.sort_unstable();

        assert_eq!(keys, expected);
    }

    #[test]
    fn test_cluster_summary_field_names() {
        let json = serde_json::to_value(ClusterSummary::default()).unwrap();
        let mut keys: Vec<&str> = json.as_object().unwrap().keys().map(String::as_str).collect();
        keys.sort_unstable();

        let mut expected = summary_keys();
        expected.sort_unstable();

        assert_eq!(keys, expected);
    }

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn record_keys() -> Vec<&'static str> {
        vec![
            "task_id", "creator", "name", "environment", "version", "application",
            "new_billable_hours", "container_created", "container_mem", "container_cpus",
            "container_disk", "host_instance_type", "host_price_per_hr", "host_cpus",
            "host_mem", "host_disk", "cluster", "cluster_price_per_hr", "cluster_mem",
            "cluster_cpus", "cluster_disk", "cluster_member_count",
        ]
    }

    fn summary_keys() -> Vec<&'static str> {
        vec![
            "total_apps", "running_tasks", "staged_tasks", "new_billable_hours", "cluster",
            "cluster_price_per_hr", "cluster_mem", "cluster_cpus", "cluster_disk",
            "cluster_member_count",
        ]
    }

    /// Run `emit` under a JSON subscriber and return one object per event
    fn capture_json(emit: impl FnOnce()) -> Vec<serde_json::Map<String, serde_json::Value>> {
        let capture = Capture::default();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .without_time()
            .with_level(false)
            .with_target(false)
            .with_writer(move || writer.clone())
            .finish();

        tracing::subscriber::with_default(subscriber, emit);

        let raw = String::from_utf8(capture.0.lock().unwrap().clone()).unwrap();
        raw.lines()
            .map(|line| match serde_json::from_str(line).unwrap() {
                serde_json::Value::Object(map) => map,
                other => panic!("not an object: {other}"),
            })
            .collect()
    }

    fn sorted_keys(event: &serde_json::Map<String, serde_json::Value>) -> Vec<&str> {
        let mut keys: Vec<&str> = event.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    #[test]
    fn test_tracing_sink_container_cost_keys() {
        let record = CostRecord {
            task_id: "web.1".to_string(),
            host_instance_type: "m4.large".to_string(),
            new_billable_hours: 1.5,
            cluster: r#"{"m4.large":1}"#.to_string(),
            cluster_member_count: 1,
            ..Default::default()
        };

        let events = capture_json(|| TracingSink.container_cost(&record));
        assert_eq!(events.len(), 1);

        let mut expected = record_keys();
        expected.push("title");
        expected.sort_unstable();

        let event = &events[0];
        assert_eq!(sorted_keys(event), expected);
        assert_eq!(event["title"], "container-cost");
        assert_eq!(event["task_id"], "web.1");
        assert_eq!(event["host_instance_type"], "m4.large");
        assert_eq!(event["new_billable_hours"], 1.5);
        assert_eq!(event["cluster"], r#"{"m4.large":1}"#);
        assert_eq!(event["cluster_member_count"], 1);
    }

    #[test]
    fn test_tracing_sink_cluster_summary_keys() {
        let summary = ClusterSummary {
            total_apps: 3,
            running_tasks: 5,
            new_billable_hours: 0.25,
            ..Default::default()
        };

        let events = capture_json(|| TracingSink.cluster_summary(&summary));
        assert_eq!(events.len(), 1);

        let mut expected = summary_keys();
        expected.push("title");
        expected.sort_unstable();

        let event = &events[0];
        assert_eq!(sorted_keys(event), expected);
        assert_eq!(event["title"], "cluster-cost-summary");
        assert_eq!(event["total_apps"], 3);
        assert_eq!(event["running_tasks"], 5);
        assert_eq!(event["new_billable_hours"], 0.25);
    }

    #[test]
    fn test_boxed_sink_forwards() {
        let mut memory = MemorySink::new();
        {
            let mut boxed: Box<dyn RecordSink + '_> = Box::new(&mut memory);
            boxed.container_cost(&CostRecord::default());
            boxed.cluster_summary(&ClusterSummary::default());
        }
        assert_eq!(memory.records.len(), 1);
        assert_eq!(memory.summaries.len(), 1);
    }
}
