//! Per-container cost attribution
//!
//! ## Billing window
//!
//! ```text
//!   last_ran                         now
//!      │◄──────── billable window ──────►│
//!      │                                 │
//!   every container present at `now` is billed for the whole window
//! ```
//!
//! The window length is computed once per pass and copied into every record.
//! Record-level problems never abort a pass:
//!
//! - task on a host missing from the [`HostIndex`] → zero host fields
//! - unparseable task start time → `now`
//!
//! A pass with no tasks still completes and still moves the watermark, so
//! quiet periods are never billed twice.

use crate::reconcile::{ClusterSnapshot, HostCost, HostIndex};
use crate::record::{ClusterSummary, CostRecord, RecordSink};
use crate::types::{AppSnapshot, TaskSnapshot};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Format of `container_created`
pub const CONTAINER_CREATED_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Outcome of one attribution pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassReport {
    /// Hours billed to every container in the pass
    pub billable_hours: f64,

    /// Container records emitted
    pub records_emitted: usize,

    /// Records whose host was not in the index
    pub unresolved_hosts: usize,

    /// Records whose start time could not be parsed
    pub unparsed_start_times: usize,

    /// Watermark to persist and commit
    pub watermark: DateTime<Utc>,
}

/// Attributes cost to containers and owns the billing watermark
pub struct CostAttributor<K: RecordSink> {
    /// Where records go
    sink: K,

    /// End of the last completed pass
    last_ran: DateTime<Utc>,
}

impl<K: RecordSink> CostAttributor<K> {
    /// Create an attributor starting from a loaded watermark
    pub fn new(sink: K, last_ran: DateTime<Utc>) -> Self {
        Self { sink, last_ran }
    }

    /// End of the last completed pass
    pub fn last_ran(&self) -> DateTime<Utc> {
        self.last_ran
    }

    /// The record sink
    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// Hours between the watermark and `now`, never negative
    pub fn billable_hours(&self, now: DateTime<Utc>) -> f64 {
        let elapsed_ms = (now - self.last_ran).num_milliseconds().max(0);
        elapsed_ms as f64 / 3_600_000.0
    }

    /// Emit one record per task plus a summary
    ///
    /// `now` is truncated to whole seconds, the precision the watermark is
    /// stored with, so a reloaded watermark equals the committed one.
    ///
    /// Does not move the watermark; call [`CostAttributor::commit`] with
    /// [`PassReport::watermark`] once the new value is persisted.
    pub fn attribute(
        &mut self,
        apps: &[AppSnapshot],
        cluster: &ClusterSnapshot,
        hosts: &HostIndex,
        now: DateTime<Utc>,
    ) -> PassReport {
        let now = now.trunc_subsecs(0);

        if now < self.last_ran {
            warn!(
                now = %now,
                last_ran = %self.last_ran,
                "Clock is behind the billing watermark, billing zero hours"
            );
        }

        let billable_hours = self.billable_hours(now);
        let members = cluster.members_json();
        let unknown_host = HostCost::default();

        let mut report = PassReport {
            billable_hours,
            records_emitted: 0,
            unresolved_hosts: 0,
            unparsed_start_times: 0,
            watermark: now.max(self.last_ran),
        };

        for app in apps {
            for task in &app.tasks {
                let host = match hosts.get(&task.host) {
                    Some(host) => host,
                    None => {
                        debug!(
                            task_id = %task.id,
                            host = %task.host,
                            "Task host not in cluster snapshot, billing with zero host fields"
                        );
                        report.unresolved_hosts += 1;
                        &unknown_host
                    }
                };

                let started = match parse_started_at(task) {
                    Some(t) => t,
                    None => {
                        warn!(
                            task_id = %task.id,
                            started_at = %task.started_at,
                            "Failed to parse task start time, using now"
                        );
                        report.unparsed_start_times += 1;
                        now
                    }
                };

                let record = CostRecord {
                    task_id: task.id.clone(),
                    creator: app.label("creator").to_string(),
                    name: app.id.clone(),
                    environment: app.label("env").to_string(),
                    version: app.label("version").to_string(),
                    application: app.label("application").to_string(),
                    new_billable_hours: billable_hours,

                    container_created: started.format(CONTAINER_CREATED_FORMAT).to_string(),
                    container_mem: app.resources.mem,
                    container_cpus: app.resources.cpus,
                    container_disk: app.resources.disk,

                    host_instance_type: host.instance_type.clone(),
                    host_price_per_hr: host.price_per_hr,
                    host_cpus: host.resources.cpus,
                    host_mem: host.resources.mem,
                    host_disk: host.resources.disk,

                    cluster: members.clone(),
                    cluster_price_per_hr: cluster.price_per_hr,
                    cluster_mem: cluster.mem,
                    cluster_cpus: cluster.cpus,
                    cluster_disk: cluster.disk,
                    cluster_member_count: cluster.member_count,
                };

                self.sink.container_cost(&record);
                report.records_emitted += 1;
            }
        }

        let summary = ClusterSummary {
            total_apps: apps.len() as u64,
            running_tasks: apps.iter().map(|a| a.tasks_running).sum(),
            staged_tasks: apps.iter().map(|a| a.tasks_staged).sum(),
            new_billable_hours: billable_hours,
            cluster: members,
            cluster_price_per_hr: cluster.price_per_hr,
            cluster_mem: cluster.mem,
            cluster_cpus: cluster.cpus,
            cluster_disk: cluster.disk,
            cluster_member_count: cluster.member_count,
        };
        self.sink.cluster_summary(&summary);

        info!(
            records = report.records_emitted,
            billable_hours = report.billable_hours,
            unresolved_hosts = report.unresolved_hosts,
            "Attributed container cost"
        );

        report
    }

    /// Advance the watermark; earlier values are ignored
    pub fn commit(&mut self, watermark: DateTime<Utc>) {
        if watermark > self.last_ran {
            self.last_ran = watermark;
        }
    }
}

fn parse_started_at(task: &TaskSnapshot) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&task.started_at)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::MemorySink;
    use crate::types::Resources;
    use chrono::{Duration, TimeZone};
    use std::collections::BTreeMap;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn cluster() -> ClusterSnapshot {
        ClusterSnapshot {
            member_count: 1,
            members: BTreeMap::from([("A".to_string(), 1)]),
            price_per_hr: 0.10,
            cpus: 4.0,
            mem: 8192.0,
            disk: 100.0,
        }
    }

    fn index() -> HostIndex {
        use crate::pricing::StaticPriceTable;
        use crate::reconcile::ClusterReconciler;
        use crate::types::HostSnapshot;
        use std::collections::HashMap;

        let prices = StaticPriceTable::from_map(HashMap::from([("A".to_string(), 0.10)]));
        let hosts = [HostSnapshot::new("h1", "mesos.A", Resources::new(4.0, 8192.0, 100.0))];
        ClusterReconciler::new().reconcile(&hosts, &prices).unwrap().1
    }

    fn app() -> AppSnapshot {
        AppSnapshot::new("/team/api", Resources::new(0.5, 512.0, 10.0))
            .with_label("creator", "ops")
            .with_label("env", "production")
            .with_label("version", "v42")
            .with_label("application", "api")
    }

    #[test]
    fn test_record_fields() {
        let apps = [app().with_task(TaskSnapshot::new("api.1", "h1", "2024-02-29T08:15:30.123Z"))];
        let mut attributor = CostAttributor::new(MemorySink::new(), t0());
        let report = attributor.attribute(&apps, &cluster(), &index(), t0() + Duration::hours(2));

        assert_eq!(report.records_emitted, 1);
        let r = &attributor.sink().records[0];
        assert_eq!(r.task_id, "api.1");
        assert_eq!(r.name, "/team/api");
        assert_eq!(r.creator, "ops");
        assert_eq!(r.environment, "production");
        assert_eq!(r.version, "v42");
        assert_eq!(r.application, "api");
        assert_eq!(r.new_billable_hours, 2.0);
        assert_eq!(r.container_created, "2024-02-29 08:15:30");
        assert_eq!(r.container_cpus, 0.5);
        assert_eq!(r.container_mem, 512.0);
        assert_eq!(r.host_instance_type, "A");
        assert_eq!(r.host_price_per_hr, 0.10);
        assert_eq!(r.host_cpus, 4.0);
        assert_eq!(r.cluster, r#"{"A":1}"#);
        assert_eq!(r.cluster_member_count, 1);
    }

    #[test]
    fn test_unresolved_host_gets_zero_fields() {
        let apps = [app().with_task(TaskSnapshot::new("api.1", "gone", "2024-02-29T08:15:30Z"))];
        let mut attributor = CostAttributor::new(MemorySink::new(), t0());
        let report = attributor.attribute(&apps, &cluster(), &index(), t0() + Duration::hours(1));

        assert_eq!(report.unresolved_hosts, 1);
        let r = &attributor.sink().records[0];
        assert_eq!(r.host_instance_type, "");
        assert_eq!(r.host_price_per_hr, 0.0);
        assert_eq!(r.host_mem, 0.0);
        assert_eq!(r.cluster_price_per_hr, 0.10);
    }

    #[test]
    fn test_bad_start_time_uses_now() {
        let now = t0() + Duration::minutes(30);
        let apps = [app().with_task(TaskSnapshot::new("api.1", "h1", "yesterday"))];
        let mut attributor = CostAttributor::new(MemorySink::new(), t0());
        let report = attributor.attribute(&apps, &cluster(), &index(), now);

        assert_eq!(report.unparsed_start_times, 1);
        assert_eq!(attributor.sink().records[0].container_created, "2024-03-01 12:30:00");
    }

    #[test]
    fn test_zero_tasks_still_summarizes() {
        let mut attributor = CostAttributor::new(MemorySink::new(), t0());
        let now = t0() + Duration::minutes(10);
        let report = attributor.attribute(&[], &cluster(), &index(), now);

        assert_eq!(report.records_emitted, 0);
        assert_eq!(report.watermark, now);
        assert_eq!(attributor.sink().summaries.len(), 1);
        assert_eq!(attributor.sink().summaries[0].total_apps, 0);
        assert_eq!(attributor.sink().summaries[0].cluster_member_count, 1);
    }

    #[test]
    fn test_summary_counts() {
        let mut staged = app();
        staged.tasks_staged = 3;
        let apps = [
            app()
                .with_task(TaskSnapshot::new("a.1", "h1", "2024-02-29T08:15:30Z"))
                .with_task(TaskSnapshot::new("a.2", "h1", "2024-02-29T08:15:30Z")),
            staged,
        ];
        let mut attributor = CostAttributor::new(MemorySink::new(), t0());
        attributor.attribute(&apps, &cluster(), &index(), t0() + Duration::hours(1));

        let summary = &attributor.sink().summaries[0];
        assert_eq!(summary.total_apps, 2);
        assert_eq!(summary.running_tasks, 2);
        assert_eq!(summary.staged_tasks, 3);
        assert_eq!(summary.new_billable_hours, 1.0);
    }

    #[test]
    fn test_clock_skew_bills_zero_and_keeps_watermark() {
        let mut attributor = CostAttributor::new(MemorySink::new(), t0());
        let report = attributor.attribute(&[], &cluster(), &index(), t0() - Duration::minutes(5));

        assert_eq!(report.billable_hours, 0.0);
        assert_eq!(report.watermark, t0());
    }

    #[test]
    fn test_attribute_does_not_move_watermark_until_commit() {
        let mut attributor = CostAttributor::new(MemorySink::new(), t0());
        let now = t0() + Duration::hours(1);
        let report = attributor.attribute(&[], &cluster(), &index(), now);
        assert_eq!(attributor.last_ran(), t0());

        attributor.commit(report.watermark);
        assert_eq!(attributor.last_ran(), now);

        attributor.commit(t0());
        assert_eq!(attributor.last_ran(), now);
    }

    #[test]
    fn test_fractional_now_truncates_to_whole_seconds() {
        let mut attributor = CostAttributor::new(MemorySink::new(), t0());
        let now = t0() + Duration::milliseconds(5_400_750);
        let report = attributor.attribute(&[app()], &cluster(), &index(), now);

        assert_eq!(report.watermark, t0() + Duration::seconds(5_400));
        assert_eq!(report.billable_hours, 1.5);
        assert_eq!(attributor.sink().records[0].new_billable_hours, 1.5);
    }
}
