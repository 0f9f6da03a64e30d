//! Cluster reconciliation
//!
//! Turns one host-inventory snapshot into:
//!
//! - a [`ClusterSnapshot`]: membership counts per instance type plus price,
//!   CPU, memory and disk totals over active hosts
//! - a [`HostIndex`]: hostname → instance type, price and capacity, used to
//!   join tasks to the hosts they run on
//!
//! ## Aggregation
//!
//! ```text
//! for each active host:
//!     type            = attributes[instance_type] with prefix stripped
//!     members[type]  += 1
//!     price_per_hr   += prices(type) or 0
//!     cpus/mem/disk  += host resources
//!     index[hostname] = (type, price, resources)
//! ```
//!
//! Every combination step is a sum or a count, so the result does not depend
//! on the order of the input. Hosts are folded in hostname order so float
//! sums are bit-identical across permutations. Inactive hosts are skipped
//! entirely.
//!
//! Validation happens up front: a malformed host fails the whole call and
//! nothing is returned.

use crate::error::{CostError, Result};
use crate::pricing::PriceTable;
use crate::types::{DEFAULT_INSTANCE_TYPE_ATTRIBUTE, HostSnapshot, Resources};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};

/// Default prefix the resource manager puts in front of instance types
pub const DEFAULT_INSTANCE_TYPE_PREFIX: &str = "mesos.";

/// Aggregate view over all active hosts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    /// Number of active hosts
    pub member_count: u32,

    /// Active host count per canonical instance type
    pub members: BTreeMap<String, u32>,

    /// Sum of host prices (USD/hour); unknown types contribute 0
    pub price_per_hr: f64,

    /// Sum of host CPUs
    pub cpus: f64,

    /// Sum of host memory
    pub mem: f64,

    /// Sum of host disk
    pub disk: f64,
}

impl ClusterSnapshot {
    /// Membership counts serialized as a JSON object
    pub fn members_json(&self) -> String {
        // BTreeMap<String, u32> always serializes
        serde_json::to_string(&self.members).unwrap_or_default()
    }
}

/// Pricing and capacity of a single host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostCost {
    /// Canonical instance type
    pub instance_type: String,

    /// USD per hour (0 when the type has no price)
    pub price_per_hr: f64,

    /// Host capacity
    pub resources: Resources,
}

/// Hostname → [`HostCost`] for the active hosts of one snapshot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostIndex {
    hosts: HashMap<String, HostCost>,
}

impl HostIndex {
    /// Look up a host
    pub fn get(&self, hostname: &str) -> Option<&HostCost> {
        self.hosts.get(hostname)
    }

    /// Whether the hostname is indexed
    pub fn contains(&self, hostname: &str) -> bool {
        self.hosts.contains_key(hostname)
    }

    /// Number of indexed hosts
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    /// Whether the index is empty
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

/// Builds [`ClusterSnapshot`] and [`HostIndex`] from host inventory
#[derive(Debug, Clone)]
pub struct ClusterReconciler {
    /// Prefix stripped from the raw instance-type attribute
    instance_type_prefix: String,

    /// Attribute key holding the instance type
    instance_type_attribute: String,
}

impl Default for ClusterReconciler {
    fn default() -> Self {
        Self {
            instance_type_prefix: DEFAULT_INSTANCE_TYPE_PREFIX.to_string(),
            instance_type_attribute: DEFAULT_INSTANCE_TYPE_ATTRIBUTE.to_string(),
        }
    }
}

impl ClusterReconciler {
    /// Create a reconciler with default prefix and attribute key
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the instance-type prefix
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.instance_type_prefix = prefix.into();
        self
    }

    /// Set the attribute key holding the instance type
    pub fn with_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.instance_type_attribute = attribute.into();
        self
    }

    /// Canonical instance type of a host
    ///
    /// A missing attribute yields the empty string, which no price table knows.
    pub fn instance_type(&self, host: &HostSnapshot) -> String {
        let raw = host.attribute(&self.instance_type_attribute).unwrap_or("");
        raw.strip_prefix(self.instance_type_prefix.as_str())
            .unwrap_or(raw)
            .to_string()
    }

    /// Aggregate a host snapshot
    ///
    /// Unknown prices count as zero and are logged. Malformed hosts fail the
    /// whole call with [`CostError::MalformedSnapshot`].
    pub fn reconcile(
        &self,
        hosts: &[HostSnapshot],
        prices: &dyn PriceTable,
    ) -> Result<(ClusterSnapshot, HostIndex)> {
        validate(hosts)?;

        let mut cluster = ClusterSnapshot::default();
        let mut index = HostIndex::default();

        let mut active: Vec<&HostSnapshot> = hosts.iter().filter(|h| h.active).collect();
        active.sort_by(|a, b| a.hostname.cmp(&b.hostname));

        for host in active {
            let instance_type = self.instance_type(host);
            *cluster.members.entry(instance_type.clone()).or_insert(0) += 1;
            cluster.member_count += 1;

            let price_per_hr = match prices.per_hour(&instance_type) {
                Ok(price) => price,
                Err(e) => {
                    warn!(
                        hostname = %host.hostname,
                        instance_type = %instance_type,
                        error = %e,
                        "No price for host, counting it as free"
                    );
                    0.0
                }
            };

            cluster.price_per_hr += price_per_hr;
            cluster.cpus += host.resources.cpus;
            cluster.mem += host.resources.mem;
            cluster.disk += host.resources.disk;

            index.hosts.insert(
                host.hostname.clone(),
                HostCost {
                    instance_type,
                    price_per_hr,
                    resources: host.resources,
                },
            );
        }

        debug!(
            members = cluster.member_count,
            price_per_hr = cluster.price_per_hr,
            "Reconciled cluster"
        );

        Ok((cluster, index))
    }
}

fn validate(hosts: &[HostSnapshot]) -> Result<()> {
    let mut seen = HashSet::new();

    for host in hosts.iter().filter(|h| h.active) {
        if host.hostname.is_empty() {
            return Err(CostError::malformed("active host without a hostname"));
        }
        if let Some(field) = host.resources.invalid_field() {
            return Err(CostError::malformed(format!(
                "host {} has invalid {}: {:?}",
                host.hostname, field, host.resources
            )));
        }
        if !seen.insert(host.hostname.as_str()) {
            return Err(CostError::malformed(format!(
                "host {} listed more than once",
                host.hostname
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::StaticPriceTable;

    fn prices() -> StaticPriceTable {
        StaticPriceTable::from_map(HashMap::from([
            ("A".to_string(), 0.10),
            ("B".to_string(), 0.20),
        ]))
    }

    fn hosts() -> Vec<HostSnapshot> {
        vec![
            HostSnapshot::new("h1", "mesos.A", Resources::new(4.0, 8192.0, 100.0)),
            HostSnapshot::new("h2", "mesos.A", Resources::new(4.0, 8192.0, 100.0)).with_active(false),
            HostSnapshot::new("h3", "mesos.B", Resources::new(8.0, 16384.0, 200.0)),
        ]
    }

    #[test]
    fn test_reconcile_skips_inactive_hosts() {
        let (cluster, index) = ClusterReconciler::new().reconcile(&hosts(), &prices()).unwrap();

        assert_eq!(cluster.member_count, 2);
        assert_eq!(cluster.members, BTreeMap::from([("A".to_string(), 1), ("B".to_string(), 1)]));
        assert!((cluster.price_per_hr - 0.30).abs() < 1e-9);
        assert_eq!(cluster.cpus, 12.0);
        assert_eq!(cluster.mem, 24576.0);
        assert_eq!(cluster.disk, 300.0);

        assert_eq!(index.len(), 2);
        assert!(index.contains("h1"));
        assert!(!index.contains("h2"));
        assert_eq!(index.get("h3").unwrap().instance_type, "B");
        assert_eq!(index.get("h3").unwrap().price_per_hr, 0.20);
    }

    #[test]
    fn test_reconcile_is_order_independent() {
        let reconciler = ClusterReconciler::new();
        let mut reversed = hosts();
        reversed.reverse();

        let (a, ia) = reconciler.reconcile(&hosts(), &prices()).unwrap();
        let (b, ib) = reconciler.reconcile(&reversed, &prices()).unwrap();

        assert_eq!(a, b);
        assert_eq!(ia, ib);
    }

    #[test]
    fn test_unknown_type_counts_as_zero() {
        let hosts = vec![
            HostSnapshot::new("h1", "mesos.A", Resources::new(4.0, 8192.0, 100.0)),
            HostSnapshot::new("h9", "mesos.Z", Resources::new(2.0, 4096.0, 50.0)),
        ];
        let (cluster, index) = ClusterReconciler::new().reconcile(&hosts, &prices()).unwrap();

        assert!((cluster.price_per_hr - 0.10).abs() < 1e-9);
        assert_eq!(cluster.members.get("Z"), Some(&1));
        assert_eq!(index.get("h9").unwrap().price_per_hr, 0.0);
    }

    #[test]
    fn test_custom_prefix_and_attribute() {
        let mut host = HostSnapshot::new("h1", "", Resources::new(1.0, 1.0, 1.0));
        host.attributes.clear();
        host.attributes.insert("ec2_type".to_string(), "aws:A".to_string());

        let reconciler = ClusterReconciler::new().with_prefix("aws:").with_attribute("ec2_type");
        let (cluster, _) = reconciler.reconcile(&[host], &prices()).unwrap();
        assert_eq!(cluster.members.get("A"), Some(&1));
    }

    #[test]
    fn test_type_without_prefix_is_kept() {
        let host = HostSnapshot::new("h1", "B", Resources::default());
        assert_eq!(ClusterReconciler::new().instance_type(&host), "B");
    }

    #[test]
    fn test_missing_attribute_is_unpriced() {
        let mut host = HostSnapshot::new("h1", "", Resources::new(1.0, 1.0, 1.0));
        host.attributes.clear();
        let (cluster, index) = ClusterReconciler::new().reconcile(&[host], &prices()).unwrap();
        assert_eq!(cluster.members.get(""), Some(&1));
        assert_eq!(index.get("h1").unwrap().price_per_hr, 0.0);
    }

    #[test]
    fn test_malformed_resources_fail_whole_call() {
        let mut hosts = hosts();
        hosts.push(HostSnapshot::new("h4", "mesos.A", Resources::new(f64::NAN, 1.0, 1.0)));
        let err = ClusterReconciler::new().reconcile(&hosts, &prices()).unwrap_err();
        assert!(matches!(err, CostError::MalformedSnapshot(msg) if msg.contains("h4")));
    }

    #[test]
    fn test_duplicate_active_hostname_is_malformed() {
        let hosts = vec![
            HostSnapshot::new("h1", "mesos.A", Resources::default()),
            HostSnapshot::new("h1", "mesos.B", Resources::default()),
        ];
        assert!(ClusterReconciler::new().reconcile(&hosts, &prices()).is_err());
    }

    #[test]
    fn test_malformed_inactive_host_is_ignored() {
        let hosts = vec![
            HostSnapshot::new("", "mesos.A", Resources::new(-1.0, 0.0, 0.0)).with_active(false),
            HostSnapshot::new("h1", "mesos.A", Resources::default()),
        ];
        let (cluster, _) = ClusterReconciler::new().reconcile(&hosts, &prices()).unwrap();
        assert_eq!(cluster.member_count, 1);
    }

    #[test]
    fn test_members_json_is_sorted() {
        let (cluster, _) = ClusterReconciler::new().reconcile(&hosts(), &prices()).unwrap();
        assert_eq!(cluster.members_json(), r#"{"A":1,"B":1}"#);
    }
}
