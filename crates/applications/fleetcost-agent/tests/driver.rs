//! Poll-and-pass cycle against mock Marathon and Mesos

use chrono::{Duration as ChronoDuration, Utc};
use fleetcost_agent::{AgentConfig, AgentError, Driver, Location};
use fleetcost_core::{
    parse_checkpoint, Accountant, CheckpointStore, FileCheckpointStore, MemorySink, StaticPriceTable,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mock_cluster() -> (MockServer, MockServer) {
    let marathon = MockServer::start().await;
    let mesos = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v2/apps"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "apps": [{
                "id": "/team/api",
                "cpus": 0.5,
                "mem": 512.0,
                "disk": 0.0,
                "labels": {"creator": "ops", "env": "production", "version": "v42", "application": "api"},
                "tasksRunning": 2,
                "tasks": [
                    {"id": "team_api.1", "host": "10.0.0.1", "startedAt": "2024-03-01T12:00:00.000Z"},
                    {"id": "team_api.2", "host": "10.0.0.99", "startedAt": "2024-03-01T12:00:00.000Z"}
                ]
            }]
        })))
        .mount(&marathon)
        .await;

    Mock::given(method("GET"))
        .and(path("/state.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "leader": "",
            "slaves": [
                {"hostname": "10.0.0.1", "active": true,
                 "attributes": {"instance_type": "mesos.m4.large"},
                 "resources": {"cpus": 2.0, "mem": 7680.0, "disk": 20000}},
                {"hostname": "10.0.0.2", "active": true,
                 "attributes": {"instance_type": "mesos.c4.xlarge"},
                 "resources": {"cpus": 4.0, "mem": 7680.0, "disk": 20000}}
            ]
        })))
        .mount(&mesos)
        .await;

    (marathon, mesos)
}

fn config(marathon: &MockServer, mesos: &MockServer, checkpoint: &std::path::Path, cost_every: u64) -> AgentConfig {
    AgentConfig {
        marathon_url: marathon.uri(),
        mesos_url: mesos.uri(),
        checkpoint: Location::File(checkpoint.to_path_buf()),
        prices: Location::File("unused.json".into()),
        poll_interval: Duration::from_millis(10),
        cost_every,
        log_tasks: true,
        instance_type_prefix: "mesos.".to_string(),
        instance_type_attribute: "instance_type".to_string(),
        http_timeout: Duration::from_secs(5),
        region: "us-east-1".to_string(),
        listener: None,
    }
}

async fn driver(config: &AgentConfig, checkpoint: &std::path::Path) -> Driver<MemorySink> {
    let store = FileCheckpointStore::new(checkpoint);
    store.store(Utc::now() - ChronoDuration::hours(2)).await.unwrap();

    let prices = StaticPriceTable::from_map(HashMap::from([
        ("m4.large".to_string(), 0.10),
        ("c4.xlarge".to_string(), 0.20),
    ]));

    let accountant = Accountant::start(config.reconciler(), Arc::new(prices), Box::new(store), MemorySink::new())
        .await
        .unwrap();

    Driver::from_parts(config, accountant).unwrap()
}

#[tokio::test]
async fn test_run_once_bills_every_task() {
    let (marathon, mesos) = mock_cluster().await;
    let dir = tempfile::tempdir().unwrap();
    let checkpoint = dir.path().join("last_ran");
    let config = config(&marathon, &mesos, &checkpoint, 10);

    let mut driver = driver(&config, &checkpoint).await;
    let before = driver.accountant().last_ran();
    let report = driver.run_once().await.unwrap();

    assert_eq!(report.records_emitted, 2);
    assert_eq!(report.unresolved_hosts, 1);
    assert!((report.billable_hours - 2.0).abs() < 0.01);

    let sink = driver.accountant().sink();
    assert_eq!(sink.summaries.len(), 1);
    assert_eq!(sink.summaries[0].cluster_member_count, 2);
    assert!((sink.summaries[0].cluster_price_per_hr - 0.30).abs() < 1e-9);

    let known = &sink.records[0];
    assert_eq!(known.task_id, "team_api.1");
    assert_eq!(known.host_instance_type, "m4.large");
    assert_eq!(known.host_price_per_hr, 0.10);
    assert_eq!(known.container_created, "2024-03-01 12:00:00");

    let unknown = &sink.records[1];
    assert_eq!(unknown.host_instance_type, "");
    assert_eq!(unknown.host_price_per_hr, 0.0);
    assert_eq!(unknown.new_billable_hours, known.new_billable_hours);

    let raw = std::fs::read_to_string(&checkpoint).unwrap();
    let stored = parse_checkpoint("last_ran", &raw).unwrap();
    assert!(stored > before);
    assert_eq!(driver.accountant().last_ran(), report.watermark);
}

#[tokio::test]
async fn test_tick_runs_pass_every_nth_poll() {
    let (marathon, mesos) = mock_cluster().await;
    let dir = tempfile::tempdir().unwrap();
    let checkpoint = dir.path().join("last_ran");
    let config = config(&marathon, &mesos, &checkpoint, 3);

    let mut driver = driver(&config, &checkpoint).await;

    let mut passes = Vec::new();
    for tick in 0..7 {
        if driver.tick(tick).await.unwrap().is_some() {
            passes.push(tick);
        }
    }

    assert_eq!(passes, vec![0, 3, 6]);
    assert_eq!(driver.accountant().sink().summaries.len(), 3);
}

#[tokio::test]
async fn test_poll_failure_ends_run() {
    let marathon = MockServer::start().await;
    let mesos = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/apps"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&marathon)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let checkpoint = dir.path().join("last_ran");
    let config = config(&marathon, &mesos, &checkpoint, 1);

    let mut driver = driver(&config, &checkpoint).await;
    let before = driver.accountant().last_ran();
    let result = driver.run().await;

    assert!(matches!(result, Err(AgentError::Status { .. })));
    assert_eq!(driver.accountant().last_ran(), before);
    assert!(driver.accountant().sink().records.is_empty());
}

#[tokio::test]
async fn test_zero_cost_every_rejected() {
    let (marathon, mesos) = mock_cluster().await;
    let dir = tempfile::tempdir().unwrap();
    let checkpoint = dir.path().join("last_ran");
    let config = config(&marathon, &mesos, &checkpoint, 0);

    let store = FileCheckpointStore::new(&checkpoint);
    store.store(Utc::now()).await.unwrap();
    let accountant = Accountant::start(
        config.reconciler(),
        Arc::new(StaticPriceTable::default()),
        Box::new(store),
        MemorySink::new(),
    )
    .await
    .unwrap();

    assert!(matches!(Driver::from_parts(&config, accountant), Err(AgentError::Config(_))));
}
