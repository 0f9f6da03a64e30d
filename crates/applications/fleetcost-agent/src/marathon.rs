//! Marathon app/task polling
//!
//! ## Endpoint
//!
//! ```text
//! GET /v2/apps?embed=apps.tasks
//! ```
//!
//! Only the fields the agent uses are decoded; everything else in the
//! response is ignored. Missing fields take their default value.
//!
//! Every poll also emits state gauges:
//!
//! - `marathon-summary`: app count, running and staged task totals
//! - `marathon-apps.<app>`: one per app
//! - `marathon-tasks.<task>`: one per task, only with `--log-tasks`

use crate::error::Result;
use crate::http::{build_client, get_json};
use fleetcost_core::{AppSnapshot, Resources, TaskSnapshot};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::info;

/// Tracing target for Marathon gauges
pub const MARATHON_TARGET: &str = "fleetcost::marathon";

/// Marathon app with embedded tasks
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct App {
    /// App ID (e.g. `/team/service`)
    pub id: String,

    /// Requested instances
    pub instances: i64,

    /// CPUs per task
    pub cpus: f64,

    /// Memory per task (MB)
    pub mem: f64,

    /// Disk per task (MB)
    pub disk: f64,

    /// Container definition
    pub container: Option<Container>,

    /// App labels
    pub labels: BTreeMap<String, String>,

    /// App version
    pub version: String,

    /// Staged task count
    pub tasks_staged: u64,

    /// Running task count
    pub tasks_running: u64,

    /// Healthy task count
    pub tasks_healthy: u64,

    /// Unhealthy task count
    pub tasks_unhealthy: u64,

    /// Tasks (present with `embed=apps.tasks`)
    pub tasks: Vec<Task>,
}

/// Container definition
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Container {
    /// Docker settings
    pub docker: Option<Docker>,
}

/// Docker settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Docker {
    /// Image reference
    pub image: String,
}

/// One Marathon task
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Task {
    /// Task ID
    pub id: String,

    /// Owning app ID
    pub app_id: String,

    /// Agent hostname
    pub host: String,

    /// Start time (absent while staging)
    pub started_at: Option<String>,

    /// Staging time
    pub staged_at: Option<String>,

    /// App version the task runs
    pub version: String,
}

#[derive(Debug, Deserialize)]
struct AppsResponse {
    #[serde(default)]
    apps: Vec<App>,
}

impl App {
    /// Docker image, or empty
    pub fn image(&self) -> &str {
        self.container
            .as_ref()
            .and_then(|c| c.docker.as_ref())
            .map(|d| d.image.as_str())
            .unwrap_or("")
    }
}

impl From<&App> for AppSnapshot {
    fn from(app: &App) -> Self {
        Self {
            id: app.id.clone(),
            labels: app.labels.clone(),
            resources: Resources::new(app.cpus, app.mem, app.disk),
            tasks_running: app.tasks_running,
            tasks_staged: app.tasks_staged,
            tasks: app
                .tasks
                .iter()
                .map(|t| TaskSnapshot {
                    id: t.id.clone(),
                    host: t.host.clone(),
                    started_at: t.started_at.clone().unwrap_or_default(),
                })
                .collect(),
        }
    }
}

/// Marathon REST client
#[derive(Debug, Clone)]
pub struct MarathonClient {
    client: reqwest::Client,
    base_url: String,
}

impl MarathonClient {
    /// Create a client for a Marathon base URL
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.into(),
        })
    }

    /// Fetch all apps with their tasks
    pub async fn get_apps(&self) -> Result<Vec<App>> {
        let url = format!("{}/v2/apps?embed=apps.tasks", self.base_url);
        let response: AppsResponse = get_json(&self.client, &url).await?;
        Ok(response.apps)
    }
}

/// `/team/api` → `team.api`
pub fn normalize_app_id(app_id: &str) -> String {
    app_id.strip_prefix('/').unwrap_or(app_id).replace('/', ".")
}

/// Emit summary, per-app and (optionally) per-task gauges
pub fn log_state(apps: &[App], log_tasks: bool) {
    let running: u64 = apps.iter().map(|a| a.tasks_running).sum();
    let staged: u64 = apps.iter().map(|a| a.tasks_staged).sum();

    for app in apps {
        log_app(app, log_tasks);
    }

    info!(
        target: MARATHON_TARGET,
        title = "marathon-summary",
        total_apps = apps.len(),
        running_tasks = running,
        staged_tasks = staged,
        r#type = "gauge",
    );
}

fn log_app(app: &App, log_tasks: bool) {
    info!(
        target: MARATHON_TARGET,
        title = %format!("marathon-apps.{}", normalize_app_id(&app.id)),
        app_id = %app.id,
        instances = app.instances,
        cpus = app.cpus,
        mem = app.mem,
        disk = app.disk,
        image = %app.image(),
        version = %app.version,
        tasks_staged = app.tasks_staged,
        tasks_healthy = app.tasks_healthy,
        tasks_running = app.tasks_running,
        tasks_unhealthy = app.tasks_unhealthy,
        r#type = "gauge",
    );

    if !log_tasks {
        return;
    }

    for task in &app.tasks {
        info!(
            target: MARATHON_TARGET,
            title = %format!("marathon-tasks.{}", task.id),
            app_id = %task.app_id,
            id = %task.id,
            started_at = %task.started_at.as_deref().unwrap_or(""),
            staged_at = %task.staged_at.as_deref().unwrap_or(""),
            version = %task.version,
            r#type = "gauge",
        );
    }
}
