//! Marathon push-event listener
//!
//! ## Flow
//!
//! ```text
//! Subscription::subscribe()  ──► Marathon registers http://{host}:{external}/ms-push-listener
//!
//! Marathon ──POST /ms-push-listener──► router ──status_update_event──► mpsc ──► log_events
//! ```
//!
//! Events are logged as `marathon-event` lines and nothing else. The
//! accounting pass never sees them; it works from fresh polls.

use crate::config::ListenerConfig;
use crate::error::{AgentError, Result};
use crate::http::{build_client, get_json};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Path Marathon posts events to
pub const LISTENER_PATH: &str = "/ms-push-listener";

/// The only event type forwarded
pub const STATUS_UPDATE_EVENT: &str = "status_update_event";

/// Tracing target for push events
pub const EVENT_TARGET: &str = "fleetcost::events";

/// Buffered events between the HTTP handler and the logger
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A Marathon event-bus message
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MarathonEvent {
    /// Event kind, e.g. `status_update_event`
    pub event_type: String,
    /// Event timestamp as sent
    pub timestamp: String,
    /// Mesos agent ID
    pub slave_id: String,
    /// Task ID
    pub task_id: String,
    /// New task state, e.g. `TASK_RUNNING`
    pub task_status: String,
    /// App ID
    pub app_id: String,
    /// Agent hostname
    pub host: String,
    /// Host ports
    pub ports: Vec<u16>,
    /// App version
    pub version: String,
}

#[derive(Debug, Deserialize)]
struct SubscriptionList {
    #[serde(default, rename = "callbackUrls")]
    callback_urls: Vec<String>,
}

/// Marathon event-bus registration for this process
#[derive(Debug, Clone)]
pub struct Subscription {
    client: reqwest::Client,
    marathon_url: String,
    callback_url: String,
}

impl Subscription {
    /// Registration for the callback described by `config`
    pub fn new(marathon_url: impl Into<String>, config: &ListenerConfig, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            marathon_url: marathon_url.into(),
            callback_url: format!("http://{}:{}{}", config.host, config.external_port, LISTENER_PATH),
        })
    }

    /// URL Marathon will call
    pub fn callback_url(&self) -> &str {
        &self.callback_url
    }

    fn endpoint(&self) -> String {
        format!("{}/v2/eventSubscriptions", self.marathon_url)
    }

    /// Drop stale listener callbacks, then register ours
    pub async fn subscribe(&self) -> Result<()> {
        let list: SubscriptionList = get_json(&self.client, &self.endpoint()).await?;

        for stale in list.callback_urls.iter().filter(|url| url.contains(LISTENER_PATH)) {
            self.delete(stale).await?;
        }

        let response = self
            .client
            .post(self.endpoint())
            .query(&[("callbackUrl", self.callback_url.as_str())])
            .send()
            .await?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(AgentError::subscription(format!(
                "subscribing {} returned {}",
                self.callback_url,
                response.status()
            )));
        }

        info!(callback = %self.callback_url, "Subscribed to Marathon events");
        Ok(())
    }

    /// Remove our callback
    pub async fn unsubscribe(&self) -> Result<()> {
        self.delete(&self.callback_url).await?;
        info!(callback = %self.callback_url, "Unsubscribed from Marathon events");
        Ok(())
    }

    async fn delete(&self, callback: &str) -> Result<()> {
        debug!(callback = %callback, "Removing event subscription");

        let response = self
            .client
            .delete(self.endpoint())
            .query(&[("callbackUrl", callback)])
            .send()
            .await?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(AgentError::subscription(format!(
                "unsubscribing {} returned {}",
                callback,
                response.status()
            )));
        }

        Ok(())
    }
}

/// Router with the single event endpoint
pub fn router(events: mpsc::Sender<MarathonEvent>) -> Router {
    Router::new()
        .route(LISTENER_PATH, post(handle_event))
        .with_state(events)
}

async fn handle_event(
    State(events): State<mpsc::Sender<MarathonEvent>>,
    body: Bytes,
) -> (StatusCode, &'static str) {
    let event: MarathonEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "Undecodable Marathon event");
            return (StatusCode::BAD_REQUEST, "Bad event.");
        }
    };

    if event.event_type == STATUS_UPDATE_EVENT && events.send(event).await.is_err() {
        warn!("Event consumer is gone, dropping status update");
    }

    // Marathon ignores the reply body
    (StatusCode::OK, "Thanks.")
}

/// Bind `0.0.0.0:{listen_port}` and serve until the process exits
pub async fn serve(config: &ListenerConfig, events: mpsc::Sender<MarathonEvent>) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.listen_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("Push listener on {}", addr);
    axum::serve(listener, router(events)).await?;
    Ok(())
}

/// Log every status update until the channel closes
pub async fn log_events(mut events: mpsc::Receiver<MarathonEvent>) {
    while let Some(event) = events.recv().await {
        info!(
            target: EVENT_TARGET,
            title = "marathon-event",
            event_type = %event.event_type,
            timestamp = %event.timestamp,
            task_id = %event.task_id,
            task_status = %event.task_status,
            app_id = %event.app_id,
            host = %event.host,
            slave_id = %event.slave_id,
            version = %event.version,
        );
    }
}
