//! fleetcost - cluster cost accounting
//!
//! ## Usage
//!
//! ```bash
//! # Poll forever, running a cost pass every 10th poll
//! fleetcost --marathon marathon:8080 --mesos mesos:5050 \
//!     --checkpoint s3://infra-accountant/last_ran
//!
//! # One poll and one pass, then exit
//! fleetcost pass --marathon marathon:8080 --mesos mesos:5050 --checkpoint ./last_ran
//!
//! # Inspect or seed the billing watermark
//! fleetcost checkpoint show --checkpoint ./last_ran
//! fleetcost checkpoint init --checkpoint ./last_ran --at 2024-03-01T00:00:00Z
//!
//! # Check a price, and what one instance has cost since launch
//! fleetcost prices lookup m4.large
//! fleetcost prices lookup m4.large --since 2024-03-01T00:00:00Z
//! ```

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use fleetcost_agent::{
    checkpoint_store,
    config::{
        normalize_base_url, parse_duration, DEFAULT_COST_EVERY, DEFAULT_HTTP_TIMEOUT, DEFAULT_LISTEN_PORT,
        DEFAULT_POLL_INTERVAL, DEFAULT_PRICES,
    },
    create_s3_client, init_tracing,
    listener::{self, EVENT_CHANNEL_CAPACITY},
    load_prices, AgentConfig, Driver, ListenerConfig, Location, LogFormat, Subscription,
};
use fleetcost_core::{format_checkpoint, CostError, PriceTable, DEFAULT_INSTANCE_TYPE_ATTRIBUTE, DEFAULT_INSTANCE_TYPE_PREFIX};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// fleetcost: per-container cost accounting for Mesos/Marathon clusters
#[derive(Parser)]
#[command(name = "fleetcost")]
#[command(about = "Per-container cost accounting for Mesos/Marathon clusters", long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    /// Log line format
    #[arg(long, env = "LOG_FORMAT", global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// AWS region for S3 locations
    #[arg(long, env = "AWS_REGION", global = true, default_value = "us-east-1")]
    region: String,

    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    agent: AgentArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll and account forever (default)
    Run(AgentArgs),

    /// Poll once, run one cost pass, exit
    Pass(AgentArgs),

    /// Billing watermark management
    Checkpoint {
        #[command(subcommand)]
        action: CheckpointAction,
    },

    /// Price table queries
    Prices {
        #[command(subcommand)]
        action: PricesAction,
    },
}

#[derive(Subcommand)]
enum CheckpointAction {
    /// Print the stored watermark
    Show {
        /// Watermark location (path or s3://bucket/key)
        #[arg(long, env = "LAST_RAN_PATH")]
        checkpoint: String,
    },

    /// Write an initial watermark
    Init {
        /// Watermark location (path or s3://bucket/key)
        #[arg(long, env = "LAST_RAN_PATH")]
        checkpoint: String,

        /// RFC 3339 time to start billing from (default: now)
        #[arg(long)]
        at: Option<DateTime<Utc>>,

        /// Overwrite an existing watermark
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum PricesAction {
    /// Print the hourly price of an instance type
    Lookup {
        /// Instance type without prefix (e.g. m4.large)
        instance_type: String,

        /// Price table location (path or s3://bucket/key)
        #[arg(long, env = "PRICES_PATH", default_value = DEFAULT_PRICES)]
        prices: String,

        /// Also print the total spent on an instance launched at this RFC 3339 time
        #[arg(long)]
        since: Option<DateTime<Utc>>,
    },
}

#[derive(Args, Clone)]
struct AgentArgs {
    /// Marathon base URL or host:port
    #[arg(long, env = "MARATHON_URL")]
    marathon: Option<String>,

    /// Mesos master base URL or host:port
    #[arg(long, env = "MESOS_URL")]
    mesos: Option<String>,

    /// Watermark location (path or s3://bucket/key)
    #[arg(long, env = "LAST_RAN_PATH")]
    checkpoint: Option<String>,

    /// Price table location (path or s3://bucket/key)
    #[arg(long, env = "PRICES_PATH", default_value = DEFAULT_PRICES)]
    prices: String,

    /// Time between polls (e.g. 5s, 500ms, 1m)
    #[arg(long, env = "POLL_INTERVAL", default_value = DEFAULT_POLL_INTERVAL, value_parser = parse_duration)]
    poll_interval: Duration,

    /// Run a cost pass every n-th poll
    #[arg(long, env = "COST_EVERY", default_value_t = DEFAULT_COST_EVERY)]
    cost_every: u64,

    /// Log one gauge per Marathon task
    #[arg(long, env = "LOG_MARATHON_TASKS")]
    log_tasks: bool,

    /// Prefix stripped from the instance-type attribute
    #[arg(long, env = "INSTANCE_TYPE_PREFIX", default_value = DEFAULT_INSTANCE_TYPE_PREFIX)]
    instance_type_prefix: String,

    /// Host attribute carrying the instance type
    #[arg(long, env = "INSTANCE_TYPE_ATTRIBUTE", default_value = DEFAULT_INSTANCE_TYPE_ATTRIBUTE)]
    instance_type_attribute: String,

    /// HTTP request timeout
    #[arg(long, env = "HTTP_TIMEOUT", default_value = DEFAULT_HTTP_TIMEOUT, value_parser = parse_duration)]
    http_timeout: Duration,

    /// Host Marathon calls back for push events (enables the listener)
    #[arg(long, env = "HOST")]
    listen_host: Option<String>,

    /// Port the push listener binds
    #[arg(long, env = "LISTEN_PORT", default_value_t = DEFAULT_LISTEN_PORT)]
    listen_port: u16,

    /// Port Marathon calls (defaults to the listen port)
    #[arg(long, env = "PORT")]
    external_port: Option<u16>,
}

impl AgentArgs {
    fn into_config(self, region: String) -> anyhow::Result<AgentConfig> {
        let marathon = self
            .marathon
            .ok_or_else(|| anyhow::anyhow!("--marathon (MARATHON_URL) is required"))?;
        let mesos = self
            .mesos
            .ok_or_else(|| anyhow::anyhow!("--mesos (MESOS_URL) is required"))?;
        let checkpoint = self
            .checkpoint
            .ok_or_else(|| anyhow::anyhow!("--checkpoint (LAST_RAN_PATH) is required"))?;

        let listener = self.listen_host.map(|host| ListenerConfig {
            host,
            listen_port: self.listen_port,
            external_port: self.external_port.unwrap_or(self.listen_port),
        });

        let config = AgentConfig {
            marathon_url: normalize_base_url(&marathon),
            mesos_url: normalize_base_url(&mesos),
            checkpoint: checkpoint.parse()?,
            prices: self.prices.parse()?,
            poll_interval: self.poll_interval,
            cost_every: self.cost_every,
            log_tasks: self.log_tasks,
            instance_type_prefix: self.instance_type_prefix,
            instance_type_attribute: self.instance_type_attribute,
            http_timeout: self.http_timeout,
            region,
            listener,
        };
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let result = match cli.command {
        None => run(cli.agent.into_config(cli.region)?).await,
        Some(Commands::Run(args)) => run(args.into_config(cli.region)?).await,
        Some(Commands::Pass(args)) => single_pass(args.into_config(cli.region)?).await,
        Some(Commands::Checkpoint { action }) => handle_checkpoint(action, &cli.region).await,
        Some(Commands::Prices { action }) => handle_prices(action, &cli.region).await,
    };

    if let Err(e) = &result {
        error!("❌ {:#}", e);
    }
    result
}

/// Poll forever, with the push listener alongside when configured
async fn run(config: AgentConfig) -> anyhow::Result<()> {
    info!("🚀 fleetcost starting");
    info!("📡 Marathon: {} | Mesos: {}", config.marathon_url, config.mesos_url);
    info!("💾 Checkpoint: {} | 💲 Prices: {}", config.checkpoint, config.prices);

    let mut driver = Driver::start(&config).await?;

    let subscription = match &config.listener {
        Some(listener_config) => Some(start_listener(&config, listener_config).await?),
        None => {
            info!("🔕 Push listener disabled (no --listen-host)");
            None
        }
    };

    let outcome = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("🛑 Shutting down...");
            Ok(())
        }
        result = driver.run() => {
            result.map_err(anyhow::Error::from)
        }
    };

    if let Some(subscription) = subscription {
        if let Err(e) = subscription.unsubscribe().await {
            warn!("⚠️  Failed to unsubscribe: {}", e);
        }
    }

    outcome
}

async fn start_listener(config: &AgentConfig, listener_config: &ListenerConfig) -> anyhow::Result<Subscription> {
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

    tokio::spawn(listener::log_events(rx));

    let server_config = listener_config.clone();
    tokio::spawn(async move {
        if let Err(e) = listener::serve(&server_config, tx).await {
            error!("❌ Push listener stopped: {}", e);
        }
    });

    let subscription = Subscription::new(&config.marathon_url, listener_config, config.http_timeout)?;
    subscription.subscribe().await?;
    info!("👂 Listening for Marathon events at {}", subscription.callback_url());

    Ok(subscription)
}

async fn single_pass(config: AgentConfig) -> anyhow::Result<()> {
    let mut driver = Driver::start(&config).await?;
    let report = driver.run_once().await?;

    info!(
        "✅ Billed {:.4}h to {} containers, watermark {}",
        report.billable_hours,
        report.records_emitted,
        format_checkpoint(report.watermark)
    );
    Ok(())
}

async fn s3_for(location: &Location, region: &str) -> Option<aws_sdk_s3::Client> {
    if location.is_s3() {
        Some(create_s3_client(region).await)
    } else {
        None
    }
}

async fn handle_checkpoint(action: CheckpointAction, region: &str) -> anyhow::Result<()> {
    match action {
        CheckpointAction::Show { checkpoint } => {
            let location: Location = checkpoint.parse()?;
            let store = checkpoint_store(&location, s3_for(&location, region).await)?;

            let at = store.load().await?;
            let behind = Utc::now().signed_duration_since(at);
            println!("{}", format_checkpoint(at));
            info!("📍 {} is {:.2}h behind now", store.describe(), behind.num_seconds() as f64 / 3600.0);
        }

        CheckpointAction::Init { checkpoint, at, force } => {
            let location: Location = checkpoint.parse()?;
            let store = checkpoint_store(&location, s3_for(&location, region).await)?;

            match store.load().await {
                Err(CostError::CheckpointMissing(_)) => {}
                Ok(_) | Err(CostError::CheckpointParse { .. }) if force => {}
                Ok(existing) => {
                    anyhow::bail!(
                        "{} already holds {}; pass --force to overwrite",
                        store.describe(),
                        format_checkpoint(existing)
                    );
                }
                Err(e) => return Err(e.into()),
            }

            let at = at.unwrap_or_else(Utc::now);
            store.store(at).await?;
            info!("✅ Wrote {} to {}", format_checkpoint(at), store.describe());
        }
    }

    Ok(())
}

async fn handle_prices(action: PricesAction, region: &str) -> anyhow::Result<()> {
    match action {
        PricesAction::Lookup { instance_type, prices, since } => {
            let location: Location = prices.parse()?;
            let table = load_prices(&location, s3_for(&location, region).await.as_ref()).await?;

            let price = table.per_hour(&instance_type)?;
            println!("{} ${:.4}/hr", instance_type, price);

            if let Some(created) = since {
                let spent = table.total_spent(&instance_type, created, Utc::now())?;
                println!("{} ${:.2} since {}", instance_type, spent, format_checkpoint(created));
            }
        }
    }

    Ok(())
}
