use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};
use url::Url;

use release_relay::config::RelayConfig;
use release_relay::database::{self, DbPool, repositories::*};
use release_relay::domain::{
    ChannelTarget, DeliveryStatus, EventKind, NewSubscription, SubscriptionFilter,
};
use release_relay::logging::{self, LOG_RETENTION_DAYS, LoggingOptions};
use release_relay::notification::{ChannelRegistry, Dispatcher, WebhookSink};
use release_relay::scheduler::{EventIngestor, PollScheduler};
use release_relay::source::{GitHubReleaseClient, GitHubReleaseClientConfig, ReleasePoller};

#[derive(Parser)]
#[command(name = "release-relay", version, about = "Relay upstream releases to subscribers")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Also write daily-rolling log files into this directory.
    #[arg(long, global = true, env = "RELAY_LOG_DIR")]
    log_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply database migrations.
    Migrate,
    /// Run one poll cycle.
    Poll {
        /// Tick timestamp (RFC 3339); defaults to now.
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
    /// Run one retry sweep over failed notifications.
    Retry {
        /// Sweep timestamp (RFC 3339); defaults to now.
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
    /// Start tracking an upstream repository.
    Track {
        /// Repository in `owner/name` form.
        repository: String,
    },
    /// Add a webhook subscription for a tracked resource.
    Subscribe {
        #[arg(long)]
        resource_id: i64,
        #[arg(long)]
        subscriber: String,
        /// Webhook URL to deliver to.
        #[arg(long)]
        webhook: Url,
        /// Filter as tagged JSON, e.g. `{"type":"prerelease","include_prereleases":false}`.
        #[arg(long)]
        filter: Option<String>,
    },
    /// List notifications.
    Notifications {
        #[arg(long)]
        status: Option<DeliveryStatus>,
        #[arg(long)]
        subscription_id: Option<i64>,
        #[arg(long)]
        event_id: Option<i64>,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
    /// List recorded events, newest first.
    Events {
        #[arg(long)]
        resource_id: Option<i64>,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
}

/// Collaborators for one invocation.
struct Relay {
    resources: Arc<SqlxResourceRegistry>,
    events: Arc<SqlxEventStore>,
    subscriptions: Arc<SqlxSubscriptionIndex>,
    notifications: Arc<SqlxNotificationRepository>,
    dispatcher: Arc<Dispatcher>,
}

impl Relay {
    fn new(pool: &DbPool, config: &RelayConfig) -> anyhow::Result<Self> {
        let resources = Arc::new(SqlxResourceRegistry::new(pool.clone()));
        let events = Arc::new(SqlxEventStore::new(pool.clone()));
        let subscriptions = Arc::new(SqlxSubscriptionIndex::new(pool.clone()));
        let notifications = Arc::new(SqlxNotificationRepository::new(pool.clone()));

        let channels = ChannelRegistry::new()
            .with_sink(Arc::new(WebhookSink::new(config.webhook.clone())?));
        let dispatcher = Arc::new(Dispatcher::new(
            notifications.clone(),
            events.clone(),
            resources.clone(),
            channels,
            config.dispatch.clone(),
        ));

        Ok(Self {
            resources,
            events,
            subscriptions,
            notifications,
            dispatcher,
        })
    }

    fn scheduler(&self, pool: &DbPool, config: &RelayConfig) -> anyhow::Result<PollScheduler> {
        let api_base = Url::parse(&config.source.api_base)
            .with_context(|| format!("invalid API base {}", config.source.api_base))?;
        let source = Arc::new(GitHubReleaseClient::new(GitHubReleaseClientConfig {
            api_base,
            token: config.source.token.clone(),
            request_timeout: config.source.request_timeout(),
            user_agent: config.source.user_agent.clone(),
        })?);
        let cursors = Arc::new(SqlxPollCursorStore::new(pool.clone()));

        Ok(PollScheduler::new(
            self.resources.clone(),
            ReleasePoller::new(source, cursors, config.source.request_timeout()),
            EventIngestor::new(
                self.events.clone(),
                self.subscriptions.clone(),
                self.dispatcher.clone(),
            ),
            config.scheduler.clone(),
        ))
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let _log_guard = logging::init_logging(&LoggingOptions {
        json: cli.json_logs,
        log_dir: cli.log_dir.clone(),
    })?;
    if let Some(dir) = &cli.log_dir
        && let Err(e) = logging::cleanup_old_logs(dir, LOG_RETENTION_DAYS).await
    {
        warn!(error = %e, "Failed to clean up old logs");
    }

    let config = RelayConfig::from_env()?;

    let pool = database::init_pool(&config.database_url).await?;
    database::run_migrations(&pool).await?;

    let relay = Relay::new(&pool, &config)?;

    match cli.command {
        Commands::Migrate => {
            info!(database = %config.database_url, "Database is up to date");
        }
        Commands::Poll { at } => {
            let report = relay
                .scheduler(&pool, &config)?
                .run_cycle(at.unwrap_or_else(Utc::now))
                .await?;
            print_json(&report)?;
        }
        Commands::Retry { at } => {
            let report = relay.dispatcher.retry_sweep(at.unwrap_or_else(Utc::now)).await?;
            print_json(&report)?;
        }
        Commands::Track { repository } => {
            let (owner, name) = repository
                .split_once('/')
                .filter(|(o, n)| !o.is_empty() && !n.is_empty() && !n.contains('/'))
                .with_context(|| format!("expected owner/name, got {repository}"))?;
            let resource = relay.resources.ensure_resource(owner, name).await?;
            print_json(&resource)?;
        }
        Commands::Subscribe {
            resource_id,
            subscriber,
            webhook,
            filter,
        } => {
            let resource = relay.resources.get(resource_id).await?;
            let filter = match filter {
                Some(raw) => SubscriptionFilter::from_json(&raw).context("invalid filter")?,
                None => SubscriptionFilter::All,
            };
            let id = relay
                .subscriptions
                .insert(&NewSubscription {
                    subscriber_id: subscriber,
                    resource_id: resource.id,
                    kind: EventKind::Release,
                    filter,
                    channels: vec![ChannelTarget::Webhook {
                        url: webhook.to_string(),
                    }],
                })
                .await?;
            info!(subscription_id = id, resource = %resource.key(), "Subscription added");
        }
        Commands::Notifications {
            status,
            subscription_id,
            event_id,
            limit,
        } => {
            let rows = relay
                .notifications
                .list(&NotificationQuery {
                    status,
                    subscription_id,
                    event_id,
                    limit,
                    ..Default::default()
                })
                .await?;
            print_json(&rows)?;
        }
        Commands::Events { resource_id, limit } => {
            let rows = relay
                .events
                .list(&EventQuery {
                    resource_id,
                    limit,
                    ..Default::default()
                })
                .await?;
            print_json(&rows)?;
        }
    }

    Ok(())
}
