use crate::backend::http::HttpBackend;
use crate::backend::local::LocalBackend;
use crate::backend::Backend;
use crate::config::{self, BackendChoice, Config, ConfigError};
use crate::core::poller::{Baseline, Poller};
use crate::core::scheduler::Scheduler;
use crate::persistence::FileStore;
use crate::shared::git::{self, GitMetadata};
use crate::shared::metrics::{Metrics, MetricsSnapshot};
use crate::shared::signal::shutdown_signal;
use crate::target::dispatcher::Dispatcher;
use crate::target::payload::{Target, TargetError};
use crate::target::slack::SlackTarget;
use crate::target::stdout::StdoutTarget;
use crate::target::webhook::WebhookTarget;
use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// A fully wired detector: targets, backend and store built from the
/// configuration, with the baseline snapshot already established.
pub struct Infralog {
    config: Config,
    poller: Poller,
    metrics: Arc<Metrics>,
}

impl Infralog {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let targets = build_targets(&config).context("Failed to initialize targets")?;
        let dispatcher = Dispatcher::new(targets);
        info!(targets = ?dispatcher.target_names(), "Targets initialized");

        let backend = build_backend(&config).context("Failed to initialize tfstate backend")?;
        info!(backend = backend.name(), source = %backend.source(), "Backend initialized");

        let metrics = Arc::new(Metrics::new());
        let mut poller = Poller::new(
            backend,
            dispatcher,
            config.filter.to_filter(),
            metrics.clone(),
        )
        .with_git(git_context());

        if let Some(path) = config.state_file() {
            let store = FileStore::new(&path).with_context(|| {
                format!("Failed to initialize persistence at {}", path.display())
            })?;
            info!(path = %path.display(), "Persistence enabled");
            poller = poller.with_store(Box::new(store));
        }

        match poller
            .bootstrap()
            .await
            .context("Failed to establish initial state")?
        {
            Baseline::Persisted => info!("Resuming from persisted state"),
            Baseline::Fetched => info!("Initial state fetched"),
        }

        Ok(Self {
            config,
            poller,
            metrics,
        })
    }

    pub fn poller_mut(&mut self) -> &mut Poller {
        &mut self.poller
    }

    /// Poll until `shutdown` flips to `true`, then return the final counters.
    pub async fn run(mut self, shutdown: watch::Receiver<bool>) -> MetricsSnapshot {
        let scheduler = Scheduler::new(self.config.polling_interval());
        info!(
            interval_secs = scheduler.interval().as_secs(),
            "Starting polling loop"
        );

        scheduler.run(shutdown, &mut self.poller).await;

        let summary = self.metrics.snapshot();
        log_summary(&summary);
        summary
    }
}

pub fn build_targets(config: &Config) -> Result<Vec<Box<dyn Target>>, TargetError> {
    let mut targets: Vec<Box<dyn Target>> = Vec::new();

    let webhook = &config.target.webhook;
    if webhook.is_enabled() {
        let target = WebhookTarget::new(&webhook.url, &webhook.method, webhook.retry.to_policy())?;
        debug!(method = %target.method(), max_attempts = target.policy().max_attempts, "Webhook target enabled");
        targets.push(Box::new(target));
    }

    let slack = &config.target.slack;
    if slack.is_enabled() {
        targets.push(Box::new(SlackTarget::new(
            &slack.webhook_url,
            Some(&slack.channel),
            Some(&slack.username),
            Some(&slack.icon_emoji),
        )?));
        debug!("Slack target enabled");
    }

    let stdout = &config.target.stdout;
    if stdout.enabled {
        targets.push(Box::new(StdoutTarget::new(stdout.output_format())));
        debug!(format = ?stdout.output_format(), "Stdout target enabled");
    }

    Ok(targets)
}

pub fn build_backend(config: &Config) -> Result<Box<dyn Backend>, ConfigError> {
    match config.backend() {
        Some(BackendChoice::Local(path)) => Ok(Box::new(LocalBackend::new(path))),
        Some(BackendChoice::Http { url, timeout }) => Ok(Box::new(HttpBackend::new(url, timeout))),
        None => Err(ConfigError::NoBackend),
    }
}

fn git_context() -> Option<GitMetadata> {
    let dir = std::env::current_dir().ok()?;
    let metadata = git::extract(&dir);
    if let Some(meta) = &metadata {
        debug!(branch = %meta.branch, commit = meta.short_sha(), "Git context detected");
    }
    metadata
}

fn log_summary(summary: &MetricsSnapshot) {
    let poll_errors: u64 = summary.poll_errors.values().sum();
    let notifications_sent: u64 = summary.notifications_sent.values().sum();
    let notification_errors: u64 = summary.notification_errors.values().sum();

    info!(
        polls_succeeded = summary.polls_succeeded,
        poll_errors,
        changes = summary.total_changes(),
        notifications_sent,
        notification_errors,
        "Shutting down"
    );
}

/// Load configuration, wire everything up and poll until SIGINT/SIGTERM.
pub async fn run(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = config::load(config_path).context("Failed to load configuration")?;
    let infralog = Infralog::new(config).await?;
    infralog.run(shutdown_signal()).await;
    Ok(())
}
