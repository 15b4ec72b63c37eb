use crate::backend::http::DEFAULT_TIMEOUT_SECS;
use crate::target::retry::{
    RetryPolicy, DEFAULT_INITIAL_DELAY_MS, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY_MS,
    DEFAULT_RETRY_STATUS_CODES,
};
use crate::target::stdout::OutputFormat;
use crate::tfstate::filter::Filter;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const CONFIG_FILE_ENV: &str = "INFRALOG_CONFIG_FILE";
pub const DEFAULT_POLLING_INTERVAL_SECS: u64 = 300;

const ENV_POLLING_INTERVAL: &str = "INFRALOG_POLLING_INTERVAL";
const ENV_TFSTATE_LOCAL_PATH: &str = "INFRALOG_TFSTATE_LOCAL_PATH";
const ENV_TFSTATE_HTTP_URL: &str = "INFRALOG_TFSTATE_HTTP_URL";
const ENV_WEBHOOK_URL: &str = "INFRALOG_TARGET_WEBHOOK_URL";
const ENV_WEBHOOK_METHOD: &str = "INFRALOG_TARGET_WEBHOOK_METHOD";
const ENV_WEBHOOK_RETRY_MAX_ATTEMPTS: &str = "INFRALOG_TARGET_WEBHOOK_RETRY_MAX_ATTEMPTS";
const ENV_WEBHOOK_RETRY_INITIAL_DELAY_MS: &str = "INFRALOG_TARGET_WEBHOOK_RETRY_INITIAL_DELAY_MS";
const ENV_WEBHOOK_RETRY_MAX_DELAY_MS: &str = "INFRALOG_TARGET_WEBHOOK_RETRY_MAX_DELAY_MS";
const ENV_WEBHOOK_RETRY_ON_STATUS: &str = "INFRALOG_TARGET_WEBHOOK_RETRY_RETRY_ON_STATUS";
const ENV_SLACK_WEBHOOK_URL: &str = "INFRALOG_TARGET_SLACK_WEBHOOK_URL";
const ENV_SLACK_CHANNEL: &str = "INFRALOG_TARGET_SLACK_CHANNEL";
const ENV_SLACK_USERNAME: &str = "INFRALOG_TARGET_SLACK_USERNAME";
const ENV_SLACK_ICON_EMOJI: &str = "INFRALOG_TARGET_SLACK_ICON_EMOJI";
const ENV_STDOUT_ENABLED: &str = "INFRALOG_TARGET_STDOUT_ENABLED";
const ENV_STDOUT_FORMAT: &str = "INFRALOG_TARGET_STDOUT_FORMAT";
const ENV_FILTER_RESOURCE_TYPES: &str = "INFRALOG_FILTER_RESOURCE_TYPES";
const ENV_FILTER_OUTPUTS: &str = "INFRALOG_FILTER_OUTPUTS";
const ENV_PERSISTENCE_STATE_FILE: &str = "INFRALOG_PERSISTENCE_STATE_FILE";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    ConfigFileNotFound(String),

    #[error("Failed to parse config file {path}: {message}")]
    ParseError { path: String, message: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("No tfstate backend configured (set tfstate.local.path or tfstate.http.url)")]
    NoBackend,

    #[error("Polling interval must be greater than zero")]
    InvalidInterval,

    #[error("Invalid target configuration: {0}")]
    InvalidTarget(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub polling: PollingConfig,
    pub tfstate: TfStateConfig,
    pub target: TargetConfig,
    pub filter: FilterConfig,
    pub persistence: PersistenceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Seconds between polls.
    pub interval: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLLING_INTERVAL_SECS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TfStateConfig {
    pub local: LocalStateConfig,
    pub http: HttpStateConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalStateConfig {
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpStateConfig {
    pub url: String,
    /// Zero means the default request timeout.
    pub timeout_secs: u64,
}

/// The backend selected from [`TfStateConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendChoice {
    Local(PathBuf),
    Http { url: String, timeout: Duration },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub webhook: WebhookConfig,
    pub slack: SlackConfig,
    pub stdout: StdoutConfig,
}

/// Enabled when `url` is non-empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub url: String,
    pub method: String,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub retry_on_status: Option<Vec<u16>>,
}

/// Enabled when `webhook_url` is non-empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlackConfig {
    pub webhook_url: String,
    pub channel: String,
    pub username: String,
    pub icon_emoji: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StdoutConfig {
    pub enabled: bool,
    pub format: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub resource_types: Option<Vec<String>>,
    pub outputs: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub state_file: Option<String>,
}

impl RetryConfig {
    /// Replace zero or missing fields with the default retry settings.
    pub fn with_defaults(&self) -> Self {
        let mut retry = self.clone();
        if retry.max_attempts == 0 {
            retry.max_attempts = DEFAULT_MAX_ATTEMPTS;
        }
        if retry.initial_delay_ms == 0 {
            retry.initial_delay_ms = DEFAULT_INITIAL_DELAY_MS;
        }
        if retry.max_delay_ms == 0 {
            retry.max_delay_ms = DEFAULT_MAX_DELAY_MS;
        }
        if retry.retry_on_status.is_none() {
            retry.retry_on_status = Some(DEFAULT_RETRY_STATUS_CODES.to_vec());
        }
        retry
    }

    pub fn to_policy(&self) -> RetryPolicy {
        let retry = self.with_defaults();
        RetryPolicy {
            max_attempts: retry.max_attempts,
            initial_delay: Duration::from_millis(retry.initial_delay_ms),
            max_delay: Duration::from_millis(retry.max_delay_ms),
            retry_status_codes: retry.retry_on_status.unwrap_or_default().into_iter().collect(),
        }
    }
}

impl FilterConfig {
    pub fn to_filter(&self) -> Filter {
        Filter {
            resource_types: self
                .resource_types
                .as_ref()
                .map(|types| types.iter().cloned().collect()),
            outputs: self
                .outputs
                .as_ref()
                .map(|outputs| outputs.iter().cloned().collect()),
        }
    }
}

impl WebhookConfig {
    pub fn is_enabled(&self) -> bool {
        !self.url.is_empty()
    }
}

impl SlackConfig {
    pub fn is_enabled(&self) -> bool {
        !self.webhook_url.is_empty()
    }

    fn has_overrides(&self) -> bool {
        !self.channel.is_empty() || !self.username.is_empty() || !self.icon_emoji.is_empty()
    }
}

impl StdoutConfig {
    pub fn output_format(&self) -> OutputFormat {
        OutputFormat::parse(&self.format)
    }
}

impl Config {
    /// Selected backend. A local path wins over an HTTP URL.
    pub fn backend(&self) -> Option<BackendChoice> {
        if !self.tfstate.local.path.is_empty() {
            return Some(BackendChoice::Local(PathBuf::from(&self.tfstate.local.path)));
        }
        if !self.tfstate.http.url.is_empty() {
            let secs = match self.tfstate.http.timeout_secs {
                0 => DEFAULT_TIMEOUT_SECS,
                secs => secs,
            };
            return Some(BackendChoice::Http {
                url: self.tfstate.http.url.clone(),
                timeout: Duration::from_secs(secs),
            });
        }
        None
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling.interval)
    }

    pub fn state_file(&self) -> Option<PathBuf> {
        self.persistence
            .state_file
            .as_deref()
            .filter(|path| !path.is_empty())
            .map(PathBuf::from)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.polling.interval == 0 {
            return Err(ConfigError::InvalidInterval);
        }
        if self.backend().is_none() {
            return Err(ConfigError::NoBackend);
        }

        let webhook = &self.target.webhook;
        let method = webhook.method.trim();
        if webhook.is_enabled()
            && !method.is_empty()
            && !["POST", "PUT"]
                .iter()
                .any(|m| m.eq_ignore_ascii_case(method))
        {
            return Err(ConfigError::InvalidTarget(format!(
                "unsupported webhook method {:?} (must be POST or PUT)",
                webhook.method
            )));
        }

        let slack = &self.target.slack;
        if !slack.is_enabled() && slack.has_overrides() {
            return Err(ConfigError::InvalidTarget(
                "slack webhook_url is required".to_string(),
            ));
        }

        Ok(())
    }

    /// Overlay `INFRALOG_*` variables read through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };

        env.set_u64(&mut self.polling.interval, ENV_POLLING_INTERVAL);
        env.set_string(&mut self.tfstate.local.path, ENV_TFSTATE_LOCAL_PATH);
        env.set_string(&mut self.tfstate.http.url, ENV_TFSTATE_HTTP_URL);

        let webhook = &mut self.target.webhook;
        env.set_string(&mut webhook.url, ENV_WEBHOOK_URL);
        env.set_string(&mut webhook.method, ENV_WEBHOOK_METHOD);
        env.set_u32(&mut webhook.retry.max_attempts, ENV_WEBHOOK_RETRY_MAX_ATTEMPTS);
        env.set_u64(
            &mut webhook.retry.initial_delay_ms,
            ENV_WEBHOOK_RETRY_INITIAL_DELAY_MS,
        );
        env.set_u64(&mut webhook.retry.max_delay_ms, ENV_WEBHOOK_RETRY_MAX_DELAY_MS);
        if let Some(codes) = env.list(ENV_WEBHOOK_RETRY_ON_STATUS, |s| s.parse::<u16>().ok()) {
            webhook.retry.retry_on_status = Some(codes);
        }

        let slack = &mut self.target.slack;
        env.set_string(&mut slack.webhook_url, ENV_SLACK_WEBHOOK_URL);
        env.set_string(&mut slack.channel, ENV_SLACK_CHANNEL);
        env.set_string(&mut slack.username, ENV_SLACK_USERNAME);
        env.set_string(&mut slack.icon_emoji, ENV_SLACK_ICON_EMOJI);

        let stdout = &mut self.target.stdout;
        if let Some(enabled) = env.get(ENV_STDOUT_ENABLED).and_then(|v| parse_bool(&v)) {
            stdout.enabled = enabled;
        }
        env.set_string(&mut stdout.format, ENV_STDOUT_FORMAT);

        if let Some(types) = env.list(ENV_FILTER_RESOURCE_TYPES, |s| Some(s.to_string())) {
            self.filter.resource_types = Some(types);
        }
        if let Some(outputs) = env.list(ENV_FILTER_OUTPUTS, |s| Some(s.to_string())) {
            self.filter.outputs = Some(outputs);
        }

        if let Some(path) = env.get(ENV_PERSISTENCE_STATE_FILE) {
            self.persistence.state_file = Some(path);
        }
    }
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|value| !value.is_empty())
    }

    fn set_string(&self, target: &mut String, key: &str) {
        if let Some(value) = self.get(key) {
            *target = value;
        }
    }

    fn set_u32(&self, target: &mut u32, key: &str) {
        if let Some(value) = self.get(key).and_then(|v| v.trim().parse().ok()) {
            *target = value;
        }
    }

    fn set_u64(&self, target: &mut u64, key: &str) {
        if let Some(value) = self.get(key).and_then(|v| v.trim().parse().ok()) {
            *target = value;
        }
    }

    /// Comma-separated list; `None` when nothing usable remains.
    fn list<T>(&self, key: &str, parse: impl Fn(&str) -> Option<T>) -> Option<Vec<T>> {
        let value = self.get(key)?;
        let items: Vec<T> = value
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .filter_map(parse)
            .collect();
        (!items.is_empty()).then_some(items)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// Locate the config file: explicit path, then `INFRALOG_CONFIG_FILE`, then
/// `~/.config/infralog/config.yaml` and `./infralog.yaml`.
pub fn resolve_path<F>(explicit: Option<&Path>, lookup: F) -> Option<PathBuf>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(path) = lookup(CONFIG_FILE_ENV).filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(path));
    }

    let mut candidates = Vec::new();
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".config").join("infralog").join("config.yaml"));
    }
    candidates.push(PathBuf::from("./infralog.yaml"));

    candidates.into_iter().find(|path| path.exists())
}

pub fn init_from_path(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::ConfigFileNotFound(
            path.to_string_lossy().to_string(),
        ));
    }

    let content = fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(Config::default());
    }

    serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: path.to_string_lossy().to_string(),
        message: e.to_string(),
    })
}

/// Resolve, read, overlay the process environment and validate.
pub fn load(explicit: Option<&Path>) -> Result<Config, ConfigError> {
    let lookup = |key: &str| std::env::var(key).ok();

    let mut config = match resolve_path(explicit, lookup) {
        Some(path) => init_from_path(&path)?,
        None => Config::default(),
    };
    config.apply_env_overrides(lookup);
    config.validate()?;
    Ok(config)
}
