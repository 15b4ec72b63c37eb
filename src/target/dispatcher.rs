use super::payload::{Payload, Target, TargetError};
use super::stdout::{OutputFormat, StdoutTarget};
use crate::shared::metrics::Metrics;
use futures::future::join_all;
use std::time::Instant;
use tracing::{debug, error, info};

/// Result of delivering one payload to every configured target.
#[derive(Debug, Default)]
pub struct DeliveryReport {
    pub delivered: Vec<&'static str>,
    pub failed: Vec<(&'static str, TargetError)>,
}

/// Fans a payload out to all targets concurrently. A failing target is
/// logged and counted but never affects the others.
pub struct Dispatcher {
    targets: Vec<Box<dyn Target>>,
}

impl Dispatcher {
    /// With no targets configured, drift goes to stdout as a text report.
    pub fn new(targets: Vec<Box<dyn Target>>) -> Self {
        if targets.is_empty() {
            info!("No targets configured, defaulting to stdout (text)");
            return Self {
                targets: vec![Box::new(StdoutTarget::new(OutputFormat::Text))],
            };
        }
        Self { targets }
    }

    pub fn target_names(&self) -> Vec<&'static str> {
        self.targets.iter().map(|t| t.name()).collect()
    }

    pub async fn dispatch(&self, payload: &Payload, metrics: &Metrics) -> DeliveryReport {
        let start = Instant::now();

        let deliveries = self.targets.iter().map(|target| async move {
            let result = target.write(payload).await;
            (target.name(), result)
        });
        let results = join_all(deliveries).await;

        let mut report = DeliveryReport::default();
        for (name, result) in results {
            match result {
                Ok(()) => {
                    metrics.record_notification_success(name);
                    debug!(target_name = name, "notification delivered");
                    report.delivered.push(name);
                }
                Err(e) => {
                    metrics.record_notification_error(name);
                    error!(stage = "deliver", target_name = name, error = %e, "notification failed");
                    report.failed.push((name, e));
                }
            }
        }

        debug!(
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "dispatch finished"
        );
        report
    }
}
