//! In-process drift and delivery counters.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;

/// Stage of a poll cycle, used to label errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PollStage {
    Fetch,
    Parse,
    Compare,
    Persist,
}

impl PollStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollStage::Fetch => "fetch",
            PollStage::Parse => "parse",
            PollStage::Compare => "compare",
            PollStage::Persist => "persist",
        }
    }
}

impl fmt::Display for PollStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default)]
pub struct Metrics {
    polls_succeeded: AtomicU64,
    last_successful_poll: AtomicI64,
    poll_errors: Mutex<BTreeMap<PollStage, u64>>,
    changes: Mutex<BTreeMap<(String, String), u64>>,
    notifications_sent: Mutex<BTreeMap<String, u64>>,
    notification_errors: Mutex<BTreeMap<String, u64>>,
}

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub polls_succeeded: u64,
    pub last_successful_poll: Option<i64>,
    pub poll_errors: BTreeMap<PollStage, u64>,
    pub changes: BTreeMap<(String, String), u64>,
    pub notifications_sent: BTreeMap<String, u64>,
    pub notification_errors: BTreeMap<String, u64>,
}

fn bump<K: Ord>(counters: &Mutex<BTreeMap<K, u64>>, key: K) {
    let mut counters = counters.lock().unwrap_or_else(|e| e.into_inner());
    *counters.entry(key).or_insert(0) += 1;
}

fn copy<K: Ord + Clone>(counters: &Mutex<BTreeMap<K, u64>>) -> BTreeMap<K, u64> {
    counters.lock().unwrap_or_else(|e| e.into_inner()).clone()
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_poll_error(&self, stage: PollStage) {
        bump(&self.poll_errors, stage);
    }

    pub fn record_poll_success(&self) {
        self.polls_succeeded.fetch_add(1, Ordering::Relaxed);
        self.last_successful_poll
            .store(chrono::Utc::now().timestamp(), Ordering::Relaxed);
    }

    pub fn record_change(&self, status: &str, resource_type: &str) {
        bump(
            &self.changes,
            (status.to_string(), resource_type.to_string()),
        );
    }

    pub fn record_notification_success(&self, target: &str) {
        bump(&self.notifications_sent, target.to_string());
    }

    pub fn record_notification_error(&self, target: &str) {
        bump(&self.notification_errors, target.to_string());
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let last = self.last_successful_poll.load(Ordering::Relaxed);
        MetricsSnapshot {
            polls_succeeded: self.polls_succeeded.load(Ordering::Relaxed),
            last_successful_poll: (last > 0).then_some(last),
            poll_errors: copy(&self.poll_errors),
            changes: copy(&self.changes),
            notifications_sent: copy(&self.notifications_sent),
            notification_errors: copy(&self.notification_errors),
        }
    }
}

impl MetricsSnapshot {
    pub fn poll_errors_for(&self, stage: PollStage) -> u64 {
        self.poll_errors.get(&stage).copied().unwrap_or(0)
    }

    pub fn total_changes(&self) -> u64 {
        self.changes.values().sum()
    }
}
