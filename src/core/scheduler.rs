use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::debug;

/// Work driven by the [`Scheduler`], one invocation per tick.
#[async_trait]
pub trait Task: Send {
    async fn run(&mut self);
}

/// Runs a task at a fixed interval until cancelled.
///
/// Invocations never overlap: a slow task pushes the next tick back instead
/// of queueing extra ones. Cancellation is checked between invocations, so an
/// in-flight run always completes.
#[derive(Debug, Clone, Copy)]
pub struct Scheduler {
    interval: Duration,
}

impl Scheduler {
    pub fn new(interval: Duration) -> Self {
        // tokio intervals panic on a zero period
        Self {
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns the number of completed invocations. The first one happens
    /// one interval after the call.
    pub async fn run<T>(&self, mut shutdown: watch::Receiver<bool>, task: &mut T) -> u64
    where
        T: Task + ?Sized,
    {
        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut runs = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    // a dropped sender can never cancel us later, treat it as cancellation
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => {}
            }

            task.run().await;
            runs += 1;
            debug!(runs, "scheduled run finished");
        }

        debug!(runs, "scheduler stopped");
        runs
    }
}
