use crate::backend::{Backend, BackendError};
use crate::core::scheduler::Task;
use crate::persistence::{PersistError, Store};
use crate::shared::git::GitMetadata;
use crate::shared::metrics::{Metrics, PollStage};
use crate::target::dispatcher::Dispatcher;
use crate::target::payload::Payload;
use crate::tfstate::diff::{compare, CompareError};
use crate::tfstate::filter::Filter;
use crate::tfstate::model::{parse_state, Snapshot, StateError};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Label used for output changes in the change counters.
const OUTPUT_CHANGE_KIND: &str = "output";

#[derive(Error, Debug)]
pub enum CycleError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] BackendError),

    #[error("parse failed: {0}")]
    Parse(#[from] StateError),

    #[error("compare failed: {0}")]
    Compare(#[from] CompareError),

    #[error("loading persisted state failed: {0}")]
    Persist(#[from] PersistError),
}

impl CycleError {
    pub fn stage(&self) -> PollStage {
        match self {
            CycleError::Fetch(_) => PollStage::Fetch,
            CycleError::Parse(_) => PollStage::Parse,
            CycleError::Compare(_) => PollStage::Compare,
            CycleError::Persist(_) => PollStage::Persist,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    NoChanges,
    Changed {
        resources: usize,
        outputs: usize,
        failed_targets: Vec<&'static str>,
    },
}

/// Where the baseline snapshot came from at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Baseline {
    Persisted,
    Fetched,
}

/// One fetch, diff, notify and persist pass over the state.
///
/// The poller owns the last confirmed snapshot. Only the scheduler loop
/// drives it, so no locking is involved.
pub struct Poller {
    backend: Box<dyn Backend>,
    dispatcher: Dispatcher,
    store: Option<Arc<dyn Store>>,
    filter: Filter,
    git: Option<GitMetadata>,
    metrics: Arc<Metrics>,
    last_snapshot: Option<Snapshot>,
}

impl Poller {
    pub fn new(
        backend: Box<dyn Backend>,
        dispatcher: Dispatcher,
        filter: Filter,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            backend,
            dispatcher,
            store: None,
            filter,
            git: None,
            metrics,
            last_snapshot: None,
        }
    }

    pub fn with_store(mut self, store: Box<dyn Store>) -> Self {
        self.store = Some(Arc::from(store));
        self
    }

    pub fn with_git(mut self, git: Option<GitMetadata>) -> Self {
        self.git = git;
        self
    }

    pub fn last_snapshot(&self) -> Option<&Snapshot> {
        self.last_snapshot.as_ref()
    }

    /// Establish the baseline: the persisted snapshot when there is one,
    /// otherwise a live fetch that is then saved.
    pub async fn bootstrap(&mut self) -> Result<Baseline, CycleError> {
        if let Some(store) = &self.store {
            let store = Arc::clone(store);
            if let Some(snapshot) = off_runtime(move || store.load()).await? {
                info!(
                    serial = snapshot.serial,
                    resources = snapshot.resource_count(),
                    "Loaded persisted state"
                );
                self.last_snapshot = Some(snapshot);
                return Ok(Baseline::Persisted);
            }
            debug!("No persisted state found, fetching initial state");
        }

        let snapshot = self.fetch().await?;
        info!(
            serial = snapshot.serial,
            resources = snapshot.resource_count(),
            backend = self.backend.name(),
            "Fetched initial state"
        );
        self.last_snapshot = Some(snapshot);
        self.persist().await;
        Ok(Baseline::Fetched)
    }

    /// Run one cycle, recording a poll error metric on failure.
    pub async fn poll_once(&mut self) -> Result<CycleOutcome, CycleError> {
        let result = self.cycle().await;
        if let Err(e) = &result {
            self.metrics.record_poll_error(e.stage());
        }
        result
    }

    async fn fetch(&self) -> Result<Snapshot, CycleError> {
        let bytes = self.backend.get_state().await?;
        Ok(parse_state(&bytes)?)
    }

    async fn cycle(&mut self) -> Result<CycleOutcome, CycleError> {
        let current = self.fetch().await?;

        if self.last_snapshot.is_none() {
            info!("No baseline yet, adopting current state");
            self.last_snapshot = Some(current);
            self.persist().await;
            self.metrics.record_poll_success();
            return Ok(CycleOutcome::NoChanges);
        }

        let diff = compare(self.last_snapshot.as_ref(), Some(&current), &self.filter)?;
        self.metrics.record_poll_success();

        if !diff.has_changes() {
            debug!("No changes detected");
            return Ok(CycleOutcome::NoChanges);
        }

        for resource in &diff.resource_diffs {
            self.metrics
                .record_change(resource.status.as_str(), &resource.resource_type);
        }
        for output in &diff.output_diffs {
            self.metrics
                .record_change(output.status.as_str(), OUTPUT_CHANGE_KIND);
        }

        let resources = diff.resource_diffs.len();
        let outputs = diff.output_diffs.len();
        info!(resources, outputs, "Detected state changes");

        let payload = Payload::new(diff, self.backend.source(), self.git.clone());
        let report = self.dispatcher.dispatch(&payload, &self.metrics).await;

        // advance even if some targets failed
        self.last_snapshot = Some(current);
        self.persist().await;

        Ok(CycleOutcome::Changed {
            resources,
            outputs,
            failed_targets: report.failed.iter().map(|(name, _)| *name).collect(),
        })
    }

    async fn persist(&self) {
        let (Some(store), Some(snapshot)) = (&self.store, &self.last_snapshot) else {
            return;
        };
        let store = Arc::clone(store);
        let snapshot = snapshot.clone();
        if let Err(e) = off_runtime(move || store.save(&snapshot)).await {
            self.metrics.record_poll_error(PollStage::Persist);
            warn!(stage = "persist", error = %e, "Failed to persist state");
        }
    }
}

/// Store I/O syncs to disk, so it runs on the blocking pool.
async fn off_runtime<T, F>(op: F) -> Result<T, PersistError>
where
    F: FnOnce() -> Result<T, PersistError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| PersistError::Task(e.to_string()))?
}

#[async_trait]
impl Task for Poller {
    async fn run(&mut self) {
        match self.poll_once().await {
            Ok(CycleOutcome::NoChanges) => {}
            Ok(CycleOutcome::Changed { failed_targets, .. }) if !failed_targets.is_empty() => {
                warn!(?failed_targets, "Some targets were not notified");
            }
            Ok(CycleOutcome::Changed { .. }) => {}
            Err(e) => {
                error!(stage = e.stage().as_str(), error = %e, "Poll cycle failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SourceDescriptor;
    use crate::target::payload::{Target, TargetError};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct ScriptedBackend {
        responses: Arc<Mutex<VecDeque<Result<Vec<u8>, BackendError>>>>,
    }

    impl ScriptedBackend {
        fn push_state(&self, json: &str) {
            self.responses
                .lock()
                .unwrap()
                .push_back(Ok(json.as_bytes().to_vec()));
        }

        fn push_error(&self) {
            self.responses
                .lock()
                .unwrap()
                .push_back(Err(BackendError::HttpError("connection refused".to_string())));
        }
    }

    #[async_trait]
    impl Backend for ScriptedBackend {
        async fn get_state(&self) -> Result<Vec<u8>, BackendError> {
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(BackendError::HttpError("script exhausted".to_string())))
        }

        fn name(&self) -> &'static str {
            "scripted"
        }

        fn source(&self) -> SourceDescriptor {
            SourceDescriptor::new("local", "file:///tmp/terraform.tfstate")
        }
    }

    #[derive(Clone, Default)]
    struct MemoryStore {
        saved: Arc<Mutex<Option<Snapshot>>>,
        fail_saves: bool,
        threads: Arc<Mutex<Vec<std::thread::ThreadId>>>,
    }

    impl Store for MemoryStore {
        fn load(&self) -> Result<Option<Snapshot>, PersistError> {
            self.threads.lock().unwrap().push(std::thread::current().id());
            Ok(self.saved.lock().unwrap().clone())
        }

        fn save(&self, snapshot: &Snapshot) -> Result<(), PersistError> {
            self.threads.lock().unwrap().push(std::thread::current().id());
            if self.fail_saves {
                return Err(PersistError::Write(std::io::Error::other("disk full")));
            }
            *self.saved.lock().unwrap() = Some(snapshot.clone());
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct RecordingTarget {
        received: Arc<Mutex<Vec<Payload>>>,
        fail: bool,
    }

    #[async_trait]
    impl Target for RecordingTarget {
        fn name(&self) -> &'static str {
            if self.fail {
                "failing"
            } else {
                "recording"
            }
        }

        async fn write(&self, payload: &Payload) -> Result<(), TargetError> {
            self.received.lock().unwrap().push(payload.clone());
            if self.fail {
                return Err(TargetError::HttpError("unreachable".to_string()));
            }
            Ok(())
        }
    }

    fn state(serial: i64, instance_type: &str) -> String {
        format!(
            r#"{{"version":4,"serial":{},"resources":[{{"mode":"managed","type":"aws_instance","name":"web","instances":[{{"attributes":{{"instance_type":"{}"}}}}]}}]}}"#,
            serial, instance_type
        )
    }

    fn poller(backend: &ScriptedBackend, targets: Vec<Box<dyn Target>>) -> (Poller, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new());
        let poller = Poller::new(
            Box::new(backend.clone()),
            Dispatcher::new(targets),
            Filter::allow_all(),
            metrics.clone(),
        );
        (poller, metrics)
    }

    #[tokio::test]
    async fn test_bootstrap_prefers_persisted_state() {
        let backend = ScriptedBackend::default();
        let store = MemoryStore::default();
        let persisted = parse_state(state(7, "t2.micro").as_bytes()).unwrap();
        store.save(&persisted).unwrap();

        let (poller, _) = poller(&backend, vec![Box::new(RecordingTarget::default())]);
        let mut poller = poller.with_store(Box::new(store));

        assert_eq!(poller.bootstrap().await.unwrap(), Baseline::Persisted);
        assert_eq!(poller.last_snapshot().unwrap().serial, 7);
    }

    #[tokio::test]
    async fn test_bootstrap_fetches_and_saves() {
        let backend = ScriptedBackend::default();
        backend.push_state(&state(1, "t2.micro"));
        let store = MemoryStore::default();

        let (poller, _) = poller(&backend, vec![Box::new(RecordingTarget::default())]);
        let mut poller = poller.with_store(Box::new(store.clone()));

        assert_eq!(poller.bootstrap().await.unwrap(), Baseline::Fetched);
        assert_eq!(store.saved.lock().unwrap().as_ref().unwrap().serial, 1);
    }

    #[tokio::test]
    async fn test_store_io_stays_off_the_runtime_thread() {
        let backend = ScriptedBackend::default();
        backend.push_state(&state(1, "t2.micro"));
        backend.push_state(&state(2, "t2.small"));
        let store = MemoryStore::default();

        let (poller, _) = poller(&backend, vec![Box::new(RecordingTarget::default())]);
        let mut poller = poller.with_store(Box::new(store.clone()));
        poller.bootstrap().await.unwrap();
        poller.poll_once().await.unwrap();

        // load, bootstrap save, cycle save
        let runtime_thread = std::thread::current().id();
        let threads = store.threads.lock().unwrap();
        assert_eq!(threads.len(), 3);
        assert!(threads.iter().all(|id| *id != runtime_thread));
    }

    #[tokio::test]
    async fn test_bootstrap_fetch_failure() {
        let backend = ScriptedBackend::default();
        backend.push_error();
        let (mut poller, _) = poller(&backend, vec![Box::new(RecordingTarget::default())]);

        let err = poller.bootstrap().await.unwrap_err();
        assert_eq!(err.stage(), PollStage::Fetch);
        assert!(poller.last_snapshot().is_none());
    }

    #[tokio::test]
    async fn test_no_changes_leaves_state() {
        let backend = ScriptedBackend::default();
        backend.push_state(&state(1, "t2.micro"));
        backend.push_state(&state(2, "t2.micro"));
        let target = RecordingTarget::default();
        let (mut poller, metrics) = poller(&backend, vec![Box::new(target.clone())]);

        poller.bootstrap().await.unwrap();
        assert_eq!(poller.poll_once().await.unwrap(), CycleOutcome::NoChanges);

        assert!(target.received.lock().unwrap().is_empty());
        // unchanged cycles keep the old baseline
        assert_eq!(poller.last_snapshot().unwrap().serial, 1);
        assert_eq!(metrics.snapshot().polls_succeeded, 1);
    }

    #[tokio::test]
    async fn test_change_is_delivered_and_persisted() {
        let backend = ScriptedBackend::default();
        backend.push_state(&state(1, "t2.micro"));
        backend.push_state(&state(2, "t2.small"));
        let target = RecordingTarget::default();
        let store = MemoryStore::default();
        let (poller, metrics) = poller(&backend, vec![Box::new(target.clone())]);
        let mut poller = poller.with_store(Box::new(store.clone()));

        poller.bootstrap().await.unwrap();
        let outcome = poller.poll_once().await.unwrap();
        assert_eq!(
            outcome,
            CycleOutcome::Changed {
                resources: 1,
                outputs: 0,
                failed_targets: vec![],
            }
        );

        let received = target.received.lock().unwrap();
        assert_eq!(received.len(), 1);
        let diff = &received[0].diffs.resource_diffs[0];
        assert_eq!(diff.resource_type, "aws_instance");
        assert_eq!(received[0].source.location, "file:///tmp/terraform.tfstate");

        assert_eq!(poller.last_snapshot().unwrap().serial, 2);
        assert_eq!(store.saved.lock().unwrap().as_ref().unwrap().serial, 2);

        let snapshot = metrics.snapshot();
        assert_eq!(
            snapshot
                .changes
                .get(&("changed".to_string(), "aws_instance".to_string())),
            Some(&1)
        );
        assert_eq!(snapshot.notifications_sent.get("recording"), Some(&1));
    }

    #[tokio::test]
    async fn test_failures_do_not_block_progress() {
        let backend = ScriptedBackend::default();
        backend.push_state(&state(1, "t2.micro"));
        backend.push_state(&state(2, "t2.small"));
        let healthy = RecordingTarget::default();
        let failing = RecordingTarget {
            fail: true,
            ..Default::default()
        };
        let store = MemoryStore {
            fail_saves: true,
            ..Default::default()
        };
        let (poller, metrics) = poller(
            &backend,
            vec![Box::new(failing), Box::new(healthy.clone())],
        );
        let mut poller = poller.with_store(Box::new(store));

        poller.bootstrap().await.unwrap();
        let outcome = poller.poll_once().await.unwrap();

        assert_eq!(
            outcome,
            CycleOutcome::Changed {
                resources: 1,
                outputs: 0,
                failed_targets: vec!["failing"],
            }
        );
        assert_eq!(healthy.received.lock().unwrap().len(), 1);
        assert_eq!(poller.last_snapshot().unwrap().serial, 2);
        assert!(metrics.snapshot().poll_errors_for(PollStage::Persist) >= 1);
    }

    #[tokio::test]
    async fn test_cycle_errors_skip_the_cycle() {
        let backend = ScriptedBackend::default();
        backend.push_state(&state(1, "t2.micro"));
        backend.push_error();
        backend.push_state("{ not json");
        let target = RecordingTarget::default();
        let (mut poller, metrics) = poller(&backend, vec![Box::new(target.clone())]);

        poller.bootstrap().await.unwrap();

        let err = poller.poll_once().await.unwrap_err();
        assert_eq!(err.stage(), PollStage::Fetch);
        let err = poller.poll_once().await.unwrap_err();
        assert_eq!(err.stage(), PollStage::Parse);

        assert_eq!(poller.last_snapshot().unwrap().serial, 1);
        assert!(target.received.lock().unwrap().is_empty());

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.poll_errors_for(PollStage::Fetch), 1);
        assert_eq!(snapshot.poll_errors_for(PollStage::Parse), 1);
        assert_eq!(snapshot.polls_succeeded, 0);
    }

    #[tokio::test]
    async fn test_first_cycle_without_baseline_adopts_state() {
        let backend = ScriptedBackend::default();
        backend.push_state(&state(3, "t2.micro"));
        let target = RecordingTarget::default();
        let (mut poller, _) = poller(&backend, vec![Box::new(target.clone())]);

        assert_eq!(poller.poll_once().await.unwrap(), CycleOutcome::NoChanges);
        assert_eq!(poller.last_snapshot().unwrap().serial, 3);
        assert!(target.received.lock().unwrap().is_empty());
    }
}
