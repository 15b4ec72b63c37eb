// Re-export modules for testing and external use
pub mod tfstate {
    pub mod diff;
    pub mod filter;
    pub mod model;

    pub use diff::{compare, has_changes, DiffStatus, OutputDiff, ResourceDiff, StateDiff, ValueDiff};
    pub use filter::Filter;
    pub use model::{parse_state, Resource, ResourceId, ResourceInstance, Snapshot};
}

pub mod persistence {
    pub mod file;
    pub mod store;

    pub use file::FileStore;
    pub use store::{PersistError, Store};
}

pub mod backend {
    pub mod http;
    pub mod local;
    pub mod state_backend;

    pub use http::HttpBackend;
    pub use local::LocalBackend;
    pub use state_backend::{Backend, BackendError, SourceDescriptor};
}

pub mod target {
    pub mod dispatcher;
    pub mod payload;
    pub mod retry;
    pub mod slack;
    pub mod stdout;
    pub mod webhook;

    pub use dispatcher::{DeliveryReport, Dispatcher};
    pub use payload::{Payload, Target, TargetError};
    pub use retry::RetryPolicy;
    pub use slack::SlackTarget;
    pub use stdout::{OutputFormat, StdoutTarget};
    pub use webhook::WebhookTarget;
}

pub mod shared {
    pub mod git;
    pub mod logging;
    pub mod metrics;
    pub mod signal;
}

pub mod core {
    pub mod infralog;
    pub mod poller;
    pub mod scheduler;
}

pub mod config;

// Re-export commonly used types for easier testing and external use
pub use crate::core::infralog::Infralog;
pub use crate::core::poller::{CycleError, CycleOutcome, Poller};
pub use crate::core::scheduler::{Scheduler, Task};
pub use crate::shared::metrics::Metrics;
