pub mod app;
pub mod config;
pub mod db;
pub mod error;
pub mod job;
pub mod ocr;
pub mod output;
pub mod processor;
pub mod secrets;
pub mod service;
pub mod store;
pub mod telemetry;
pub mod worker;

pub use app::App;
pub use config::{load_config, Config};
pub use error::{
    BackendError, ConfigError, DecodeError, JobError, OcrQueueError, Result, ServiceError,
    WorkerError,
};
pub use job::{BackendKind, Job, JobFailure, JobState, OcrMode, PageResult, SourceKind};
pub use ocr::{BackendRegistry, Dispatcher, MergeStrategy, OcrBackend, TableSplice};
pub use output::{JobOutput, Section};
pub use processor::{PageDecoder, PageImage, PagePipeline};
pub use service::{HealthReport, JobListing, JobService, JobView, SubmitSettings};
pub use store::{Admission, Claim, JobStore, NewJob};
pub use worker::{JobRunner, PoolSettings, RetryPolicy, RunnerSettings, WorkerPool};
