//! Services - positioning logic and run orchestration
//!
//! This module contains the core services:
//! - `trilateration` - Closed-form position from three anchors
//! - `aggregator` - Groups readings per instant and picks anchors
//! - `classifier` - Point-in-area classification
//! - `segmenter` - Dwell session segmentation
//! - `directory_cache` - Run-scoped directory memoization
//! - `pipeline` - Batch run orchestration
//! - `run_guard` - Single-flight claim per run window
//! - `jobs` - Job queue and worker with completion status

pub mod aggregator;
pub mod classifier;
pub mod directory_cache;
pub mod jobs;
pub mod pipeline;
pub mod run_guard;
pub mod segmenter;
pub mod trilateration;

// Re-export commonly used types
pub use jobs::{create_job_queue, DispatchError, JobHandle, JobQueue, JobStatus, JobWorker};
pub use pipeline::{Pipeline, RunReport};
pub use run_guard::RunGuard;
