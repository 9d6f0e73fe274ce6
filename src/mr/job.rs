//! The job driver: assemble a coordinator and a worker pool over a set of
//! input files, wait for completion, and drain the pool.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tracing::{info, warn};

use crate::mr::coordinator::{Coordinator, CoordinatorConfig};
use crate::mr::error::Error;
use crate::mr::storage::{FsStore, Store};
use crate::mr::worker::{MapFn, ReduceFn, Worker};

pub struct JobConfig {
    /// Input file names, resolved relative to `root`.
    pub inputs: Vec<String>,
    /// Reducer fan-out.
    pub reduce_n: usize,
    /// Worker pool size.
    pub workers: usize,
    /// Output root directory.
    pub root: PathBuf,
    pub coordinator: CoordinatorConfig,
    /// Whole-job limit. Task-level failures never fail the job; this is the
    /// only way a run can.
    pub timeout: Option<Duration>,
}

/// Run a job over a fresh filesystem store rooted at `config.root`.
pub async fn run_job(config: JobConfig, map_fn: MapFn, reduce_fn: ReduceFn) -> Result<(), Error> {
    let storage = Arc::new(FsStore::new(&config.root));
    run_job_with_store(config, storage, map_fn, reduce_fn).await
}

/// Run a job over a caller-supplied store.
pub async fn run_job_with_store(
    config: JobConfig,
    storage: Arc<dyn Store>,
    map_fn: MapFn,
    reduce_fn: ReduceFn,
) -> Result<(), Error> {
    if config.workers == 0 {
        return Err(Error::InvalidConfig(
            "at least one worker is required".to_string(),
        ));
    }

    let coordinator = Coordinator::new(config.inputs, config.reduce_n, config.coordinator)?;

    let mut handles = Vec::with_capacity(config.workers);
    for _ in 0..config.workers {
        let worker = Worker::new(
            Arc::clone(&coordinator),
            Arc::clone(&storage),
            Arc::clone(&map_fn),
            Arc::clone(&reduce_fn),
        );
        handles.push(tokio::spawn(worker.run()));
    }

    let started = Instant::now();
    while !coordinator.is_done() {
        if let Some(limit) = config.timeout {
            if started.elapsed() > limit {
                coordinator.shutdown();
                join_all(handles).await;
                return Err(Error::Timeout(limit));
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    coordinator.shutdown();
    for result in join_all(handles).await {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(%err, "worker exited with error"),
            Err(err) => warn!(%err, "worker task aborted"),
        }
    }

    info!(
        maps = coordinator.completed_maps(),
        reduces = coordinator.completed_reduces(),
        "job complete"
    );
    Ok(())
}
