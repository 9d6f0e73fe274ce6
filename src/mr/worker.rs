//! The worker loop: pull a task, execute it, report back. Workers are
//! interchangeable; parallelism is simply how many loops share a
//! coordinator and a store.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::mr::coordinator::Coordinator;
use crate::mr::error::Error;
use crate::mr::storage::{Store, REDUCE_OUTPUT_PREFIX};
use crate::mr::task::{KeyValue, Task, TaskKind, TaskStatus};

/// User-supplied mapper: (file name, content) to an ordered record sequence.
pub type MapFn = Arc<dyn Fn(&str, &str) -> Vec<KeyValue> + Send + Sync>;

/// User-supplied reducer: (key, all values of that key) to one output value.
pub type ReduceFn = Arc<dyn Fn(&str, &[String]) -> String + Send + Sync>;

/// Which reducer bucket a key lands in. The hasher output is a `u64`, so the
/// value is already non-negative before the modulus.
pub fn bucket_of(key: &str, reduce_n: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % reduce_n as u64) as usize
}

/// Name of the intermediate shard holding map task `map_id`'s records for
/// reducer bucket `bucket`.
fn shard_name(map_id: i32, bucket: usize) -> String {
    format!("mr-{map_id}-{bucket}")
}

fn output_name(bucket: i32) -> String {
    format!("{REDUCE_OUTPUT_PREFIX}{bucket}")
}

pub struct Worker {
    coordinator: Arc<Coordinator>,
    storage: Arc<dyn Store>,
    map_fn: MapFn,
    reduce_fn: ReduceFn,
}

impl Worker {
    pub fn new(
        coordinator: Arc<Coordinator>,
        storage: Arc<dyn Store>,
        map_fn: MapFn,
        reduce_fn: ReduceFn,
    ) -> Self {
        Self {
            coordinator,
            storage,
            map_fn,
            reduce_fn,
        }
    }

    /// Fetch and execute tasks until the coordinator hands out the finish
    /// sentinel. A malformed task is fatal; a storage failure is logged and
    /// the worker goes back to fetching, leaving the lease for the sweeper
    /// to reclaim.
    pub async fn run(self) -> Result<(), Error> {
        loop {
            let task = self.coordinator.get_task().await;
            validate_task(&task)?;
            if task.kind() == TaskKind::Finish {
                debug!("received finish sentinel, worker exiting");
                return Ok(());
            }

            let result = match task.kind() {
                TaskKind::Map => self.run_map(&task),
                TaskKind::Reduce => self.run_reduce(&task),
                TaskKind::Finish => unreachable!(),
            };
            if let Err(err) = result {
                warn!(id = task.id(), kind = %task.kind(), %err, "task failed, refetching");
            }
        }
    }

    /// Map path: read the single input, transform it, partition the records
    /// into `R` shards, and publish all of them, empty ones included, so
    /// every reducer can read its cross-section uniformly.
    fn run_map(&self, task: &Arc<Task>) -> Result<(), Error> {
        let input = &task.inputs()[0];
        let content = self.storage.read_file(input, task.id(), TaskKind::Map)?;
        let entries = (self.map_fn)(input, &content);
        debug!(id = task.id(), records = entries.len(), "mapped input file");

        let reduce_n = task.reduce_n() as usize;
        let mut buckets: Vec<Vec<KeyValue>> = vec![Vec::new(); reduce_n];
        for kv in entries {
            let bucket = bucket_of(&kv.key, reduce_n);
            buckets[bucket].push(kv);
        }

        let mut outputs = Vec::with_capacity(reduce_n);
        for (bucket, entries) in buckets.iter().enumerate() {
            let name = shard_name(task.id(), bucket);
            self.storage.write(entries, &name, task.id(), TaskKind::Map)?;
            outputs.push(name);
        }

        task.set_outputs(outputs);
        self.coordinator.report_task(task);
        Ok(())
    }

    /// Reduce path: read every shard of this bucket, group values by key in
    /// lexicographic key order, reduce each group, publish the single output
    /// file, and erase the consumed intermediates.
    fn run_reduce(&self, task: &Arc<Task>) -> Result<(), Error> {
        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for name in task.inputs() {
            for kv in self
                .storage
                .read_entries(name, task.id(), TaskKind::Reduce)?
            {
                groups.entry(kv.key).or_default().push(kv.value);
            }
        }
        debug!(bucket = task.bucket(), keys = groups.len(), "grouped shards");

        let mut results = Vec::with_capacity(groups.len());
        for (key, values) in &groups {
            results.push(KeyValue::new(key.clone(), (self.reduce_fn)(key, values)));
        }

        let name = output_name(task.bucket());
        self.storage
            .write(&results, &name, task.id(), TaskKind::Reduce)?;
        task.set_outputs(vec![name]);
        self.coordinator.report_task(task);

        self.storage
            .clear_files(task.inputs(), task.id(), TaskKind::Reduce)?;
        Ok(())
    }
}

/// Reject malformed task records. The finish sentinel bypasses the input
/// checks; everything else must carry a non-negative id, usable input names,
/// and arrive with its lease marked in progress.
fn validate_task(task: &Task) -> Result<(), Error> {
    if task.kind() == TaskKind::Finish {
        return Ok(());
    }
    if task.id() < 0 {
        return Err(Error::InvalidTask(format!(
            "negative id {} on a {} task",
            task.id(),
            task.kind()
        )));
    }
    if task.inputs().is_empty() || task.inputs().iter().any(String::is_empty) {
        return Err(Error::InvalidTask(format!(
            "{} task {} has missing input files",
            task.kind(),
            task.id()
        )));
    }
    match task.status() {
        TaskStatus::InProgress => Ok(()),
        other => Err(Error::InvalidTask(format!(
            "{} task {} arrived {:?}, expected a live lease",
            task.kind(),
            task.id(),
            other
        ))),
    }
}
