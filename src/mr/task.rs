use std::fmt;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// A single key/value record, the unit every mapper emits and every reducer
/// consumes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: String, value: String) -> Self {
        Self { key, value }
    }
}

/// What a task does. `Finish` carries no payload; its sole purpose is to
/// unblock a worker so it can exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Map,
    Reduce,
    Finish,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Map => write!(f, "map"),
            TaskKind::Reduce => write!(f, "reduce"),
            TaskKind::Finish => write!(f, "finish"),
        }
    }
}

/// Where a task is in its lifecycle. `Idle → InProgress` on lease,
/// `InProgress → Idle` on lease expiry, `InProgress → Completed` on an
/// accepted report. `Completed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Idle,
    InProgress,
    Completed,
}

#[derive(Debug)]
struct Lease {
    status: TaskStatus,
    started: Option<Instant>,
}

/// The unit of work exchanged between coordinator and workers.
///
/// Identity (`id`, `kind`, `inputs`, `reduce_n`, `bucket`) is immutable.
/// Two fields mutate under their own disciplines: the lease state belongs to
/// the coordinator, whose leased map is the authority on which tasks are in
/// flight, and `outputs` is a write-once slot filled by the worker right
/// before it reports.
#[derive(Debug)]
pub struct Task {
    id: i32,
    kind: TaskKind,
    inputs: Vec<String>,
    outputs: OnceLock<Vec<String>>,
    reduce_n: i32,
    bucket: i32,
    lease: Mutex<Lease>,
}

impl Task {
    /// A map task over one input file. `id` is the input's index.
    pub fn map(id: i32, input: String, reduce_n: i32) -> Self {
        Self::new(id, TaskKind::Map, vec![input], reduce_n, -1)
    }

    /// A reduce task over the `bucket`-th shard of every map output.
    pub fn reduce(bucket: i32, inputs: Vec<String>, reduce_n: i32) -> Self {
        Self::new(bucket, TaskKind::Reduce, inputs, reduce_n, bucket)
    }

    /// The termination sentinel handed to workers once the job is done.
    pub fn finish() -> Self {
        Self::new(-1, TaskKind::Finish, vec![String::new()], 0, -1)
    }

    fn new(id: i32, kind: TaskKind, inputs: Vec<String>, reduce_n: i32, bucket: i32) -> Self {
        Self {
            id,
            kind,
            inputs,
            outputs: OnceLock::new(),
            reduce_n,
            bucket,
            lease: Mutex::new(Lease {
                status: TaskStatus::Idle,
                started: None,
            }),
        }
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    /// The coordinator's leased map is keyed by this. Map and reduce ids both
    /// start at zero, so the kind disambiguates.
    pub fn key(&self) -> (TaskKind, i32) {
        (self.kind, self.id)
    }

    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    pub fn reduce_n(&self) -> i32 {
        self.reduce_n
    }

    pub fn bucket(&self) -> i32 {
        self.bucket
    }

    /// The file names this task published, or an empty slice until the worker
    /// has set them.
    pub fn outputs(&self) -> &[String] {
        self.outputs.get().map(Vec::as_slice).unwrap_or(&[])
    }

    /// Publish the task's output names. Write-once: a second call is ignored,
    /// which is safe because every re-execution of the same task produces the
    /// same names and the coordinator discards duplicate reports anyway.
    pub fn set_outputs(&self, outputs: Vec<String>) {
        let _ = self.outputs.set(outputs);
    }

    pub fn status(&self) -> TaskStatus {
        self.lease.lock().status
    }

    pub(crate) fn begin_lease(&self) {
        let mut lease = self.lease.lock();
        lease.status = TaskStatus::InProgress;
        lease.started = Some(Instant::now());
    }

    pub(crate) fn reset_lease(&self) {
        let mut lease = self.lease.lock();
        lease.status = TaskStatus::Idle;
        lease.started = None;
    }

    pub(crate) fn complete(&self) {
        let mut lease = self.lease.lock();
        lease.status = TaskStatus::Completed;
    }

    /// How long the current lease has been running, if one is active.
    pub(crate) fn lease_age(&self) -> Option<Duration> {
        self.lease.lock().started.map(|started| started.elapsed())
    }
}
