//! The coordinator leases tasks to workers with at-least-once semantics,
//! reclaims leases that outlive their timeout, transitions the job from the
//! map phase to the reduce phase exactly once, and hands out a finish
//! sentinel once both phases are complete.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::mr::error::Error;
use crate::mr::task::{Task, TaskKind, TaskStatus};

/// Sweeper cadence and lease limit.
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorConfig {
    /// Delay before the first sweep.
    pub initial_check_interval: Duration,
    /// Cadence between sweeps.
    pub check_interval: Duration,
    /// Maximum age of a lease before it is reclaimed.
    pub task_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            initial_check_interval: Duration::from_secs(1),
            check_interval: Duration::from_secs(1),
            task_timeout: Duration::from_secs(10),
        }
    }
}

/// The queues a task moves between. A task is in exactly one of `idle`,
/// `leased`, or (implicitly, by counter) the completed set.
struct Inner {
    idle: VecDeque<Arc<Task>>,
    leased: HashMap<(TaskKind, i32), Arc<Task>>,
}

pub struct Coordinator {
    map_n: usize,
    reduce_n: usize,
    inner: Mutex<Inner>,
    /// All map task records, kept to resolve their outputs when the reduce
    /// tasks are materialized.
    map_tasks: Vec<Arc<Task>>,
    map_done: AtomicUsize,
    reduce_done: AtomicUsize,
    /// One-shot latch around reduce materialization.
    reduces_built: AtomicBool,
    /// Counted availability signal: one permit per task sitting in `idle`.
    /// Closed on shutdown to drain every blocked `get_task`.
    available: Semaphore,
    config: CoordinatorConfig,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Coordinator {
    /// Build a coordinator seeded with one map task per input file and start
    /// its lease sweeper. Must be called from within a tokio runtime.
    pub fn new(
        inputs: Vec<String>,
        reduce_n: usize,
        config: CoordinatorConfig,
    ) -> Result<Arc<Self>, Error> {
        if inputs.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one input file is required".to_string(),
            ));
        }
        if inputs.iter().any(String::is_empty) {
            return Err(Error::InvalidConfig(
                "input file names must be non-empty".to_string(),
            ));
        }
        if reduce_n == 0 {
            return Err(Error::InvalidConfig(
                "reducer fan-out must be positive".to_string(),
            ));
        }

        let map_tasks: Vec<Arc<Task>> = inputs
            .into_iter()
            .enumerate()
            .map(|(id, input)| Arc::new(Task::map(id as i32, input, reduce_n as i32)))
            .collect();

        let coordinator = Arc::new(Self {
            map_n: map_tasks.len(),
            reduce_n,
            inner: Mutex::new(Inner {
                idle: map_tasks.iter().cloned().collect(),
                leased: HashMap::new(),
            }),
            available: Semaphore::new(map_tasks.len()),
            map_tasks,
            map_done: AtomicUsize::new(0),
            reduce_done: AtomicUsize::new(0),
            reduces_built: AtomicBool::new(false),
            config,
            sweeper: Mutex::new(None),
        });

        let handle = tokio::spawn(sweep_loop(
            Arc::downgrade(&coordinator),
            config.initial_check_interval,
            config.check_interval,
        ));
        *coordinator.sweeper.lock() = Some(handle);

        info!(
            maps = coordinator.map_n,
            reduces = coordinator.reduce_n,
            "coordinator seeded"
        );
        Ok(coordinator)
    }

    /// Hand out the next task, blocking on the availability signal while the
    /// idle queue is empty but work may still arrive. Returns the finish
    /// sentinel once the job is done or the coordinator has shut down.
    pub async fn get_task(&self) -> Arc<Task> {
        loop {
            if self.is_done() {
                return Arc::new(Task::finish());
            }
            match self.available.acquire().await {
                Ok(permit) => permit.forget(),
                // Closed by shutdown while we were waiting.
                Err(_) => return Arc::new(Task::finish()),
            }
            let task = {
                let mut inner = self.inner.lock();
                match inner.idle.pop_front() {
                    Some(task) => {
                        task.begin_lease();
                        inner.leased.insert(task.key(), Arc::clone(&task));
                        task
                    }
                    // Spurious wake: re-check done-ness and wait again.
                    None => continue,
                }
            };
            debug!(id = task.id(), kind = %task.kind(), "leased task");
            return task;
        }
    }

    /// Accept a completion report. A report whose lease is no longer present
    /// (superseded by the sweeper, or a duplicate) is discarded silently, so
    /// each task advances its counter at most once.
    pub fn report_task(&self, task: &Task) {
        let accepted = self.inner.lock().leased.remove(&task.key());
        let Some(task) = accepted else {
            debug!(id = task.id(), kind = %task.kind(), "discarding late report");
            return;
        };
        task.complete();
        debug!(id = task.id(), kind = %task.kind(), "task completed");

        match task.kind() {
            TaskKind::Map => {
                let done = self.map_done.fetch_add(1, Ordering::SeqCst) + 1;
                if done == self.map_n {
                    info!(reduces = self.reduce_n, "map phase complete");
                    self.build_reduce_tasks();
                }
            }
            TaskKind::Reduce => {
                let done = self.reduce_done.fetch_add(1, Ordering::SeqCst) + 1;
                if done == self.reduce_n {
                    info!("reduce phase complete, job done");
                }
            }
            TaskKind::Finish => {}
        }
    }

    pub fn is_done(&self) -> bool {
        self.map_done.load(Ordering::SeqCst) >= self.map_n
            && self.reduce_done.load(Ordering::SeqCst) >= self.reduce_n
    }

    pub fn completed_maps(&self) -> usize {
        self.map_done.load(Ordering::SeqCst)
    }

    pub fn completed_reduces(&self) -> usize {
        self.reduce_done.load(Ordering::SeqCst)
    }

    /// Tear the job down: drop all queued and in-flight work, force the
    /// counters to their targets, wake every blocked `get_task`, and stop
    /// the sweeper.
    pub fn shutdown(&self) {
        {
            let mut inner = self.inner.lock();
            inner.idle.clear();
            inner.leased.clear();
        }
        self.map_done.store(self.map_n, Ordering::SeqCst);
        self.reduce_done.store(self.reduce_n, Ordering::SeqCst);
        self.available.close();
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
        info!("coordinator shut down");
    }

    /// Materialize the reduce tasks from the map outputs. Runs exactly once
    /// per job: concurrent triggers race on the latch and the losers return.
    fn build_reduce_tasks(&self) {
        if self
            .reduces_built
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let tasks: Vec<Arc<Task>> = (0..self.reduce_n)
            .map(|bucket| {
                let inputs = self
                    .map_tasks
                    .iter()
                    .map(|task| task.outputs().get(bucket).cloned().unwrap_or_default())
                    .collect();
                Arc::new(Task::reduce(bucket as i32, inputs, self.reduce_n as i32))
            })
            .collect();

        {
            let mut inner = self.inner.lock();
            inner.idle.extend(tasks);
        }
        self.available.add_permits(self.reduce_n);
    }

    /// Reclaim leases older than the timeout. Remove-if-present on the leased
    /// map makes the race with `report_task` safe: whichever side removes the
    /// key first wins, and the loser finds it absent.
    fn sweep_expired(&self) {
        let mut requeued = 0;
        {
            let mut inner = self.inner.lock();
            let expired: Vec<(TaskKind, i32)> = inner
                .leased
                .iter()
                .filter(|(_, task)| {
                    task.status() == TaskStatus::InProgress
                        && task
                            .lease_age()
                            .is_some_and(|age| age > self.config.task_timeout)
                })
                .map(|(key, _)| *key)
                .collect();
            for key in expired {
                if let Some(task) = inner.leased.remove(&key) {
                    warn!(id = key.1, kind = %key.0, "lease expired, requeueing task");
                    task.reset_lease();
                    inner.idle.push_back(task);
                    requeued += 1;
                }
            }
        }
        if requeued > 0 {
            self.available.add_permits(requeued);
        }
    }
}

async fn sweep_loop(coordinator: Weak<Coordinator>, initial: Duration, period: Duration) {
    tokio::time::sleep(initial).await;
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        let Some(coordinator) = coordinator.upgrade() else {
            return;
        };
        coordinator.sweep_expired();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    fn quiet_config() -> CoordinatorConfig {
        // Sweeper effectively disabled; tests drive sweeps by hand.
        CoordinatorConfig {
            initial_check_interval: Duration::from_secs(3600),
            check_interval: Duration::from_secs(3600),
            task_timeout: Duration::from_secs(10),
        }
    }

    fn inputs(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[tokio::test]
    async fn construction_rejects_bad_inputs() {
        assert!(matches!(
            Coordinator::new(vec![], 2, quiet_config()),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            Coordinator::new(inputs(&["a", ""]), 2, quiet_config()),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            Coordinator::new(inputs(&["a"]), 0, quiet_config()),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn full_lease_report_lifecycle() {
        let coordinator = Coordinator::new(inputs(&["file1"]), 1, quiet_config()).unwrap();

        let task = coordinator.get_task().await;
        assert_eq!(task.kind(), TaskKind::Map);
        assert_eq!(task.id(), 0);
        assert_eq!(task.status(), TaskStatus::InProgress);

        task.set_outputs(vec!["mr-0-0".to_string()]);
        coordinator.report_task(&task);
        assert_eq!(coordinator.completed_maps(), 1);

        let task = coordinator.get_task().await;
        assert_eq!(task.kind(), TaskKind::Reduce);
        assert_eq!(task.bucket(), 0);
        assert_eq!(task.inputs(), ["mr-0-0".to_string()]);

        task.set_outputs(vec!["mr-out-0".to_string()]);
        coordinator.report_task(&task);
        assert!(coordinator.is_done());

        let task = coordinator.get_task().await;
        assert_eq!(task.kind(), TaskKind::Finish);

        coordinator.shutdown();
    }

    #[tokio::test]
    async fn duplicate_report_counts_once() {
        let coordinator = Coordinator::new(inputs(&["file1", "file2"]), 1, quiet_config()).unwrap();

        let task = coordinator.get_task().await;
        task.set_outputs(vec!["mr-0-0".to_string()]);
        coordinator.report_task(&task);
        coordinator.report_task(&task);

        assert_eq!(coordinator.completed_maps(), 1);
        coordinator.shutdown();
    }

    #[tokio::test]
    async fn expired_lease_is_requeued_and_late_report_discarded() {
        let config = CoordinatorConfig {
            task_timeout: Duration::ZERO,
            ..quiet_config()
        };
        let coordinator = Coordinator::new(inputs(&["file1"]), 1, config).unwrap();

        let first = coordinator.get_task().await;
        assert_eq!(first.id(), 0);

        coordinator.sweep_expired();
        assert_eq!(first.status(), TaskStatus::Idle);

        // A second worker picks the same task back up and completes it.
        let second = coordinator.get_task().await;
        assert_eq!(second.key(), first.key());
        second.set_outputs(vec!["mr-0-0".to_string()]);
        coordinator.report_task(&second);
        assert_eq!(coordinator.completed_maps(), 1);

        // The original worker finally reports: counter unchanged.
        coordinator.report_task(&first);
        assert_eq!(coordinator.completed_maps(), 1);

        coordinator.shutdown();
    }

    #[tokio::test]
    async fn reduce_tasks_materialize_once_with_cross_section_inputs() {
        let coordinator =
            Coordinator::new(inputs(&["file1", "file2", "file3"]), 2, quiet_config()).unwrap();

        for _ in 0..3 {
            let task = coordinator.get_task().await;
            let id = task.id();
            task.set_outputs(vec![format!("mr-{id}-0"), format!("mr-{id}-1")]);
            coordinator.report_task(&task);
        }
        assert_eq!(coordinator.completed_maps(), 3);

        // The latch swallows a second trigger.
        coordinator.build_reduce_tasks();

        let mut reduces = Vec::new();
        for _ in 0..2 {
            reduces.push(coordinator.get_task().await);
        }
        reduces.sort_by_key(|task| task.bucket());
        for (bucket, task) in reduces.iter().enumerate() {
            assert_eq!(task.kind(), TaskKind::Reduce);
            assert_eq!(task.bucket(), bucket as i32);
            let expected: Vec<String> =
                (0..3).map(|map_id| format!("mr-{map_id}-{bucket}")).collect();
            assert_eq!(task.inputs(), expected);
        }

        // Exactly two reduce tasks existed; the queue is empty again.
        assert_eq!(coordinator.inner.lock().idle.len(), 0);
        coordinator.shutdown();
    }

    #[tokio::test]
    async fn shutdown_unblocks_waiting_workers() {
        let coordinator = Coordinator::new(inputs(&["file1"]), 1, quiet_config()).unwrap();

        // Drain the only permit so the waiters below truly block.
        let leased = coordinator.get_task().await;
        assert_eq!(leased.kind(), TaskKind::Map);

        let mut waiters = Vec::new();
        for _ in 0..3 {
            let coordinator = Arc::clone(&coordinator);
            waiters.push(tokio::spawn(async move { coordinator.get_task().await }));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        coordinator.shutdown();
        for waiter in waiters {
            let task = timeout(Duration::from_secs(5), waiter)
                .await
                .expect("worker still blocked after shutdown")
                .unwrap();
            assert_eq!(task.kind(), TaskKind::Finish);
        }
    }

    #[tokio::test]
    async fn get_task_returns_finish_once_done() {
        let coordinator = Coordinator::new(inputs(&["file1"]), 1, quiet_config()).unwrap();

        let task = coordinator.get_task().await;
        task.set_outputs(vec!["mr-0-0".to_string()]);
        coordinator.report_task(&task);
        let task = coordinator.get_task().await;
        task.set_outputs(vec!["mr-out-0".to_string()]);
        coordinator.report_task(&task);

        // Done without shutdown: the sentinel comes back immediately.
        let task = coordinator.get_task().await;
        assert_eq!(task.kind(), TaskKind::Finish);
        coordinator.shutdown();
    }
}
