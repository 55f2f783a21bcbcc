//! Time-driven task firing for a single collector.
//!
//! A `Schedule` owns an ordered sequence of `Task`s, each bound at
//! registration time to an explicit handler closure (no reflection-based
//! dispatch: see `crate::collector` for how task names are bound to
//! `Collector` poll methods).

use std::collections::HashSet;
use std::pin::Pin;

use std::future::Future;
use tokio::time::{Duration, Instant};

use crate::errors::{ClassifiedError, ErrorClass};
use crate::matrix::Matrix;

pub type Result<T> = std::result::Result<T, ClassifiedError>;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// A Matrix-producing poll operation bound to a task at `add_task` time.
pub type Handler = Box<dyn Fn() -> BoxFuture<Result<Matrix>> + Send + Sync>;

pub struct Task {
    pub name: String,
    /// Configured (non-standby) interval.
    interval: Duration,
    /// Backoff interval currently in effect, set by `SetStandByMode`.
    backoff: Option<Duration>,
    next_due: Instant,
    handler: Handler,
    pub last_runtime: Option<Duration>,
}

impl Task {
    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_standby(&self) -> bool {
        self.backoff.is_some()
    }

    fn effective_interval(&self) -> Duration {
        self.backoff.unwrap_or(self.interval)
    }
}

/// Owns the ordered task list for one collector. Not `Clone`: a Schedule
/// is exclusive to the collector execution context that drives it.
pub struct Schedule {
    tasks: Vec<Task>,
}

impl Default for Schedule {
    fn default() -> Self {
        Self::new()
    }
}

impl Schedule {
    pub fn new() -> Self {
        Self { tasks: Vec::new() }
    }

    /// `interval_spec` is a duration string such as `"60s"` or `"5m"`.
    /// Fails with `InvalidParam` on parse error, or `ErrConfig` if `name`
    /// is already registered.
    pub fn add_task(&mut self, name: &str, interval_spec: &str, handler: Handler) -> Result<()> {
        if self.tasks.iter().any(|t| t.name == name) {
            return Err(ClassifiedError::new(
                ErrorClass::ErrConfig,
                format!("task {name:?} already registered"),
            ));
        }
        let interval = humantime::parse_duration(interval_spec).map_err(|e| {
            ClassifiedError::new(
                ErrorClass::InvalidParam,
                format!("invalid interval {interval_spec:?}: {e}"),
            )
        })?;
        self.tasks.push(Task {
            name: name.to_string(),
            interval,
            backoff: None,
            next_due: Instant::now(),
            handler,
            last_runtime: None,
        });
        Ok(())
    }

    pub fn get_tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn task_index(&self, name: &str) -> Option<usize> {
        self.tasks.iter().position(|t| t.name == name)
    }

    pub fn is_due(&self, index: usize) -> bool {
        Instant::now() >= self.tasks[index].next_due
    }

    /// Invokes the task's handler, records its runtime, and advances
    /// `next_due` by the effective interval measured from completion
    /// time (missed deadlines never accumulate catch-up bursts).
    pub async fn run(&mut self, index: usize) -> Result<Matrix> {
        let started = Instant::now();
        let result = (self.tasks[index].handler)().await;
        let elapsed = started.elapsed();
        let task = &mut self.tasks[index];
        task.last_runtime = Some(elapsed);
        task.next_due = Instant::now() + task.effective_interval();
        result
    }

    /// Minimum time until any task is due; zero if one already is.
    pub fn next_due(&self) -> Duration {
        let now = Instant::now();
        self.tasks
            .iter()
            .map(|t| t.next_due.saturating_duration_since(now))
            .min()
            .unwrap_or(Duration::ZERO)
    }

    pub async fn sleep(&self) {
        tokio::time::sleep(self.next_due()).await;
    }

    /// Overrides the effective interval for `index` with `backoff` and
    /// marks it standby.
    pub fn set_standby_mode(&mut self, index: usize, backoff: Duration) {
        let task = &mut self.tasks[index];
        task.backoff = Some(backoff);
        task.next_due = Instant::now() + backoff;
    }

    /// True iff any task is currently in standby (per-task flag, global
    /// OR for collector-level status).
    pub fn is_standby(&self) -> bool {
        self.tasks.iter().any(|t| t.is_standby())
    }

    /// Clears every task's standby flag and restores configured
    /// intervals.
    pub fn recover(&mut self) {
        for task in &mut self.tasks {
            task.backoff = None;
        }
    }

    /// Names currently registered, used by Init to validate declared
    /// task handlers are distinct.
    pub fn names(&self) -> HashSet<&str> {
        self.tasks.iter().map(|t| t.name.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn immediate_handler() -> Handler {
        Box::new(|| Box::pin(async { Ok(Matrix::new("x")) }))
    }

    #[tokio::test]
    async fn add_task_rejects_bad_duration() {
        let mut s = Schedule::new();
        let err = s.add_task("data", "not-a-duration", immediate_handler()).unwrap_err();
        assert_eq!(err.class, ErrorClass::InvalidParam);
    }

    #[tokio::test]
    async fn add_task_rejects_duplicate_name() {
        let mut s = Schedule::new();
        s.add_task("data", "60s", immediate_handler()).unwrap();
        let err = s.add_task("data", "30s", immediate_handler()).unwrap_err();
        assert_eq!(err.class, ErrorClass::ErrConfig);
    }

    #[tokio::test]
    async fn run_advances_next_due_and_records_runtime() {
        let mut s = Schedule::new();
        s.add_task("data", "1ms", immediate_handler()).unwrap();
        assert!(s.is_due(0));
        s.run(0).await.unwrap();
        assert!(s.get_tasks()[0].last_runtime.is_some());
    }

    #[tokio::test]
    async fn standby_overrides_interval_until_recover() {
        let mut s = Schedule::new();
        s.add_task("data", "1ms", immediate_handler()).unwrap();
        s.set_standby_mode(0, Duration::from_secs(4));
        assert!(s.is_standby());
        assert!(s.next_due() <= Duration::from_secs(4));
        s.recover();
        assert!(!s.is_standby());
    }
}
