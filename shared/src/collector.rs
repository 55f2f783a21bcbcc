//! AbstractCollector: lifecycle, standby state machine, and plugin /
//! exporter fan-out shared by every concrete collector.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{watch, RwLock};
use tokio::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::errors::{ClassifiedError, ErrorClass};
use crate::matrix::{Matrix, MetricType};
use crate::plugin::{run_chain, Plugin};
use crate::schedule::Schedule;
use crate::exporter::{Exporter, ExporterStatus};

pub type Result<T> = std::result::Result<T, ClassifiedError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorStatus {
    Up = 0,
    Standby = 1,
    Failed = 2,
}

/// Diagnostic timings a concrete collector may report for the most
/// recently completed poll, folded into the Metadata Matrix.
#[derive(Debug, Clone, Copy, Default)]
pub struct PollDiagnostics {
    pub api_time: Option<Duration>,
    pub parse_time: Option<Duration>,
    pub calc_time: Option<Duration>,
    pub content_length: Option<i64>,
}

/// The contract a concrete collector implements. `poll` is dispatched by
/// task name, bound once at `AbstractCollector::init` time into the
/// Schedule's handler table - an explicit registration, not reflection.
#[async_trait]
pub trait Collector: Send + Sync {
    fn name(&self) -> &str;
    fn object(&self) -> &str;
    async fn poll(&self, task: &str) -> Result<Matrix>;
    fn last_poll_diagnostics(&self) -> PollDiagnostics {
        PollDiagnostics::default()
    }
}

/// Declarative config consumed by `AbstractCollector::init`, mirroring
/// the `schedule`/`plugins`/`export_options`/`global_labels`/`datacenter`/
/// `export_data` tree described for collector params.
pub struct CollectorParams {
    /// Declared order matters: tasks fire in this order when concurrently due.
    pub schedule: Vec<(String, String)>,
    pub plugins: Vec<PluginSpec>,
    pub export_options: HashMap<String, String>,
    pub global_labels: HashMap<String, String>,
    pub datacenter: Option<String>,
    pub export_data: bool,
}

pub enum PluginSpec {
    Aggregator {
        by_label: String,
        reduce: crate::plugin::ReduceKind,
    },
    LabelAgent {
        rules: Vec<crate::plugin::LabelRule>,
    },
}

fn build_plugin(spec: &PluginSpec) -> Box<dyn Plugin> {
    match spec {
        PluginSpec::Aggregator { by_label, reduce } => {
            Box::new(crate::plugin::Aggregator::new(by_label.clone(), *reduce))
        }
        PluginSpec::LabelAgent { rules } => Box::new(crate::plugin::LabelAgent::new(rules.clone())),
    }
}

const FIXED_METADATA_METRICS: &[(&str, MetricType)] = &[
    ("poll_time", MetricType::Float64),
    ("task_time", MetricType::Float64),
    ("api_time", MetricType::Float64),
    ("parse_time", MetricType::Float64),
    ("calc_time", MetricType::Float64),
    ("plugin_time", MetricType::Float64),
    ("content_length", MetricType::Int64),
    ("api_time_percent", MetricType::Float64),
    ("count", MetricType::Uint64),
];

/// Cross-context view of a running collector's health, handed to the
/// supervising poller. `collect_count` is a read-reset atomic counter
/// rather than a mutex, per the single independent-counter design.
#[derive(Clone)]
pub struct CollectorHandle {
    pub status: Arc<RwLock<(CollectorStatus, String)>>,
    collect_count: Arc<AtomicU64>,
}

impl CollectorHandle {
    /// Reads and zeroes the counter in one step.
    pub fn read_reset_count(&self) -> u64 {
        self.collect_count.swap(0, Ordering::SeqCst)
    }
}

pub struct AbstractCollector {
    name: String,
    collector: Arc<dyn Collector>,
    schedule: Schedule,
    plugins: Vec<Box<dyn Plugin>>,
    exporters: Vec<Arc<dyn Exporter>>,
    metadata: Matrix,
    global_labels: HashMap<String, String>,
    datacenter: Option<String>,
    export_options: HashMap<String, String>,
    export_data: bool,
    status: CollectorStatus,
    status_handle: Arc<RwLock<(CollectorStatus, String)>>,
    collect_count: Arc<AtomicU64>,
    retry_delay: Duration,
}

const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(1);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(1024);
const NO_INSTANCE_BACKOFF: Duration = Duration::from_secs(5 * 60);
const NO_METRIC_BACKOFF: Duration = Duration::from_secs(60 * 60);

impl AbstractCollector {
    /// Implements the Init contract: validates the schedule, binds
    /// handlers, builds the plugin chain and the Metadata Matrix.
    pub async fn init(
        collector: Arc<dyn Collector>,
        params: CollectorParams,
        exporters: Vec<Arc<dyn Exporter>>,
    ) -> Result<Self> {
        if params.schedule.is_empty() {
            return Err(ClassifiedError::new(
                ErrorClass::MissingParam,
                "schedule section is empty",
            ));
        }

        let mut schedule = Schedule::new();
        for (task_name, interval_spec) in &params.schedule {
            let bound = collector.clone();
            let task_name_owned = task_name.clone();
            schedule.add_task(
                task_name,
                interval_spec,
                Box::new(move || {
                    let bound = bound.clone();
                    let task_name_owned = task_name_owned.clone();
                    Box::pin(async move { bound.poll(&task_name_owned).await })
                }),
            )?;
        }

        let mut plugins = Vec::with_capacity(params.plugins.len());
        for spec in &params.plugins {
            let mut plugin = build_plugin(spec);
            plugin.init().await?;
            plugins.push(plugin);
        }

        let mut metadata = Matrix::new(format!("{}_metadata", collector.object()));
        for (name, metric_type) in FIXED_METADATA_METRICS {
            metadata.new_metric(name, *metric_type);
        }
        for (task_name, interval_spec) in &params.schedule {
            metadata.new_instance(task_name);
            metadata.set_instance_label(task_name, "task", task_name.clone());
            metadata.set_instance_label(task_name, "interval", interval_spec.clone());
        }

        let status = CollectorStatus::Up;
        let status_handle = Arc::new(RwLock::new((status, "initialized".to_string())));

        Ok(Self {
            name: collector.name().to_string(),
            collector,
            schedule,
            plugins,
            exporters,
            metadata,
            global_labels: params.global_labels,
            datacenter: params.datacenter,
            export_options: params.export_options,
            export_data: params.export_data,
            status,
            status_handle,
            collect_count: Arc::new(AtomicU64::new(0)),
            retry_delay: INITIAL_RETRY_DELAY,
        })
    }

    pub fn handle(&self) -> CollectorHandle {
        CollectorHandle {
            status: self.status_handle.clone(),
            collect_count: self.collect_count.clone(),
        }
    }

    async fn set_status(&mut self, status: CollectorStatus, message: impl Into<String>) {
        self.status = status;
        let mut guard = self.status_handle.write().await;
        *guard = (status, message.into());
    }

    fn apply_collector_settings(&self, matrix: &mut Matrix) {
        for (label, value) in &self.global_labels {
            matrix.set_global_label(label.clone(), value.clone());
        }
        if let Some(dc) = &self.datacenter {
            matrix.set_global_label("datacenter", dc.clone());
        }
        matrix.set_export_options(self.export_options.clone());
        matrix.set_exportable(self.export_data);
    }

    /// Runs the Start loop until a fatal (`failed`) transition, or until
    /// `stop` is signalled true. Returns self so the poller can inspect
    /// final status/diagnostics.
    pub async fn start(mut self, mut stop: watch::Receiver<bool>) -> Self {
        loop {
            if *stop.borrow() {
                break;
            }
            self.metadata.reset();
            let mut pending_matrices: Vec<Matrix> = Vec::new();
            let mut went_failed = false;

            let task_count = self.schedule.get_tasks().len();
            for idx in 0..task_count {
                if !self.schedule.is_due(idx) {
                    continue;
                }
                let task_name = self.schedule.get_tasks()[idx].name.clone();
                let cycle_start = Instant::now();
                let outcome = self.schedule.run(idx).await;
                let task_time = self.schedule.get_tasks()[idx]
                    .last_runtime
                    .unwrap_or_default();

                match outcome {
                    Ok(matrix) => {
                        if self.status == CollectorStatus::Standby {
                            self.schedule.recover();
                            self.retry_delay = INITIAL_RETRY_DELAY;
                            self.set_status(CollectorStatus::Up, "recovered").await;
                            info!(collector = self.name.as_str(), "recovered from standby");
                        }
                        self.record_task_metadata(&task_name, task_time, cycle_start);

                        if task_name == "data" {
                            let plugin_start = Instant::now();
                            let mut emitted = run_chain(&mut self.plugins, &matrix).await;
                            let plugin_time = plugin_start.elapsed();
                            self.metadata
                                .lazy_set_value("plugin_time", &task_name, plugin_time.as_secs_f64());
                            let count = matrix.instances().count() as f64;
                            self.metadata.lazy_set_value("count", &task_name, count);
                            self.collect_count.fetch_add(count as u64, Ordering::SeqCst);

                            let mut matrix = matrix;
                            self.apply_collector_settings(&mut matrix);
                            for m in &mut emitted {
                                self.apply_collector_settings(m);
                            }
                            pending_matrices.push(matrix);
                            pending_matrices.extend(emitted);
                        }
                    }
                    Err(e) => {
                        match e.class {
                            ErrorClass::ErrConnection => {
                                self.retry_delay =
                                    std::cmp::min(self.retry_delay * 4, MAX_RETRY_DELAY);
                                self.schedule.set_standby_mode(idx, self.retry_delay);
                                self.set_status(CollectorStatus::Standby, e.message.clone()).await;
                                warn!(collector = self.name.as_str(), error = %e, "connection error, entering standby");
                                break;
                            }
                            ErrorClass::ErrNoInstance => {
                                self.schedule.set_standby_mode(idx, NO_INSTANCE_BACKOFF);
                                self.set_status(CollectorStatus::Standby, e.message.clone()).await;
                                warn!(collector = self.name.as_str(), error = %e, "no instances, entering standby");
                                break;
                            }
                            ErrorClass::ErrNoMetric => {
                                self.schedule.set_standby_mode(idx, NO_METRIC_BACKOFF);
                                self.set_status(CollectorStatus::Standby, e.message.clone()).await;
                                warn!(collector = self.name.as_str(), error = %e, "no metrics, entering standby");
                                break;
                            }
                            _ => {
                                error!(collector = self.name.as_str(), error = %e, "fatal collector error");
                                self.set_status(CollectorStatus::Failed, e.to_string()).await;
                                went_failed = true;
                                break;
                            }
                        }
                    }
                }
            }

            self.export_phase(&pending_matrices).await;

            if went_failed {
                break;
            }

            tokio::select! {
                _ = self.schedule.sleep() => {}
                _ = stop.changed() => {
                    if *stop.borrow() {
                        break;
                    }
                }
            }
        }
        self
    }

    fn record_task_metadata(&mut self, task_name: &str, task_time: Duration, cycle_start: Instant) {
        self.metadata
            .lazy_set_value("task_time", task_name, task_time.as_secs_f64());
        self.metadata
            .lazy_set_value("poll_time", task_name, cycle_start.elapsed().as_secs_f64());

        let diagnostics = self.collector.last_poll_diagnostics();
        if let Some(api_time) = diagnostics.api_time {
            self.metadata
                .lazy_set_value("api_time", task_name, api_time.as_secs_f64());
            if task_time.as_secs_f64() > 0.0 {
                let pct = api_time.as_secs_f64() / task_time.as_secs_f64() * 100.0;
                self.metadata.lazy_set_value("api_time_percent", task_name, pct);
            }
        }
        if let Some(parse_time) = diagnostics.parse_time {
            self.metadata
                .lazy_set_value("parse_time", task_name, parse_time.as_secs_f64());
        }
        if let Some(calc_time) = diagnostics.calc_time {
            self.metadata
                .lazy_set_value("calc_time", task_name, calc_time.as_secs_f64());
        }
        if let Some(content_length) = diagnostics.content_length {
            self.metadata
                .lazy_set_value("content_length", task_name, content_length as f64);
        }
    }

    /// Metadata is attempted before data Matrices, on every up exporter;
    /// a failing exporter stops receiving further data this cycle only.
    async fn export_phase(&self, matrices: &[Matrix]) {
        for exporter in &self.exporters {
            let (status, _, _) = exporter.get_status();
            if status != ExporterStatus::Up {
                continue;
            }
            if let Err(e) = exporter.export(&self.metadata).await {
                warn!(exporter = exporter.name(), error = %e, "failed to export metadata");
            }
            for matrix in matrices {
                if !matrix.is_exportable() {
                    continue;
                }
                if let Err(e) = exporter.export(matrix).await {
                    warn!(exporter = exporter.name(), error = %e, "failed to export matrix, skipping rest of cycle");
                    break;
                }
            }
        }
    }

    pub fn status(&self) -> CollectorStatus {
        self.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::MetricType;
    use std::sync::Mutex as StdMutex;

    struct HappyPathCollector;

    #[async_trait]
    impl Collector for HappyPathCollector {
        fn name(&self) -> &str {
            "happy"
        }
        fn object(&self) -> &str {
            "volume"
        }
        async fn poll(&self, task: &str) -> Result<Matrix> {
            let mut m = Matrix::new("volume");
            if task == "data" {
                let metric = m.new_metric("m1", MetricType::Float64);
                let i1 = m.new_instance("i1");
                let i2 = m.new_instance("i2");
                m.set_value(&metric, &i1, 10.0).unwrap();
                m.set_value(&metric, &i2, 20.0).unwrap();
            }
            Ok(m)
        }
    }

    struct RecordingExporter {
        exported: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl Exporter for RecordingExporter {
        fn name(&self) -> &str {
            "recorder"
        }
        fn get_status(&self) -> (ExporterStatus, &'static str, String) {
            (ExporterStatus::Up, "up", String::new())
        }
        async fn export(&self, matrix: &Matrix) -> Result<()> {
            self.exported.lock().unwrap().push(matrix.object.clone());
            Ok(())
        }
    }

    fn happy_path_params() -> CollectorParams {
        CollectorParams {
            schedule: vec![("data".to_string(), "60s".to_string())],
            plugins: vec![],
            export_options: HashMap::new(),
            global_labels: HashMap::new(),
            datacenter: None,
            export_data: true,
        }
    }

    #[tokio::test]
    async fn happy_path_exports_metadata_and_data() {
        let exporter = Arc::new(RecordingExporter {
            exported: StdMutex::new(Vec::new()),
        });
        let collector: Arc<dyn Collector> = Arc::new(HappyPathCollector);
        let abstract_collector = AbstractCollector::init(
            collector,
            happy_path_params(),
            vec![exporter.clone()],
        )
        .await
        .unwrap();

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(abstract_collector.start(stop_rx));
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop_tx.send(true).unwrap();
        let finished = handle.await.unwrap();

        assert_eq!(finished.status(), CollectorStatus::Up);
        let exported = exporter.exported.lock().unwrap();
        assert!(exported.contains(&"volume_metadata".to_string()));
        assert!(exported.contains(&"volume".to_string()));
    }

    struct FatalCollector;

    #[async_trait]
    impl Collector for FatalCollector {
        fn name(&self) -> &str {
            "fatal"
        }
        fn object(&self) -> &str {
            "volume"
        }
        async fn poll(&self, _task: &str) -> Result<Matrix> {
            Err(ClassifiedError::new(ErrorClass::ErrTemplate, "bad template"))
        }
    }

    #[tokio::test]
    async fn fatal_error_transitions_to_failed_and_exits() {
        let collector: Arc<dyn Collector> = Arc::new(FatalCollector);
        let abstract_collector = AbstractCollector::init(collector, happy_path_params(), vec![])
            .await
            .unwrap();
        let (_stop_tx, stop_rx) = watch::channel(false);
        let finished = abstract_collector.start(stop_rx).await;
        assert_eq!(finished.status(), CollectorStatus::Failed);
    }

    struct FlakyCollector {
        attempts: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl Collector for FlakyCollector {
        fn name(&self) -> &str {
            "flaky"
        }
        fn object(&self) -> &str {
            "volume"
        }
        async fn poll(&self, _task: &str) -> Result<Matrix> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Err(ClassifiedError::new(ErrorClass::ErrConnection, "dial timeout"))
            } else {
                Ok(Matrix::new("volume"))
            }
        }
    }

    #[tokio::test]
    async fn connection_error_enters_standby() {
        let collector: Arc<dyn Collector> = Arc::new(FlakyCollector {
            attempts: std::sync::atomic::AtomicUsize::new(0),
        });
        let mut params = happy_path_params();
        params.schedule = vec![("data".to_string(), "1ms".to_string())];
        let abstract_collector = AbstractCollector::init(collector, params, vec![])
            .await
            .unwrap();
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(abstract_collector.start(stop_rx));
        tokio::time::sleep(Duration::from_millis(20)).await;
        stop_tx.send(true).unwrap();
        let finished = handle.await.unwrap();
        assert_eq!(finished.status(), CollectorStatus::Standby);
    }

    #[tokio::test]
    async fn recovers_after_standby_once_backoff_elapses() {
        let mut schedule = Schedule::new();
        schedule
            .add_task(
                "data",
                "1ms",
                Box::new(|| Box::pin(async { Ok(Matrix::new("x")) })),
            )
            .unwrap();
        schedule.set_standby_mode(0, Duration::from_millis(5));
        assert!(schedule.is_standby());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(schedule.is_due(0));
        schedule.recover();
        assert!(!schedule.is_standby());
    }
}
