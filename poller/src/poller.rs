//! The Poller orchestrator: loads config, instantiates collectors and
//! exporters, and supervises one execution context per collector.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use shared::collector::{AbstractCollector, Collector, CollectorHandle};
use shared::config::{CollectorConfig, PollerConfig};
use shared::exporter::Exporter;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::collectors::registry::build_collector;
use crate::exporters::registry::build_exporter;

/// A running collector's supervision handle.
struct RunningCollector {
    name: String,
    handle: CollectorHandle,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<AbstractCollector>,
}

pub struct Poller {
    config: PollerConfig,
    running: Vec<RunningCollector>,
}

impl Poller {
    pub fn load(config_dir: &Path) -> Result<Self> {
        let path = config_dir.join("poller.toml");
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: PollerConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        config.validate().context("poller configuration is invalid")?;
        Ok(Self {
            config,
            running: Vec::new(),
        })
    }

    /// Instantiates every configured collector and exporter and spawns
    /// one Tokio task per collector running its Start loop.
    pub async fn start(&mut self) -> Result<()> {
        let mut exporters: HashMap<String, Arc<dyn Exporter>> = HashMap::new();
        for exporter_cfg in &self.config.exporters {
            let exporter = build_exporter(exporter_cfg)?;
            exporter.init().await.map_err(|e| anyhow::anyhow!(e))?;
            exporters.insert(exporter_cfg.name.clone(), exporter);
        }

        let collectors = self.config.collectors.clone();
        for collector_cfg in &collectors {
            self.spawn_collector(collector_cfg, &exporters).await?;
        }
        Ok(())
    }

    async fn spawn_collector(
        &mut self,
        collector_cfg: &CollectorConfig,
        exporters: &HashMap<String, Arc<dyn Exporter>>,
    ) -> Result<()> {
        let linked: Vec<Arc<dyn Exporter>> = if collector_cfg.exporters.is_empty() {
            exporters.values().cloned().collect()
        } else {
            collector_cfg
                .exporters
                .iter()
                .map(|name| exporters[name].clone())
                .collect()
        };

        let collector: Arc<dyn Collector> = build_collector(collector_cfg)?;
        let params = collector_cfg.to_params()?;
        let abstract_collector = AbstractCollector::init(collector, params, linked)
            .await
            .map_err(|e| anyhow::anyhow!(e))?;

        let handle = abstract_collector.handle();
        let (stop_tx, stop_rx) = watch::channel(false);
        info!(collector = collector_cfg.name.as_str(), "starting collector");
        let task = tokio::spawn(abstract_collector.start(stop_rx));

        self.running.push(RunningCollector {
            name: collector_cfg.name.clone(),
            handle,
            stop_tx,
            task,
        });
        Ok(())
    }

    /// Reads and resets every collector's cross-cycle sample counter;
    /// used by a supervising loop for periodic self-reporting.
    pub fn collect_counts(&self) -> Vec<(String, u64)> {
        self.running
            .iter()
            .map(|r| (r.name.clone(), r.handle.read_reset_count()))
            .collect()
    }

    pub async fn statuses(&self) -> Vec<(String, shared::collector::CollectorStatus)> {
        let mut out = Vec::with_capacity(self.running.len());
        for r in &self.running {
            let guard = r.handle.status.read().await;
            out.push((r.name.clone(), guard.0));
        }
        out
    }

    /// Signals every collector to stop after its current cycle and
    /// awaits their Start loops returning.
    pub async fn shutdown(self) {
        for running in &self.running {
            let _ = running.stop_tx.send(true);
        }
        for running in self.running {
            let _ = running.task.await;
            info!(collector = running.name.as_str(), "collector stopped");
        }
    }
}
