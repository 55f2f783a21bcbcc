//! Poller-level configuration: which collectors to run, their schedules
//! and plugin chains, and which exporters they publish to.
//!
//! Deserialized with `serde`/`toml`, validated explicitly with a
//! `validate()` method per struct rather than relying on serde alone to
//! reject malformed input.

use std::collections::HashMap;

use regex::Regex;
use serde::Deserialize;

use crate::collector::{CollectorParams, PluginSpec};
use crate::defaults::{default_export_data, default_poller_name};
use crate::plugin::{LabelRule, ReduceKind};
use crate::{MonitoringError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct PollerConfig {
    pub hostname: String,
    #[serde(default = "default_poller_name")]
    pub poller_name: String,
    pub collectors: Vec<CollectorConfig>,
    #[serde(default)]
    pub exporters: Vec<ExporterConfig>,
}

impl PollerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.hostname.trim().is_empty() {
            return Err(MonitoringError::Validation("hostname must not be empty".into()).into());
        }
        if self.collectors.is_empty() {
            return Err(MonitoringError::Validation("at least one collector must be configured".into()).into());
        }
        let mut seen = std::collections::HashSet::new();
        for collector in &self.collectors {
            collector.validate()?;
            if !seen.insert(&collector.name) {
                return Err(MonitoringError::Validation(format!(
                    "duplicate collector name {:?}",
                    collector.name
                ))
                .into());
            }
        }
        let exporter_names: std::collections::HashSet<&str> =
            self.exporters.iter().map(|e| e.name.as_str()).collect();
        for collector in &self.collectors {
            for linked in &collector.exporters {
                if !exporter_names.contains(linked.as_str()) {
                    return Err(MonitoringError::Validation(format!(
                        "collector {:?} links unknown exporter {:?}",
                        collector.name, linked
                    ))
                    .into());
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleEntry {
    pub task: String,
    pub interval: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PluginConfig {
    Aggregator {
        by_label: String,
        reduce: ReduceKindConfig,
    },
    LabelAgent {
        rules: Vec<LabelRuleConfig>,
    },
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReduceKindConfig {
    Sum,
    Avg,
    Count,
}

impl From<ReduceKindConfig> for ReduceKind {
    fn from(value: ReduceKindConfig) -> Self {
        match value {
            ReduceKindConfig::Sum => ReduceKind::Sum,
            ReduceKindConfig::Avg => ReduceKind::Avg,
            ReduceKindConfig::Count => ReduceKind::Count,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LabelRuleConfig {
    Extract {
        source: String,
        pattern: String,
        target: String,
    },
    Split {
        source: String,
        separator: String,
        targets: Vec<String>,
    },
    Join {
        sources: Vec<String>,
        separator: String,
        target: String,
    },
    Copy {
        source: String,
        target: String,
    },
    Replace {
        source: String,
        pattern: String,
        replacement: String,
        target: String,
    },
}

impl LabelRuleConfig {
    fn compile(&self) -> Result<LabelRule> {
        Ok(match self {
            LabelRuleConfig::Extract { source, pattern, target } => LabelRule::Extract {
                source: source.clone(),
                pattern: Regex::new(pattern)
                    .map_err(|e| MonitoringError::Validation(format!("invalid regex {pattern:?}: {e}")))?,
                target: target.clone(),
            },
            LabelRuleConfig::Split { source, separator, targets } => LabelRule::Split {
                source: source.clone(),
                separator: separator.clone(),
                targets: targets.clone(),
            },
            LabelRuleConfig::Join { sources, separator, target } => LabelRule::Join {
                sources: sources.clone(),
                separator: separator.clone(),
                target: target.clone(),
            },
            LabelRuleConfig::Copy { source, target } => LabelRule::Copy {
                source: source.clone(),
                target: target.clone(),
            },
            LabelRuleConfig::Replace { source, pattern, replacement, target } => LabelRule::Replace {
                source: source.clone(),
                pattern: Regex::new(pattern)
                    .map_err(|e| MonitoringError::Validation(format!("invalid regex {pattern:?}: {e}")))?,
                replacement: replacement.clone(),
                target: target.clone(),
            },
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExporterConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    pub name: String,
    pub object: String,
    pub schedule: Vec<ScheduleEntry>,
    #[serde(default)]
    pub plugins: Vec<PluginConfig>,
    #[serde(default)]
    pub export_options: HashMap<String, String>,
    #[serde(default)]
    pub global_labels: HashMap<String, String>,
    #[serde(default)]
    pub datacenter: Option<String>,
    #[serde(default = "default_export_data")]
    pub export_data: bool,
    #[serde(default)]
    pub exporters: Vec<String>,
}

impl CollectorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(MonitoringError::Validation("collector name must not be empty".into()).into());
        }
        if self.schedule.is_empty() {
            return Err(MonitoringError::Validation(format!(
                "collector {:?} has an empty schedule",
                self.name
            ))
            .into());
        }
        let mut seen = std::collections::HashSet::new();
        for entry in &self.schedule {
            if humantime::parse_duration(&entry.interval).is_err() {
                return Err(MonitoringError::Validation(format!(
                    "collector {:?} task {:?} has invalid interval {:?}",
                    self.name, entry.task, entry.interval
                ))
                .into());
            }
            if !seen.insert(&entry.task) {
                return Err(MonitoringError::Validation(format!(
                    "collector {:?} declares task {:?} twice",
                    self.name, entry.task
                ))
                .into());
            }
        }
        Ok(())
    }

    /// Converts validated config into the runtime params consumed by
    /// `AbstractCollector::init`, compiling regex-bearing plugin rules.
    pub fn to_params(&self) -> Result<CollectorParams> {
        let schedule = self
            .schedule
            .iter()
            .map(|e| (e.task.clone(), e.interval.clone()))
            .collect();

        let mut plugins = Vec::with_capacity(self.plugins.len());
        for plugin in &self.plugins {
            plugins.push(match plugin {
                PluginConfig::Aggregator { by_label, reduce } => PluginSpec::Aggregator {
                    by_label: by_label.clone(),
                    reduce: (*reduce).into(),
                },
                PluginConfig::LabelAgent { rules } => {
                    let compiled: Result<Vec<LabelRule>> =
                        rules.iter().map(|r| r.compile()).collect();
                    PluginSpec::LabelAgent { rules: compiled? }
                }
            });
        }

        Ok(CollectorParams {
            schedule,
            plugins,
            export_options: self.export_options.clone(),
            global_labels: self.global_labels.clone(),
            datacenter: self.datacenter.clone(),
            export_data: self.export_data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let toml_str = r#"
            hostname = "host1"

            [[collectors]]
            name = "volume"
            object = "volume"

            [[collectors.schedule]]
            task = "data"
            interval = "60s"
        "#;
        let cfg: PollerConfig = toml::from_str(toml_str).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.collectors[0].schedule[0].interval, "60s");
    }

    #[test]
    fn rejects_empty_schedule() {
        let collector = CollectorConfig {
            name: "volume".into(),
            object: "volume".into(),
            schedule: vec![],
            plugins: vec![],
            export_options: HashMap::new(),
            global_labels: HashMap::new(),
            datacenter: None,
            export_data: true,
            exporters: vec![],
        };
        assert!(collector.validate().is_err());
    }

    #[test]
    fn rejects_unknown_linked_exporter() {
        let toml_str = r#"
            hostname = "host1"

            [[collectors]]
            name = "volume"
            object = "volume"
            exporters = ["missing"]

            [[collectors.schedule]]
            task = "data"
            interval = "60s"
        "#;
        let cfg: PollerConfig = toml::from_str(toml_str).unwrap();
        assert!(cfg.validate().is_err());
    }
}
