//! Plugin chain: Matrix-in / Matrices-out transformers run synchronously,
//! in declared order, on the `data` task's result.

use std::collections::HashMap;

use async_trait::async_trait;
use regex::Regex;
use tracing::warn;

use crate::errors::ClassifiedError;
use crate::matrix::{Matrix, MetricType};

pub type Result<T> = std::result::Result<T, ClassifiedError>;

#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;
    async fn init(&mut self) -> Result<()> {
        Ok(())
    }
    async fn run(&mut self, input: &Matrix) -> Result<Vec<Matrix>>;
}

/// Runs `plugins` over `input` in order. A plugin error is logged and
/// discards only that plugin's output; it never aborts the chain.
pub async fn run_chain(plugins: &mut [Box<dyn Plugin>], input: &Matrix) -> Vec<Matrix> {
    let mut out = Vec::new();
    for plugin in plugins.iter_mut() {
        match plugin.run(input).await {
            Ok(mut matrices) => out.append(&mut matrices),
            Err(e) => warn!(plugin = plugin.name(), error = %e, "plugin failed"),
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceKind {
    Sum,
    Avg,
    Count,
}

/// Groups instances by the value of a label, emitting a new Matrix whose
/// instances are the groups and whose metric values are reduced per
/// group according to `reduce`.
pub struct Aggregator {
    by_label: String,
    reduce: ReduceKind,
}

impl Aggregator {
    pub fn new(by_label: impl Into<String>, reduce: ReduceKind) -> Self {
        Self {
            by_label: by_label.into(),
            reduce,
        }
    }
}

#[async_trait]
impl Plugin for Aggregator {
    fn name(&self) -> &str {
        "Aggregator"
    }

    async fn run(&mut self, input: &Matrix) -> Result<Vec<Matrix>> {
        let mut groups: Vec<String> = Vec::new();
        let mut members: HashMap<String, Vec<&crate::matrix::Instance>> = HashMap::new();
        for instance in input.instances() {
            let labels = input.get_instance_labels(&instance.name);
            let group = labels
                .get(&self.by_label)
                .cloned()
                .unwrap_or_else(|| "".to_string());
            if !members.contains_key(&group) {
                groups.push(group.clone());
            }
            members.entry(group).or_default().push(instance);
        }

        let mut output = Matrix::new(format!("{}_by_{}", input.object, self.by_label));
        for group in &groups {
            output.new_instance(group);
        }
        for metric in input.metrics() {
            let out_metric = output.new_metric(&metric.name, MetricType::Float64);
            for group in &groups {
                let out_instance = output.get_instance(group).unwrap().clone();
                let members = &members[group];
                let values: Vec<f64> = members
                    .iter()
                    .filter_map(|inst| {
                        input
                            .get_value(metric, inst)
                            .ok()
                            .filter(|(_, present)| *present)
                            .map(|(v, _)| v)
                    })
                    .collect();
                let reduced = match self.reduce {
                    ReduceKind::Sum => values.iter().sum(),
                    ReduceKind::Avg => {
                        if values.is_empty() {
                            f64::NAN
                        } else {
                            values.iter().sum::<f64>() / values.len() as f64
                        }
                    }
                    ReduceKind::Count => values.len() as f64,
                };
                if !reduced.is_nan() {
                    output.set_value(&out_metric, &out_instance, reduced)?;
                }
            }
        }
        Ok(vec![output])
    }
}

#[derive(Debug, Clone)]
pub enum LabelRule {
    /// Extracts a named capture group from `source` into `target`.
    Extract {
        source: String,
        pattern: Regex,
        target: String,
    },
    /// Splits `source` on `separator` into `targets`, positionally.
    Split {
        source: String,
        separator: String,
        targets: Vec<String>,
    },
    /// Joins `sources` with `separator` into `target`.
    Join {
        sources: Vec<String>,
        separator: String,
        target: String,
    },
    /// Copies `source` verbatim into `target`.
    Copy { source: String, target: String },
    /// Replaces occurrences of `pattern` in `source` with `replacement`,
    /// storing the result in `target`.
    Replace {
        source: String,
        pattern: Regex,
        replacement: String,
        target: String,
    },
}

/// Rewrites instance labels in place according to its declarative rules.
#[derive(Default)]
pub struct LabelAgent {
    rules: Vec<LabelRule>,
}

impl LabelAgent {
    pub fn new(rules: Vec<LabelRule>) -> Self {
        Self { rules }
    }

    fn apply_rule(rule: &LabelRule, labels: &HashMap<String, String>) -> Vec<(String, String)> {
        match rule {
            LabelRule::Extract {
                source,
                pattern,
                target,
            } => {
                let Some(value) = labels.get(source) else {
                    return Vec::new();
                };
                pattern
                    .captures(value)
                    .and_then(|c| c.get(1))
                    .map(|m| vec![(target.clone(), m.as_str().to_string())])
                    .unwrap_or_default()
            }
            LabelRule::Split {
                source,
                separator,
                targets,
            } => {
                let Some(value) = labels.get(source) else {
                    return Vec::new();
                };
                value
                    .split(separator.as_str())
                    .zip(targets.iter())
                    .map(|(part, target)| (target.clone(), part.to_string()))
                    .collect()
            }
            LabelRule::Join {
                sources,
                separator,
                target,
            } => {
                let joined = sources
                    .iter()
                    .map(|s| labels.get(s).cloned().unwrap_or_default())
                    .collect::<Vec<_>>()
                    .join(separator);
                vec![(target.clone(), joined)]
            }
            LabelRule::Copy { source, target } => labels
                .get(source)
                .map(|v| vec![(target.clone(), v.clone())])
                .unwrap_or_default(),
            LabelRule::Replace {
                source,
                pattern,
                replacement,
                target,
            } => labels
                .get(source)
                .map(|v| vec![(target.clone(), pattern.replace_all(v, replacement.as_str()).to_string())])
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl Plugin for LabelAgent {
    fn name(&self) -> &str {
        "LabelAgent"
    }

    async fn run(&mut self, input: &Matrix) -> Result<Vec<Matrix>> {
        let mut output = input.clone_matrix(true);
        let instance_names: Vec<String> = input.instances().map(|i| i.name.clone()).collect();
        for instance_name in instance_names {
            let labels = input.get_instance_labels(&instance_name);
            for rule in &self.rules {
                for (label, value) in Self::apply_rule(rule, &labels) {
                    output.set_instance_label(&instance_name, &label, value);
                }
            }
        }
        Ok(vec![output])
    }
}
