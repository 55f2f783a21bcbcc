//! The columnar Matrix data model: the uniform container that carries
//! samples between collectors, plugins and exporters.
//!
//! Values are stored as `f64` regardless of the metric's declared type; a
//! cell is "absent" when it is `f64::NAN`, matching the upstream
//! not-a-number presence check.

use std::collections::HashMap;

use crate::errors::{ClassifiedError, ErrorClass};

pub type Result<T> = std::result::Result<T, ClassifiedError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Int64,
    Uint64,
    Float64,
}

#[derive(Debug, Clone)]
pub struct Metric {
    pub name: String,
    pub display_name: String,
    pub metric_type: MetricType,
    pub index: usize,
    pub enabled: bool,
    pub scalar: bool,
    pub array_labels: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Instance {
    pub name: String,
    pub index: usize,
    pub display_name: String,
    pub labels: HashMap<String, String>,
}

/// Columnar table keyed by (metric key, instance key). Indices are stable
/// for the lifetime of the Matrix: `NewMetric`/`NewInstance` are the only
/// ways to grow the schema and never reuse an index within the same
/// Matrix instance.
#[derive(Debug, Clone)]
pub struct Matrix {
    pub object: String,
    pub uuid: String,
    global_labels: HashMap<String, String>,
    label_names: HashMap<String, String>,
    metrics: HashMap<String, Metric>,
    instances: HashMap<String, Instance>,
    /// Data[metric_index][instance_index].
    data: Vec<Vec<f64>>,
    export_options: HashMap<String, String>,
    exportable: bool,
}

impl Matrix {
    pub fn new(object: impl Into<String>) -> Self {
        Self {
            object: object.into(),
            uuid: uuid::Uuid::new_v4().to_string(),
            global_labels: HashMap::new(),
            label_names: HashMap::new(),
            metrics: HashMap::new(),
            instances: HashMap::new(),
            data: Vec::new(),
            export_options: HashMap::new(),
            exportable: true,
        }
    }

    /// Idempotent by key: returns the existing metric if `key` is already
    /// present, otherwise allocates the next free row.
    pub fn new_metric(&mut self, key: &str, metric_type: MetricType) -> Metric {
        if let Some(existing) = self.metrics.get(key) {
            return existing.clone();
        }
        let index = self.metrics.len();
        let metric = Metric {
            name: key.to_string(),
            display_name: key.to_string(),
            metric_type,
            index,
            enabled: true,
            scalar: true,
            array_labels: Vec::new(),
        };
        self.data.push(vec![f64::NAN; self.instances.len()]);
        self.metrics.insert(key.to_string(), metric.clone());
        metric
    }

    /// Idempotent by key: returns the existing instance if `key` is
    /// already present, otherwise allocates the next free column.
    pub fn new_instance(&mut self, key: &str) -> Instance {
        if let Some(existing) = self.instances.get(key) {
            return existing.clone();
        }
        let index = self.instances.len();
        let instance = Instance {
            name: key.to_string(),
            index,
            display_name: key.to_string(),
            labels: HashMap::new(),
        };
        for row in &mut self.data {
            row.push(f64::NAN);
        }
        self.instances.insert(key.to_string(), instance.clone());
        instance
    }

    pub fn get_metric(&self, key: &str) -> Option<&Metric> {
        self.metrics.get(key)
    }

    pub fn get_instance(&self, key: &str) -> Option<&Instance> {
        self.instances.get(key)
    }

    pub fn metrics(&self) -> impl Iterator<Item = &Metric> {
        self.metrics.values()
    }

    pub fn instances(&self) -> impl Iterator<Item = &Instance> {
        self.instances.values()
    }

    fn check_index(&self, metric: &Metric, instance: &Instance) -> Result<()> {
        if metric.index >= self.data.len() {
            return Err(ClassifiedError::new(
                ErrorClass::InvalidParam,
                format!("no such metric index {}", metric.index),
            ));
        }
        if instance.index >= self.data[metric.index].len() {
            return Err(ClassifiedError::new(
                ErrorClass::InvalidParam,
                format!("no such instance index {}", instance.index),
            ));
        }
        Ok(())
    }

    pub fn set_value(&mut self, metric: &Metric, instance: &Instance, value: f64) -> Result<()> {
        self.check_index(metric, instance)?;
        self.data[metric.index][instance.index] = value;
        Ok(())
    }

    /// Parses a raw sample string into a numeric value before storing it;
    /// a parse failure propagates a typed error instead of silently
    /// leaving the cell absent.
    pub fn set_value_str(&mut self, metric: &Metric, instance: &Instance, raw: &str) -> Result<()> {
        let value: f64 = raw.trim().parse().map_err(|_| {
            ClassifiedError::new(
                ErrorClass::InvalidParam,
                format!("cannot parse {raw:?} as numeric value"),
            )
        })?;
        self.set_value(metric, instance, value)
    }

    pub fn get_value(&self, metric: &Metric, instance: &Instance) -> Result<(f64, bool)> {
        self.check_index(metric, instance)?;
        let value = self.data[metric.index][instance.index];
        Ok((value, !value.is_nan()))
    }

    /// Creates the metric/instance on demand (used by self-telemetry,
    /// where the caller doesn't hold handles yet).
    pub fn lazy_set_value(&mut self, metric_key: &str, instance_key: &str, value: f64) {
        let metric = self.new_metric(metric_key, MetricType::Float64);
        let instance = self.new_instance(instance_key);
        self.data[metric.index][instance.index] = value;
    }

    pub fn lazy_get_value(&self, metric_key: &str, instance_key: &str) -> Option<(f64, bool)> {
        let metric = self.metrics.get(metric_key)?;
        let instance = self.instances.get(instance_key)?;
        let value = self.data[metric.index][instance.index];
        Some((value, !value.is_nan()))
    }

    pub fn set_global_label(&mut self, label: impl Into<String>, value: impl Into<String>) {
        self.global_labels.insert(label.into(), value.into());
    }

    pub fn global_labels(&self) -> &HashMap<String, String> {
        &self.global_labels
    }

    pub fn add_label(&mut self, key: impl Into<String>, display_name: impl Into<String>) {
        self.label_names.insert(key.into(), display_name.into());
    }

    pub fn set_instance_label(&mut self, instance_key: &str, label: &str, value: impl Into<String>) {
        let display = self
            .label_names
            .get(label)
            .cloned()
            .unwrap_or_else(|| label.to_string());
        if let Some(instance) = self.instances.get_mut(instance_key) {
            instance.labels.insert(display, value.into());
        }
    }

    /// Instance labels shadow global labels of the same name on export.
    pub fn get_instance_labels(&self, instance_key: &str) -> HashMap<String, String> {
        let mut merged = self.global_labels.clone();
        if let Some(instance) = self.instances.get(instance_key) {
            for (k, v) in &instance.labels {
                merged.insert(k.clone(), v.clone());
            }
        }
        merged
    }

    pub fn set_export_options(&mut self, options: HashMap<String, String>) {
        self.export_options = options;
    }

    pub fn export_options(&self) -> &HashMap<String, String> {
        &self.export_options
    }

    pub fn set_exportable(&mut self, exportable: bool) {
        self.exportable = exportable;
    }

    pub fn is_exportable(&self) -> bool {
        self.exportable
    }

    /// Clears all data cells to absent. Metric/instance schema (and their
    /// indices) survive untouched so in-flight handles from this cycle
    /// stay valid.
    pub fn reset(&mut self) {
        for row in &mut self.data {
            for cell in row.iter_mut() {
                *cell = f64::NAN;
            }
        }
    }

    /// Deep copy of the schema; `with_data` also copies the Data array.
    pub fn clone_matrix(&self, with_data: bool) -> Matrix {
        let mut copy = self.clone();
        copy.uuid = uuid::Uuid::new_v4().to_string();
        if !with_data {
            for row in &mut copy.data {
                for cell in row.iter_mut() {
                    *cell = f64::NAN;
                }
            }
        }
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_metric_and_instance_are_idempotent() {
        let mut m = Matrix::new("volume");
        let a = m.new_metric("read_ops", MetricType::Float64);
        let b = m.new_metric("read_ops", MetricType::Float64);
        assert_eq!(a.index, b.index);

        let i1 = m.new_instance("vol1");
        let i2 = m.new_instance("vol1");
        assert_eq!(i1.index, i2.index);
    }

    #[test]
    fn set_and_get_value_roundtrip() {
        let mut m = Matrix::new("volume");
        let metric = m.new_metric("read_ops", MetricType::Float64);
        let instance = m.new_instance("vol1");
        m.set_value(&metric, &instance, 42.0).unwrap();
        let (value, present) = m.get_value(&metric, &instance).unwrap();
        assert!(present);
        assert_eq!(value, 42.0);
    }

    #[test]
    fn unset_cell_is_absent() {
        let mut m = Matrix::new("volume");
        let metric = m.new_metric("read_ops", MetricType::Float64);
        let instance = m.new_instance("vol1");
        let (_, present) = m.get_value(&metric, &instance).unwrap();
        assert!(!present);
    }

    #[test]
    fn reset_clears_data_but_keeps_schema() {
        let mut m = Matrix::new("volume");
        let metric = m.new_metric("read_ops", MetricType::Float64);
        let instance = m.new_instance("vol1");
        m.set_value(&metric, &instance, 1.0).unwrap();
        m.reset();
        let (_, present) = m.get_value(&metric, &instance).unwrap();
        assert!(!present);
        // schema survives: re-adding the same key returns the same index
        let again = m.new_metric("read_ops", MetricType::Float64);
        assert_eq!(again.index, metric.index);
    }

    #[test]
    fn instance_label_shadows_global_label() {
        let mut m = Matrix::new("volume");
        m.new_instance("vol1");
        m.set_global_label("datacenter", "east");
        m.set_instance_label("vol1", "datacenter", "west");
        let labels = m.get_instance_labels("vol1");
        assert_eq!(labels.get("datacenter"), Some(&"west".to_string()));
    }

    #[test]
    fn set_value_str_rejects_unparseable_input() {
        let mut m = Matrix::new("volume");
        let metric = m.new_metric("read_ops", MetricType::Float64);
        let instance = m.new_instance("vol1");
        let err = m.set_value_str(&metric, &instance, "not-a-number").unwrap_err();
        assert_eq!(err.class, ErrorClass::InvalidParam);
    }

    #[test]
    fn lazy_set_value_creates_schema_on_demand() {
        let mut m = Matrix::new("meta");
        m.lazy_set_value("poll_time", "data", 12.5);
        let (value, present) = m.lazy_get_value("poll_time", "data").unwrap();
        assert!(present);
        assert_eq!(value, 12.5);
    }

    #[test]
    fn clone_without_data_preserves_schema_only() {
        let mut m = Matrix::new("volume");
        let metric = m.new_metric("read_ops", MetricType::Float64);
        let instance = m.new_instance("vol1");
        m.set_value(&metric, &instance, 7.0).unwrap();

        let schema_only = m.clone_matrix(false);
        let (_, present) = schema_only.get_value(&metric, &instance).unwrap();
        assert!(!present);

        let with_data = m.clone_matrix(true);
        let (value, present) = with_data.get_value(&metric, &instance).unwrap();
        assert!(present);
        assert_eq!(value, 7.0);
    }
}
