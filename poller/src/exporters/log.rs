//! A demonstration `Exporter` that renders Matrices via `tracing`,
//! standing in for the out-of-scope wire encodings.

use async_trait::async_trait;
use shared::errors::ClassifiedError;
use shared::exporter::{Exporter, ExporterStatus};
use shared::matrix::Matrix;
use tracing::debug;

pub struct LogExporter {
    name: String,
}

impl LogExporter {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Exporter for LogExporter {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_status(&self) -> (ExporterStatus, &'static str, String) {
        (ExporterStatus::Up, "up", String::new())
    }

    async fn export(&self, matrix: &Matrix) -> Result<(), ClassifiedError> {
        for instance in matrix.instances() {
            let labels = matrix.get_instance_labels(&instance.name);
            for metric in matrix.metrics() {
                if let Ok((value, present)) = matrix.get_value(metric, instance) {
                    if present {
                        debug!(
                            exporter = self.name.as_str(),
                            object = matrix.object.as_str(),
                            instance = instance.name.as_str(),
                            metric = metric.name.as_str(),
                            value,
                            ?labels,
                            "export"
                        );
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::matrix::MetricType;

    #[tokio::test]
    async fn export_does_not_error_on_populated_matrix() {
        let mut m = Matrix::new("volume");
        let metric = m.new_metric("read_ops", MetricType::Float64);
        let instance = m.new_instance("i1");
        m.set_value(&metric, &instance, 1.0).unwrap();

        let exporter = LogExporter::new("log");
        exporter.export(&m).await.unwrap();
        assert_eq!(exporter.get_status().0, ExporterStatus::Up);
    }
}
