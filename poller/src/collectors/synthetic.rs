//! A demonstration `Collector` backed by an injectable `TargetClient`,
//! standing in for the out-of-scope REST/XML wire clients. Useful as a
//! template for a real collector and to exercise the runtime end to end.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use shared::collector::{Collector, PollDiagnostics, Result};
use shared::errors::{ClassifiedError, ErrorClass};
use shared::matrix::{Matrix, MetricType};
use tokio::sync::Mutex;

/// A single polled sample: one instance's named metric values.
#[derive(Debug, Clone)]
pub struct Sample {
    pub instance: String,
    pub labels: Vec<(String, String)>,
    pub metrics: Vec<(String, f64)>,
}

/// The `PollX() -> Matrix` boundary this collector delegates to. The
/// default implementation is an in-memory fixture; a real collector
/// would implement this against a REST/XML client instead.
#[async_trait]
pub trait TargetClient: Send + Sync {
    async fn fetch_data(&self) -> Result<Vec<Sample>>;
}

/// An in-memory fixture usable in tests and demos.
pub struct FixtureClient {
    samples: Mutex<Vec<Sample>>,
    fail_next: Mutex<Option<ErrorClass>>,
}

impl FixtureClient {
    pub fn new(samples: Vec<Sample>) -> Self {
        Self {
            samples: Mutex::new(samples),
            fail_next: Mutex::new(None),
        }
    }

    pub async fn set_samples(&self, samples: Vec<Sample>) {
        *self.samples.lock().await = samples;
    }

    pub async fn fail_next_with(&self, class: ErrorClass) {
        *self.fail_next.lock().await = Some(class);
    }
}

#[async_trait]
impl TargetClient for FixtureClient {
    async fn fetch_data(&self) -> Result<Vec<Sample>> {
        if let Some(class) = self.fail_next.lock().await.take() {
            return Err(ClassifiedError::new(class, "fixture client simulated failure"));
        }
        Ok(self.samples.lock().await.clone())
    }
}

pub struct SyntheticCollector {
    name: String,
    object: String,
    client: std::sync::Arc<dyn TargetClient>,
    last_diagnostics: Mutex<PollDiagnostics>,
}

impl SyntheticCollector {
    pub fn new(name: impl Into<String>, object: impl Into<String>, client: std::sync::Arc<dyn TargetClient>) -> Self {
        Self {
            name: name.into(),
            object: object.into(),
            client,
            last_diagnostics: Mutex::new(PollDiagnostics::default()),
        }
    }
}

#[async_trait]
impl Collector for SyntheticCollector {
    fn name(&self) -> &str {
        &self.name
    }

    fn object(&self) -> &str {
        &self.object
    }

    async fn poll(&self, task: &str) -> Result<Matrix> {
        match task {
            "data" => {
                let started = Instant::now();
                let samples = self.client.fetch_data().await?;
                let api_time = started.elapsed();

                let mut matrix = Matrix::new(self.object.clone());
                if samples.is_empty() {
                    return Err(ClassifiedError::new(ErrorClass::ErrNoInstance, "target returned zero instances"));
                }
                for sample in &samples {
                    let instance = matrix.new_instance(&sample.instance);
                    for (label, value) in &sample.labels {
                        matrix.set_instance_label(&instance.name, label, value.clone());
                    }
                }
                if samples.iter().all(|s| s.metrics.is_empty()) {
                    return Err(ClassifiedError::new(ErrorClass::ErrNoMetric, "target returned zero metrics"));
                }
                for sample in &samples {
                    let instance = matrix.get_instance(&sample.instance).unwrap().clone();
                    for (metric_name, value) in &sample.metrics {
                        let metric = matrix.new_metric(metric_name, MetricType::Float64);
                        matrix.set_value(&metric, &instance, *value)?;
                    }
                }

                *self.last_diagnostics.lock().await = PollDiagnostics {
                    api_time: Some(api_time),
                    parse_time: Some(Duration::from_micros(1)),
                    calc_time: None,
                    content_length: Some(samples.len() as i64),
                };
                Ok(matrix)
            }
            other => Err(ClassifiedError::new(
                ErrorClass::ErrImplement,
                format!("synthetic collector has no handler for task {other:?}"),
            )),
        }
    }

    fn last_poll_diagnostics(&self) -> PollDiagnostics {
        self.last_diagnostics
            .try_lock()
            .map(|guard| *guard)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn polls_data_task_into_matrix() {
        let client = std::sync::Arc::new(FixtureClient::new(vec![Sample {
            instance: "i1".to_string(),
            labels: vec![("node".to_string(), "A".to_string())],
            metrics: vec![("read_ops".to_string(), 10.0)],
        }]));
        let collector = SyntheticCollector::new("demo", "volume", client);
        let matrix = collector.poll("data").await.unwrap();
        let metric = matrix.get_metric("read_ops").unwrap().clone();
        let instance = matrix.get_instance("i1").unwrap().clone();
        assert_eq!(matrix.get_value(&metric, &instance).unwrap(), (10.0, true));
    }

    #[tokio::test]
    async fn empty_samples_is_no_instance_error() {
        let client = std::sync::Arc::new(FixtureClient::new(vec![]));
        let collector = SyntheticCollector::new("demo", "volume", client);
        let err = collector.poll("data").await.unwrap_err();
        assert_eq!(err.class, ErrorClass::ErrNoInstance);
    }

    #[tokio::test]
    async fn unknown_task_is_implementation_error() {
        let client = std::sync::Arc::new(FixtureClient::new(vec![]));
        let collector = SyntheticCollector::new("demo", "volume", client);
        let err = collector.poll("counter").await.unwrap_err();
        assert_eq!(err.class, ErrorClass::ErrImplement);
    }

    #[tokio::test]
    async fn fixture_client_fails_once_then_recovers() {
        let sample = vec![Sample {
            instance: "i1".to_string(),
            labels: vec![],
            metrics: vec![("read_ops".to_string(), 1.0)],
        }];
        let client = std::sync::Arc::new(FixtureClient::new(sample.clone()));
        client.fail_next_with(ErrorClass::ErrConnection).await;
        let collector = SyntheticCollector::new("demo", "volume", client.clone());

        let err = collector.poll("data").await.unwrap_err();
        assert_eq!(err.class, ErrorClass::ErrConnection);

        let matrix = collector.poll("data").await.unwrap();
        assert!(matrix.get_instance("i1").is_some());
    }

    #[tokio::test]
    async fn set_samples_replaces_fixture_data() {
        let client = std::sync::Arc::new(FixtureClient::new(vec![]));
        client
            .set_samples(vec![Sample {
                instance: "i2".to_string(),
                labels: vec![],
                metrics: vec![("write_ops".to_string(), 5.0)],
            }])
            .await;
        let collector = SyntheticCollector::new("demo", "volume", client);
        let matrix = collector.poll("data").await.unwrap();
        assert!(matrix.get_instance("i2").is_some());
    }
}
