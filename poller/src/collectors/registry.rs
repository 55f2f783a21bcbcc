//! Name-to-constructor registry for built-in collectors, replacing
//! reflection-based dispatch with explicit registration.

use std::sync::Arc;

use anyhow::{bail, Result};
use shared::collector::Collector;
use shared::config::CollectorConfig;

use super::synthetic::{FixtureClient, SyntheticCollector};

pub fn build_collector(config: &CollectorConfig) -> Result<Arc<dyn Collector>> {
    match config.object.as_str() {
        "synthetic" => {
            let client = Arc::new(FixtureClient::new(Vec::new()));
            Ok(Arc::new(SyntheticCollector::new(
                config.name.clone(),
                config.object.clone(),
                client,
            )))
        }
        other => bail!("no collector registered for object {other:?}"),
    }
}
