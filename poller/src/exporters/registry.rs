//! Name-to-constructor registry for built-in exporters.

use std::sync::Arc;

use anyhow::{bail, Result};
use shared::config::ExporterConfig;
use shared::exporter::Exporter;

use super::log::LogExporter;

pub fn build_exporter(config: &ExporterConfig) -> Result<Arc<dyn Exporter>> {
    match config.kind.as_str() {
        "log" => Ok(Arc::new(LogExporter::new(config.name.clone()))),
        other => bail!("no exporter registered for type {other:?}"),
    }
}
