//! Exporter contract: a sink that serializes Matrices to a backend.
//!
//! Exporters maintain their own health status; a collector skips a
//! non-`up` exporter until it self-recovers, so `Export`/`get_status`
//! must be internally thread-safe (an exporter may be invoked
//! concurrently from several collectors).

use async_trait::async_trait;

use crate::errors::ClassifiedError;
use crate::matrix::Matrix;

pub type Result<T> = std::result::Result<T, ClassifiedError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExporterStatus {
    Up = 0,
    Standby = 1,
    Failed = 2,
}

#[async_trait]
pub trait Exporter: Send + Sync {
    fn name(&self) -> &str;
    async fn init(&self) -> Result<()> {
        Ok(())
    }
    /// Current health as (code, label, human-readable reason).
    fn get_status(&self) -> (ExporterStatus, &'static str, String);
    async fn export(&self, matrix: &Matrix) -> Result<()>;
}
