pub mod ilp;

pub use ilp::IlpSink;

use async_trait::async_trait;

use crate::domain::SiteEnergy;

#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    #[error("sink write failed: {0}")]
    Write(String),
}

/// Downstream publish contract: one call per merged reading, in timestamp
/// order. A returned `Ok` is the confirmation the scheduler advances its
/// checkpoint on.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn publish(&self, reading: &SiteEnergy) -> Result<(), SinkError>;
}
