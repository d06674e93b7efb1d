use async_trait::async_trait;

use crate::agent_engine::context::TaskContext;
use crate::errors::WebClawResult;
use crate::page::types::{CompactSnapshot, Document};

/// Captures the live page. `Ok(None)` means nothing could be captured.
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    async fn get_snapshot(&self, ctx: &TaskContext) -> WebClawResult<Option<Document>>;
}

/// Pure reduction of a captured page to the compact form the model reads.
/// Must give every interactive element a unique id, stable for identical input.
pub trait SnapshotReducer: Send + Sync {
    fn reduce(&self, document: &Document) -> CompactSnapshot;
}
