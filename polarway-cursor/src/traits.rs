//! Trait definitions for cursor data sources

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// A server-side result cursor that hands out rows in bounded batches.
///
/// Both methods take `&self`: a stream may issue `close` while a `fetch` is
/// still outstanding, so implementations own whatever synchronization their
/// connection needs.
#[async_trait]
pub trait Cursor: Send + Sync + 'static {
    /// One structured record produced by the cursor
    type Row: Send + 'static;

    /// Fetch up to `max_rows` rows. An empty batch means the cursor is exhausted.
    async fn fetch(&self, max_rows: usize) -> anyhow::Result<Vec<Self::Row>>;

    /// Release the cursor. Called at most once per successful stream shutdown.
    async fn close(&self) -> anyhow::Result<()>;
}

/// Opens cursors for a query, e.g. a database connection.
pub trait CursorProvider: Send + Sync {
    type Cursor: Cursor;

    fn open(&self, query: &str, values: &[Value]) -> Result<Self::Cursor>;
}
