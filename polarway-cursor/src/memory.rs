//! In-memory cursors over captured result sets

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::error::{Result, StreamError};
use crate::traits::{Cursor, CursorProvider};

/// Cursor that pages through rows held in memory.
pub struct MemoryCursor<R> {
    rows: Mutex<VecDeque<R>>,
    fetch_calls: AtomicUsize,
    close_calls: AtomicUsize,
    closed: AtomicBool,
}

impl<R> MemoryCursor<R> {
    pub fn new(rows: impl IntoIterator<Item = R>) -> Self {
        Self {
            rows: Mutex::new(rows.into_iter().collect()),
            fetch_calls: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn remaining(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<R: Send + 'static> Cursor for MemoryCursor<R> {
    type Row = R;

    async fn fetch(&self, max_rows: usize) -> anyhow::Result<Vec<R>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.is_closed() {
            anyhow::bail!("cursor is closed");
        }

        let mut rows = self.rows.lock();
        let n = max_rows.min(rows.len());
        Ok(rows.drain(..n).collect())
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("Memory cursor already closed");
        }
        self.rows.lock().clear();
        Ok(())
    }
}

/// Serves memory cursors for registered result sets, keyed by query text.
#[derive(Default)]
pub struct MemoryProvider {
    tables: RwLock<HashMap<String, Arc<Vec<Value>>>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the rows returned for `query`, replacing any previous set.
    pub fn register(&self, query: impl Into<String>, rows: Vec<Value>) {
        self.tables.write().insert(query.into(), Arc::new(rows));
    }

    /// Registered query texts, sorted.
    pub fn queries(&self) -> Vec<String> {
        let mut queries: Vec<String> = self.tables.read().keys().cloned().collect();
        queries.sort();
        queries
    }
}

impl CursorProvider for MemoryProvider {
    type Cursor = MemoryCursor<Value>;

    fn open(&self, query: &str, values: &[Value]) -> Result<Self::Cursor> {
        let tables = self.tables.read();
        let rows = tables.get(query).ok_or_else(|| {
            StreamError::Other(format!("no result set registered for query: {}", query))
        })?;

        debug!(query, params = values.len(), rows = rows.len(), "Opening memory cursor");
        Ok(MemoryCursor::new(rows.iter().cloned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_cursor_pages_then_exhausts() {
        let cursor = MemoryCursor::new(1..=5);

        assert_eq!(cursor.fetch(2).await.unwrap(), vec![1, 2]);
        assert_eq!(cursor.fetch(2).await.unwrap(), vec![3, 4]);
        assert_eq!(cursor.fetch(2).await.unwrap(), vec![5]);
        assert!(cursor.fetch(2).await.unwrap().is_empty());
        assert_eq!(cursor.fetch_calls(), 4);
    }

    #[tokio::test]
    async fn test_memory_cursor_rejects_fetch_after_close() {
        let cursor = MemoryCursor::new(vec!["a", "b"]);

        cursor.close().await.unwrap();
        cursor.close().await.unwrap();

        assert!(cursor.is_closed());
        assert_eq!(cursor.close_calls(), 2);
        assert_eq!(cursor.remaining(), 0);
        assert!(cursor.fetch(1).await.is_err());
    }

    #[tokio::test]
    async fn test_provider_opens_independent_cursors() {
        let provider = MemoryProvider::new();
        provider.register("SELECT * FROM fills", vec![json!({"id": 1}), json!({"id": 2})]);

        let first = provider.open("SELECT * FROM fills", &[]).unwrap();
        let second = provider.open("SELECT * FROM fills", &[json!(1)]).unwrap();

        assert_eq!(first.fetch(10).await.unwrap().len(), 2);
        assert_eq!(second.remaining(), 2);
        assert!(provider.open("SELECT * FROM missing", &[]).is_err());
    }

    #[test]
    fn test_register_replaces_existing_result_set() {
        let provider = MemoryProvider::new();
        provider.register("SELECT * FROM quotes", vec![json!({"bid": 1})]);
        provider.register("SELECT * FROM fills", vec![json!({"id": 1})]);
        provider.register("SELECT * FROM quotes", vec![]);

        assert_eq!(
            provider.queries(),
            vec!["SELECT * FROM fills".to_string(), "SELECT * FROM quotes".to_string()]
        );
        let quotes = provider.open("SELECT * FROM quotes", &[]).unwrap();
        assert_eq!(quotes.remaining(), 0);
    }
}
