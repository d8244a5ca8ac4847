//! Helpers that produce preconfigured cursor streams

use std::sync::Arc;

use crate::config::{StreamConfig, StreamOptions, OBJECT_MODE_BUFFER_CAPACITY};
use crate::error::Result;
use crate::stream::PollingCursorStream;
use crate::traits::CursorProvider;

fn with_object_mode_capacity(options: &StreamOptions) -> StreamOptions {
    let mut options = options.clone();
    if options.buffer_capacity.is_none() {
        options.buffer_capacity = Some(OBJECT_MODE_BUFFER_CAPACITY as i64);
    }
    options
}

/// Reusable factory that opens a fresh cursor stream per call.
///
/// Options are copied and validated once, so later changes to the caller's
/// options do not affect streams created afterwards.
pub struct StreamFactory<P: CursorProvider> {
    provider: Arc<P>,
    config: StreamConfig,
}

impl<P: CursorProvider> StreamFactory<P> {
    pub fn new(provider: Arc<P>, options: &StreamOptions) -> Result<Self> {
        let config = with_object_mode_capacity(options).validate()?;
        Ok(Self { provider, config })
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn create(&self) -> Result<PollingCursorStream<P::Cursor>> {
        let cursor = self
            .provider
            .open(self.config.query(), self.config.values())?;
        PollingCursorStream::new(Arc::new(cursor), self.config.clone())
    }
}

impl<P: CursorProvider> Clone for StreamFactory<P> {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider.clone(),
            config: self.config.clone(),
        }
    }
}

/// Create a single stream in structured-row mode.
///
/// Cursor streams always yield rows, so this only differs from
/// [`PollingCursorStream::open`] in its smaller default buffer capacity.
pub fn object_mode<P>(provider: &P, options: &StreamOptions) -> Result<PollingCursorStream<P::Cursor>>
where
    P: CursorProvider + ?Sized,
{
    PollingCursorStream::open(provider, &with_object_mode_capacity(options))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::StreamEvent;
    use crate::memory::MemoryProvider;
    use serde_json::json;

    fn provider() -> Arc<MemoryProvider> {
        let provider = MemoryProvider::new();
        provider.register("SELECT * FROM orders", vec![json!({"id": 1}), json!({"id": 2})]);
        Arc::new(provider)
    }

    #[test]
    fn test_factory_defaults_capacity_to_sixteen() {
        let factory = StreamFactory::new(provider(), &StreamOptions::new("SELECT * FROM orders")).unwrap();
        assert_eq!(factory.config().buffer_capacity(), 16);

        let explicit = StreamOptions::new("SELECT * FROM orders").with_buffer_capacity(64);
        let factory = StreamFactory::new(provider(), &explicit).unwrap();
        assert_eq!(factory.config().buffer_capacity(), 64);
    }

    #[test]
    fn test_factory_rejects_invalid_options() {
        let options = StreamOptions::new("SELECT * FROM orders").with_nrows(0);
        assert!(StreamFactory::new(provider(), &options).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_factory_creates_independent_streams() {
        let options = StreamOptions::new("SELECT * FROM orders").with_interval_ms(10);
        let factory = StreamFactory::new(provider(), &options).unwrap();

        let mut first = factory.create().unwrap();
        let mut second = factory.clone().create().unwrap();

        assert_eq!(first.next_event().await, Some(StreamEvent::Data(json!({"id": 1}))));
        assert_eq!(second.next_event().await, Some(StreamEvent::Data(json!({"id": 1}))));
        assert_eq!(first.next_event().await, Some(StreamEvent::Data(json!({"id": 2}))));
    }

    #[tokio::test]
    async fn test_factory_surfaces_provider_errors() {
        let options = StreamOptions::new("SELECT * FROM unknown");
        let factory = StreamFactory::new(provider(), &options).unwrap();
        assert!(factory.create().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_object_mode_streams_rows() {
        let provider = provider();
        let mut stream = object_mode(provider.as_ref(), &StreamOptions::new("SELECT * FROM orders")).unwrap();

        assert_eq!(stream.config().buffer_capacity(), 16);
        assert_eq!(stream.next_event().await, Some(StreamEvent::Data(json!({"id": 1}))));
    }
}
