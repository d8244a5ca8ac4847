//! Configuration types for cursor streams
//!
//! `StreamOptions` is the raw, user-facing form (every field optional, signed
//! integers so that bad input reaches validation). `StreamConfig` is the
//! validated form a stream is constructed from.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::error::{Result, StreamError};

/// Maximum number of rows fetched per poll
pub const DEFAULT_NROWS: usize = 1000;

/// Delay between polls while the consumer keeps reading
pub const DEFAULT_INTERVAL_MS: u64 = 10_000;

/// Consumer buffer threshold (in rows) before polling pauses
pub const DEFAULT_BUFFER_CAPACITY: usize = 1024;

/// Buffer threshold used by the factory and object-mode helpers
pub const OBJECT_MODE_BUFFER_CAPACITY: usize = 16;

/// Unvalidated stream options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamOptions {
    /// Query text the cursor is opened with
    pub query: Option<String>,

    /// Positional query parameters
    pub values: Option<Vec<Value>>,

    /// Maximum number of rows to fetch during each poll
    pub nrows: Option<i64>,

    /// Milliseconds between polls
    #[serde(alias = "intervalMs", alias = "interval")]
    pub interval_ms: Option<i64>,

    /// Number of buffered rows at which polling pauses
    #[serde(alias = "bufferCapacity", alias = "highWaterMark")]
    pub buffer_capacity: Option<i64>,
}

impl StreamOptions {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: Some(query.into()),
            ..Self::default()
        }
    }

    /// Parse options from a JSON object.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_values(mut self, values: Vec<Value>) -> Self {
        self.values = Some(values);
        self
    }

    pub fn with_nrows(mut self, nrows: i64) -> Self {
        self.nrows = Some(nrows);
        self
    }

    pub fn with_interval_ms(mut self, interval_ms: i64) -> Self {
        self.interval_ms = Some(interval_ms);
        self
    }

    pub fn with_buffer_capacity(mut self, capacity: i64) -> Self {
        self.buffer_capacity = Some(capacity);
        self
    }

    /// Validate the options and fill in defaults.
    pub fn validate(&self) -> Result<StreamConfig> {
        let query = match self.query.as_deref() {
            Some(q) if !q.trim().is_empty() => q.to_string(),
            Some(_) => {
                return Err(StreamError::Config(
                    "query option must be a non-empty string".to_string(),
                ))
            }
            None => return Err(StreamError::Config("query option is required".to_string())),
        };

        let nrows = match self.nrows {
            Some(n) => positive(n, "nrows")? as usize,
            None => DEFAULT_NROWS,
        };

        let interval_ms = match self.interval_ms {
            Some(ms) => positive(ms, "interval_ms")? as u64,
            None => DEFAULT_INTERVAL_MS,
        };

        let buffer_capacity = match self.buffer_capacity {
            Some(c) if c < 0 => {
                return Err(StreamError::Config(format!(
                    "buffer_capacity option must be nonnegative, got {}",
                    c
                )))
            }
            Some(c) => c as usize,
            None => DEFAULT_BUFFER_CAPACITY,
        };

        Ok(StreamConfig {
            query,
            values: self.values.clone().unwrap_or_default(),
            nrows,
            interval: Duration::from_millis(interval_ms),
            buffer_capacity,
        })
    }
}

fn positive(value: i64, name: &str) -> Result<i64> {
    if value > 0 {
        Ok(value)
    } else {
        Err(StreamError::Config(format!(
            "{} option must be a positive integer, got {}",
            name, value
        )))
    }
}

/// Validated stream configuration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamConfig {
    query: String,
    values: Vec<Value>,
    nrows: usize,
    #[serde(rename = "interval_ms", serialize_with = "serialize_millis")]
    interval: Duration,
    buffer_capacity: usize,
}

fn serialize_millis<S: serde::Serializer>(
    interval: &Duration,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(interval.as_millis() as u64)
}

impl StreamConfig {
    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }
}

impl TryFrom<StreamOptions> for StreamConfig {
    type Error = StreamError;

    fn try_from(options: StreamOptions) -> Result<Self> {
        options.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config = StreamOptions::new("SELECT * FROM trades").validate().unwrap();

        assert_eq!(config.query(), "SELECT * FROM trades");
        assert!(config.values().is_empty());
        assert_eq!(config.nrows(), 1000);
        assert_eq!(config.interval(), Duration::from_millis(10_000));
        assert_eq!(config.buffer_capacity(), 1024);
    }

    #[test]
    fn test_builder_overrides() {
        let config = StreamOptions::new("SELECT * FROM trades WHERE symbol = $1")
            .with_values(vec![json!("BTC-USD")])
            .with_nrows(50)
            .with_interval_ms(250)
            .with_buffer_capacity(0)
            .validate()
            .unwrap();

        assert_eq!(config.values(), &[json!("BTC-USD")]);
        assert_eq!(config.nrows(), 50);
        assert_eq!(config.interval(), Duration::from_millis(250));
        assert_eq!(config.buffer_capacity(), 0);
    }

    #[test]
    fn test_missing_or_empty_query() {
        assert!(StreamOptions::default().validate().unwrap_err().is_config());
        assert!(StreamOptions::new("   ").validate().unwrap_err().is_config());
    }

    #[test]
    fn test_rejects_out_of_range_numbers() {
        let base = StreamOptions::new("SELECT 1");

        assert!(base.clone().with_nrows(-1).validate().is_err());
        assert!(base.clone().with_nrows(0).validate().is_err());
        assert!(base.clone().with_interval_ms(0).validate().is_err());
        assert!(base.clone().with_buffer_capacity(-5).validate().is_err());
    }

    #[test]
    fn test_from_json_accepts_camel_case_aliases() {
        let options = StreamOptions::from_json(
            r#"{"query": "SELECT 1", "values": [1, "a"], "intervalMs": 50, "highWaterMark": 8}"#,
        )
        .unwrap();

        let config = options.validate().unwrap();
        assert_eq!(config.interval(), Duration::from_millis(50));
        assert_eq!(config.buffer_capacity(), 8);
        assert_eq!(config.values().len(), 2);
    }

    #[test]
    fn test_from_json_type_mismatches_are_config_errors() {
        let bad = [
            r#"{"query": 5}"#,
            r#"{"query": "SELECT 1", "values": "nope"}"#,
            r#"{"query": "SELECT 1", "nrows": 1.5}"#,
            r#"[]"#,
        ];

        for json in bad {
            let err = StreamOptions::from_json(json).unwrap_err();
            assert!(err.is_config(), "{} should be rejected", json);
        }
    }

    #[test]
    fn test_config_serializes_interval_as_millis() {
        let config = StreamOptions::new("SELECT 1")
            .with_interval_ms(75)
            .validate()
            .unwrap();

        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["interval_ms"], json!(75));
        assert_eq!(value["nrows"], json!(1000));
    }
}
