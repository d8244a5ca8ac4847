//! Polarway Cursor Streams
//! =======================
//!
//! Pull-based streams over paginated server-side cursors:
//! - Lazy polling: nothing is fetched until the consumer reads
//! - Fixed-interval re-polling while the consumer keeps up
//! - Backpressure: polling pauses once the consumer buffer is full
//! - Idempotent shutdown that closes the cursor exactly once
//! - In-memory cursors for replaying captured result sets

pub mod error;
pub mod config;
pub mod traits;
pub mod memory;
pub mod buffer;
pub mod stream;
pub mod factory;

pub use error::{StreamError, Result};
pub use config::{StreamOptions, StreamConfig};
pub use traits::{Cursor, CursorProvider};
pub use memory::{MemoryCursor, MemoryProvider};
pub use buffer::{StreamEvent, Lifecycle, StreamStats};
pub use stream::{PollingCursorStream, StreamBuilder};
pub use factory::{StreamFactory, object_mode};
