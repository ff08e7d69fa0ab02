pub mod file;
pub mod http_cache;

use crate::{Error, Result, window::Timestamp};
use async_trait::async_trait;
use mockall::automock;
use std::sync::Mutex;

pub use file::FileWatermarkStore;
pub use http_cache::HttpCacheStore;

/// Key the watermark is stored under.
pub const WATERMARK_KEY: &str = "previously_processed_at";

/// Durable home of the single watermark timestamp.
///
/// One writer per run and no concurrent runs, so implementations do no
/// locking beyond what their backend needs.
#[automock]
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// The last committed watermark, or `None` if none was ever stored.
    /// Failing to reach the store is an error, never `None`.
    async fn get(&self) -> Result<Option<Timestamp>>;

    /// Overwrite the stored watermark.
    async fn put(&self, watermark: Timestamp) -> Result<()>;
}

/// Parse a stored watermark value.
pub(crate) fn parse_watermark(raw: &str) -> Result<Timestamp> {
    raw.trim()
        .parse()
        .map_err(|_| Error::Store(format!("stored watermark {raw:?} is not a timestamp")))
}

/// Process-local store, used in test mode.
#[derive(Debug, Default)]
pub struct MemoryWatermarkStore {
    value: Mutex<Option<Timestamp>>,
}

impl MemoryWatermarkStore {
    pub fn new(initial: Option<Timestamp>) -> Self {
        Self {
            value: Mutex::new(initial),
        }
    }
}

#[async_trait]
impl WatermarkStore for MemoryWatermarkStore {
    async fn get(&self) -> Result<Option<Timestamp>> {
        let value = self
            .value
            .lock()
            .map_err(|_| Error::Store("watermark lock poisoned".to_string()))?;
        Ok(*value)
    }

    async fn put(&self, watermark: Timestamp) -> Result<()> {
        let mut value = self
            .value
            .lock()
            .map_err(|_| Error::Store("watermark lock poisoned".to_string()))?;
        *value = Some(watermark);
        Ok(())
    }
}
