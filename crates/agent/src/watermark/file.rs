use super::{WATERMARK_KEY, WatermarkStore};
use crate::{Error, Result, window::Timestamp};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};
use tracing::debug;

#[derive(Debug, Serialize, Deserialize)]
struct WatermarkFile {
    #[serde(rename = "previously_processed_at")]
    watermark: Timestamp,
    updated_at: DateTime<Utc>,
}

/// Watermark kept in a JSON file on local disk.
///
/// A missing file means no watermark. A file that exists but cannot be read
/// or parsed is an error: starting over from an empty store would skip data.
#[derive(Debug, Clone)]
pub struct FileWatermarkStore {
    path: PathBuf,
}

impl FileWatermarkStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read(&self) -> Result<Option<Timestamp>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = ?self.path, "no watermark file yet");
                return Ok(None);
            }
            Err(err) => return Err(store_error("read", &self.path, err)),
        };

        let file: WatermarkFile = serde_json::from_str(&contents)
            .map_err(|err| store_error("parse", &self.path, err))?;
        Ok(Some(file.watermark))
    }

    /// Write to a temp file, sync it, then rename over the old file.
    fn write(&self, watermark: Timestamp) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| store_error("create dir for", parent, err))?;
        }

        let contents = serde_json::to_string_pretty(&WatermarkFile {
            watermark,
            updated_at: Utc::now(),
        })
        .map_err(|err| store_error("serialize", &self.path, err))?;

        let temp_path = self.path.with_extension("tmp");
        {
            let mut temp_file = fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp_path)
                .map_err(|err| store_error("create", &temp_path, err))?;
            temp_file
                .write_all(contents.as_bytes())
                .map_err(|err| store_error("write", &temp_path, err))?;
            temp_file
                .sync_all()
                .map_err(|err| store_error("sync", &temp_path, err))?;
        }

        fs::rename(&temp_path, &self.path)
            .map_err(|err| store_error("rename", &temp_path, err))?;

        debug!(path = ?self.path, watermark, "saved {WATERMARK_KEY}");
        Ok(())
    }
}

fn store_error(action: &str, path: &Path, err: impl std::fmt::Display) -> Error {
    Error::Store(format!("failed to {action} {}: {err}", path.display()))
}

#[async_trait]
impl WatermarkStore for FileWatermarkStore {
    async fn get(&self) -> Result<Option<Timestamp>> {
        self.read()
    }

    async fn put(&self, watermark: Timestamp) -> Result<()> {
        self.write(watermark)
    }
}
