//! Infrastructure adapter for writing output files to local storage.

use crate::domain::errors::{ExtractError, Result};
use crate::ports::sink_port::SinkPort;
use async_trait::async_trait;
use log::debug;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Concrete implementation of `SinkPort` for the local filesystem.
///
/// The bytes are written to a `<name>.tmp` sibling first and then renamed over
/// the target, so readers never observe a half-written file.
#[derive(Debug, Default, Clone)]
pub struct LocalFileAdapter;

impl LocalFileAdapter {
    pub fn new() -> Self {
        Self
    }

    fn temp_path(path: &Path) -> PathBuf {
        let mut name: OsString = path.file_name().map(OsString::from).unwrap_or_default();
        name.push(".tmp");
        path.with_file_name(name)
    }
}

fn write_error(path: &Path) -> impl FnOnce(std::io::Error) -> ExtractError + '_ {
    move |source| ExtractError::WriteError {
        path: path.to_path_buf(),
        source,
    }
}

#[async_trait]
impl SinkPort for LocalFileAdapter {
    async fn write(&self, data: &[u8], path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(write_error(path))?;
        }

        let tmp = Self::temp_path(path);
        if let Err(e) = tokio::fs::write(&tmp, data).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(write_error(path)(e));
        }
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(write_error(path))?;

        debug!("Wrote {} bytes to {}", data.len(), path.display());
        Ok(())
    }
}
