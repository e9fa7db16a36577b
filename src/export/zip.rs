use super::{Item, ItemProcessor, is_safe_relative};
use crate::types::{SubTaskInput, SubTaskOutput};
use crate::{Error, Result};
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::task::spawn_blocking;

/// Writes each item as a single-entry zip archive
///
/// The archive lands at `<export_dir>/<data_key>.zip` and holds `<item_id>.json`.
/// The returned output key is the archive path relative to `export_dir`.
#[derive(Clone, Debug)]
pub struct ZipExporter {
    export_dir: PathBuf,
}

impl ZipExporter {
    /// Create an exporter writing below `export_dir`
    pub fn new(export_dir: impl Into<PathBuf>) -> Self {
        Self {
            export_dir: export_dir.into(),
        }
    }

    /// Directory archives are written to
    pub fn export_dir(&self) -> &Path {
        &self.export_dir
    }
}

#[async_trait]
impl ItemProcessor for ZipExporter {
    async fn process(&self, item: &Item, input: &SubTaskInput) -> Result<SubTaskOutput> {
        if !is_safe_relative(&input.data_key) {
            return Err(Error::Processor(format!(
                "invalid data key \"{}\"",
                input.data_key
            )));
        }

        let key = format!("{}.zip", input.data_key);
        let archive_path = self.export_dir.join(&key);
        let entry_name = format!("{}.json", item.id);
        let content = serde_json::to_vec_pretty(&item.payload)?;

        tracing::debug!(item_id = %item.id, key = %key, "writing item archive");

        // zip writing is synchronous file IO
        spawn_blocking(move || write_archive(&archive_path, &entry_name, &content))
            .await
            .map_err(|e| Error::Processor(format!("archive task panicked: {}", e)))??;

        Ok(SubTaskOutput {
            message: format!("Finish uploading data for item \"{}\"", item.id),
            key,
        })
    }
}

fn write_archive(archive_path: &Path, entry_name: &str, content: &[u8]) -> Result<()> {
    if let Some(parent) = archive_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = std::fs::File::create(archive_path)?;
    let mut writer = ::zip::ZipWriter::new(file);
    let options = ::zip::write::FileOptions::default()
        .compression_method(::zip::CompressionMethod::Deflated);

    writer
        .start_file(entry_name, options)
        .map_err(|e| Error::Processor(format!("failed to start zip entry: {}", e)))?;
    writer.write_all(content)?;
    writer
        .finish()
        .map_err(|e| Error::Processor(format!("failed to finish zip archive: {}", e)))?;

    Ok(())
}
