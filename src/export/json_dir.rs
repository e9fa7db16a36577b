use super::{Item, ItemResolver, is_safe_relative};
use crate::{Error, Result};
use async_trait::async_trait;
use std::path::PathBuf;

/// Resolves items stored as `<dir>/<item_id>.json`
#[derive(Clone, Debug)]
pub struct JsonDirResolver {
    dir: PathBuf,
}

impl JsonDirResolver {
    /// Create a resolver reading from `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl ItemResolver for JsonDirResolver {
    async fn resolve(&self, item_id: &str) -> Result<Option<Item>> {
        if !is_safe_relative(item_id) || item_id.contains('/') {
            tracing::warn!(item_id, "rejecting item id that is not a plain file name");
            return Ok(None);
        }

        let path = self.dir.join(format!("{}.json", item_id));
        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Io(e)),
        };

        let payload: serde_json::Value = serde_json::from_slice(&content)?;
        Ok(Some(Item {
            id: item_id.to_string(),
            payload,
        }))
    }
}
