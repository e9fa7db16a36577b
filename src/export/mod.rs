//! Item resolution and processing
//!
//! A sub-task only references its item by id. [`ItemResolver`] turns that id
//! into an [`Item`], and [`ItemProcessor`] does the domain work on it (e.g.
//! export one block into a zip). Neither sees the overall task.
//!
//! Provided implementations:
//! - [`JsonDirResolver`] loads items from `<items_dir>/<id>.json`
//! - [`ZipExporter`] writes each item to `<export_dir>/<data_key>.zip`

use crate::Result;
use crate::types::{SubTaskInput, SubTaskOutput};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

mod json_dir;
mod zip;

pub use json_dir::JsonDirResolver;
pub use zip::ZipExporter;

/// A resolved domain item
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Item id as referenced by sub-task inputs
    pub id: String,
    /// Item content
    pub payload: serde_json::Value,
}

/// Looks items up by id
#[async_trait]
pub trait ItemResolver: Send + Sync {
    /// Resolve an item
    ///
    /// Returns `Ok(None)` when the item does not exist. `Err` is reserved for
    /// lookups that could not be performed at all.
    async fn resolve(&self, item_id: &str) -> Result<Option<Item>>;
}

/// Performs the unit of work for one sub-task
#[async_trait]
pub trait ItemProcessor: Send + Sync {
    /// Process `item` into the destination named by `input.data_key`
    async fn process(&self, item: &Item, input: &SubTaskInput) -> Result<SubTaskOutput>;
}

/// Reject ids and keys that could escape their base directory
pub(crate) fn is_safe_relative(value: &str) -> bool {
    !value.is_empty()
        && !value.starts_with('/')
        && !value.contains('\\')
        && !value.contains('\0')
        && value.split('/').all(|part| !part.is_empty() && part != "." && part != "..")
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
