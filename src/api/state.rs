//! Application state for the API server

use crate::{ChainProcessor, Config};
use std::sync::Arc;

/// Shared application state accessible to all route handlers
///
/// Cloned for each request; the processor is a bundle of `Arc`s.
#[derive(Clone)]
pub struct AppState {
    /// Processor that owns the invocation queue and the store
    pub processor: ChainProcessor,

    /// Configuration (read-only)
    pub config: Arc<Config>,
}

impl AppState {
    /// Create a new AppState
    pub fn new(processor: ChainProcessor, config: Arc<Config>) -> Self {
        Self { processor, config }
    }
}
