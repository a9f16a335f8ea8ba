// ============================================================================
// Processing Context
// ============================================================================
//
// Carried into every BatchProcessor call:
// - the cancellation token of the consumer group (cancelled on close, on
//   parent cancellation or when a sibling receive loop fails)
// - the attributes of the message the batch was decoded from
//
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// Per-batch context handed to a [`BatchProcessor`](crate::BatchProcessor)
#[derive(Debug, Clone, Default)]
pub struct ProcessContext {
    cancel: CancellationToken,
    metadata: Option<Arc<HashMap<String, String>>>,
}

impl ProcessContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            metadata: None,
        }
    }

    /// Attach message attributes, replacing any previously attached ones
    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = Some(Arc::new(metadata));
        self
    }

    /// Attributes of the message being processed, if any were attached
    pub fn metadata(&self) -> Option<&HashMap<String, String>> {
        self.metadata.as_deref()
    }

    /// Shortcut for a single attribute
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata()?.get(key).map(String::as_str)
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
