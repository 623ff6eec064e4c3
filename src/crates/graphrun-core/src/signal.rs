//! Cooperative cancellation.

use crate::error::{GraphError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared abort flag.
///
/// Clones observe the same flag. The runner checks it at every suspension
/// point and before each dispatch; handlers already running are not
/// interrupted but may poll it themselves.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    aborted: Arc<AtomicBool>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// `Err(GraphError::Cancelled)` once aborted.
    pub fn check(&self) -> Result<()> {
        if self.is_aborted() {
            Err(GraphError::Cancelled)
        } else {
            Ok(())
        }
    }
}
