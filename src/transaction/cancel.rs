use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::types::DatabaseError;

/// Cooperative cancellation flag shared between a statement and its caller
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(CancellationRequested)` once [`Self::cancel`] has been called
    pub fn check(&self) -> Result<(), DatabaseError> {
        if self.is_cancelled() {
            Err(DatabaseError::CancellationRequested)
        } else {
            Ok(())
        }
    }
}
