// Transaction module - statement atomicity, intents and cancellation

mod cancel;
mod locks;
mod manager;
mod undo;

pub use cancel::CancellationToken;
pub use locks::{LockGuard, LockKey, LockManager, LockMode, LockRequest};
pub use manager::StatementManager;
pub use undo::{StatementState, StatementTransaction, UndoEntry};
