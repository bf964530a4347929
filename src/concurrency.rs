pub mod lock_manager;

pub use lock_manager::{AbortReason, LockManager, LockMode, TransactionAbort};
