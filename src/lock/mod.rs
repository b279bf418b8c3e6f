//! Edit Locks
//!
//! Single-flight editing of externally visible resources across tasks and
//! processes.

mod distributed;
mod guard;

pub use distributed::{DistributedLock, LockLease};
pub use guard::{EditEntry, EntryMode, GuardConfig, GuardStats, ResourceEditGuard};
