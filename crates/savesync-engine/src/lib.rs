//! SaveSync engine
//!
//! Drives one backup (locate, pack, upload, verify, record) or one restore
//! (download, verify, extract) per invocation, with at most one operation in
//! flight per game.

pub mod lock;
pub mod orchestrator;
pub mod state;

pub use lock::{OperationGuard, OperationLocks};
pub use orchestrator::Orchestrator;
pub use state::{OperationKind, OperationState, OperationTracker, StateTransition, TransitionSender};
