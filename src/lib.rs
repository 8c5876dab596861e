//! steward: an autonomous task-execution loop for tool-using language
//! models.
//!
//! The executor drives multi-turn model/tool exchanges: it computes per-call
//! token budgets and timeouts, recovers from output truncation, gates tools
//! by execution mode and task domain, normalizes tool outcomes, detects
//! degenerate loops, and adjudicates completion against an evidence contract
//! derived from the task itself. Transport, tool dispatch, persistence, and
//! planning stay behind traits so hosts keep those concerns.

pub mod config;
pub mod events;
pub mod executor;
pub mod traits;

pub use config::{ExecutorConfig, LoopGuardrailConfig};
pub use executor::{
    BudgetedModelCall, CancelSignal, CompletionContract, CompletionVerdict, TaskExecutor,
    TaskOutcome, TaskSpec,
};
pub use traits::{ExecutionMode, TaskDomain};
