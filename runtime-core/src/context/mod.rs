//! ContextBuilder, Compactor, TokenBudgetManager (spec §4.6).
//!
//! Grounded directly on the teacher's `compress` module
//! (`CompactionConfig`, `PruneNode`, `CompactNode`) — kept as the same
//! token-budget-driven compaction idea, generalized from message-count
//! heuristics to the exact thresholds spec §4.6 names (0.7 warn, 0.8 compact).

mod builder;
mod compactor;
mod token_budget;

pub use builder::{ContextBuilder, ContextInputs};
pub use compactor::{CompactionReport, Compactor};
pub use token_budget::TokenBudgetManager;
