//! Scoring pipeline.
//!
//! Every fetched message flows through:
//! 1. `RulesEngine::evaluate()` — sender skip rules (no LLM)
//! 2. `ScoringPolicy::classify()` — prompt, model call, `interpret()`
//! 3. `LabelDecisionEngine::decide()` — thresholds → ordered labels
//! 4. `ScoringProcessor` — label application and ledger upsert

pub mod interpreter;
pub mod labels;
pub mod policy;
pub mod processor;
pub mod report;
pub mod rules;
pub mod types;

pub use interpreter::interpret;
pub use labels::LabelDecisionEngine;
pub use policy::ScoringPolicy;
pub use processor::{RunSummary, ScoredMessage, ScoringProcessor, spawn_continuous};
pub use report::generate_report;
pub use rules::RulesEngine;
pub use types::{Score, ScoreOutcome};
