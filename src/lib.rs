//! Mail Scorer — LLM-driven importance and spam scoring for a mailbox.

pub mod config;
pub mod error;
pub mod llm;
pub mod mailbox;
pub mod pipeline;
pub mod store;
