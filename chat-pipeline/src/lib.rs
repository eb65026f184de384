#![allow(clippy::missing_docs_in_private_items)]

pub mod context;
pub mod orchestrator;
pub mod prompts;
pub mod sources;

pub use context::{ContextBuilder, ConversationContext};
pub use orchestrator::{ChatOutcome, RagOrchestrator, ToolLoopState};
