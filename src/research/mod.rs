pub mod orchestrator;
pub mod prompt;

pub use orchestrator::ResearchOrchestrator;
pub use prompt::{PromptBuilder, PromptSettings};
