pub mod browser;
pub mod config;
pub mod error;
pub mod extract;
pub mod llm;
pub mod model;
pub mod output;
pub mod ratelimit;
pub mod research;
pub mod retry;
pub mod scrape;
pub mod search;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use error::{ResearchError, Result};
pub use model::{Query, ResearchResult, RunStatus};
pub use research::ResearchOrchestrator;
