//! `scout-agent`: LLM providers and the `search_agent` executor.
//!
//! Providers implement [`provider::LlmProvider`]; [`router::ProviderRouter`]
//! chains several of them with failover. [`search::SearchExecutor`] plugs a
//! provider into the scheduler as the executor for `search_agent` jobs.

pub mod anthropic;
pub mod openai;
pub mod prompt;
pub mod provider;
pub mod router;
pub mod search;

pub use provider::{LlmProvider, NullProvider, ProviderError};
pub use search::{SearchExecutor, SEARCH_AGENT_KIND};
