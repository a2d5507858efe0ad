//! Provider-neutral "chat with tool calls" client used by the MaShell agent.
//!
//! The agent loop only depends on [`Client::complete`]: a request carries the
//! conversation and tool definitions, a response carries text and/or an ordered
//! list of tool calls. Provider wire formats live behind [`ProviderAdapter`].

pub mod client;
pub mod errors;
pub mod openai;
pub mod provider;
pub mod types;

pub use client::{Client, CompleteHandler, Middleware, TracingMiddleware};
pub use errors::{ConfigurationError, SDKError};
pub use openai::{OpenAiCompatibleAdapter, ProviderFlavor};
pub use provider::ProviderAdapter;
pub use types::*;
