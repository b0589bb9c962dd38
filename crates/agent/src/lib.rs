//! Orchestrator runtime - drives one chat turn end-to-end.
//!
//! This crate is the control loop between the user, the Completion Service,
//! the Tool Server, and the pricing store:
//!
//! 1. **Completion** (`llm`) - OpenAI-compatible chat client with tool calling
//! 2. **Extraction** (`extractor`) - LLM-backed structured pricing extraction
//! 3. **Rate limiting** (`rate`) - minimum-interval gate between tool calls
//! 4. **Orchestration** (`orchestrator`) - the bounded tool-call loop
//!
//! The Completion Service decides *which* tools to call; the orchestrator
//! decides *whether* the loop may continue, persists extracted records, and
//! never lets a tool failure crash the session.

pub mod extractor;
pub mod llm;
pub mod orchestrator;
pub mod rate;

pub use extractor::LlmExtractor;
pub use llm::{CompletionClient, CompletionError, CompletionReply, OpenAiClient};
pub use orchestrator::Orchestrator;
pub use rate::RateGate;
