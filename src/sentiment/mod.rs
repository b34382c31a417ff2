// =============================================================================
// Sentiment — LLM call gate and advisory client
// =============================================================================

pub mod client;
pub mod gate;

pub use client::{SentimentAdvisory, SentimentClient};
pub use gate::{GateUsage, GateVerdict, SentimentGate};
