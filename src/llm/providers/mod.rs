// src/llm/providers/mod.rs
// One adapter per upstream backend, each reconciling a different wire
// protocol to the normalized event stream.

mod anthropic;
mod gemini;
mod openai;
mod perplexity;

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;
pub use perplexity::PerplexityProvider;
