//! Remote (cloud-hosted) provider adapters.
//!
//! - **OpenAI** - chat completions and embeddings; also serves Deepseek
//! - **Claude** - Anthropic messages API
//! - **Gemini** - Google `generateContent` / `embedContent`
//! - **Qianfan** - Baidu ERNIE models behind an OAuth token exchange

pub mod claude;
pub mod gemini;
pub mod openai;
pub mod qianfan;

pub use claude::ClaudeClient;
pub use gemini::GeminiClient;
pub use openai::OpenAiClient;
pub use qianfan::QianfanClient;
