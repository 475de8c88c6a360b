//! Local provider adapters.
//!
//! These talk to servers on localhost or the local network and need no API
//! key.

pub mod ollama;

pub use ollama::OllamaClient;
