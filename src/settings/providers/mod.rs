mod docling;
mod ollama;

pub use docling::DoclingClient;
pub use ollama::{is_vision_model, OllamaClient};
