pub mod huggingface;
pub mod openai;
pub mod provider;
