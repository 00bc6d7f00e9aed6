// Mappers module
pub mod models;
pub mod openai_to_gemini;
pub mod gemini_to_openai;
