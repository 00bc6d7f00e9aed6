//! Gemini Relay Core Library
//! OpenAI/Gemini schema mappers, upstream client and the streaming relay

pub mod config;
pub mod proxy;
