//! Proxy module - OpenAI-compatible front end relaying to Gemini

pub mod common;
pub mod completion;
pub mod handlers;
pub mod mappers;
pub mod relay;
pub mod server;
pub mod upstream;

pub use common::error::ProxyError;
pub use server::{AppState, ProxyServer};
