//! Dialect translation.
//!
//! Three public dialects (OpenAI chat-completions, Anthropic messages,
//! Gemini generate-content) are translated to and from the single internal
//! Gemini-shaped dialect the in-page client speaks.

pub mod error;
pub mod internal;
pub mod model;
pub mod request;
pub mod response;
pub mod schema;
pub mod usage;

pub use {
    error::{Error, Result},
    internal::{InternalRequest, THOUGHT_SIGNATURE_PLACEHOLDER},
    model::split_model_suffix,
    request::{TranslateOptions, TranslatedRequest},
    response::{Dialect, SseFrame, StreamState},
};
