//! LLM provider abstraction.
//!
//! `LlmProvider` is an enum over concrete provider implementations.
//! Add a new variant + module in `providers/` for each additional backend.
//!
//! Calls are blocking: a session is one sequential cycle, so there is no
//! runtime to share.

pub mod providers;

use thiserror::Error;

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Request(String),
}

// ── Response ──────────────────────────────────────────────────────────────────

/// Token accounting reported by the backend, when it reports any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LlmUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub text: String,
    pub usage: Option<LlmUsage>,
}

// ── Provider enum ─────────────────────────────────────────────────────────────

/// All available provider backends.
///
/// Adding a backend = new module + new variant + new `complete` arm.
#[derive(Debug, Clone)]
pub enum LlmProvider {
    Local(providers::local::LocalProvider),
    OpenAiCompatible(providers::openai_compatible::OpenAiCompatibleProvider),
}

impl LlmProvider {
    /// Send `content` (and an optional system prompt) and return the reply.
    pub fn complete(&self, content: &str, system: Option<&str>) -> Result<LlmResponse, ProviderError> {
        match self {
            LlmProvider::Local(p) => p.complete(content, system),
            LlmProvider::OpenAiCompatible(p) => p.complete(content, system),
        }
    }

    /// `true` for backends that can fail at request time.
    pub fn is_remote(&self) -> bool {
        matches!(self, LlmProvider::OpenAiCompatible(_))
    }
}
