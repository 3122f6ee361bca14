//! LLM provider implementations.
//!
//! `build(config)` is the factory — called once per session.

pub mod local;
pub mod openai_compatible;

use crate::config::{Config, LlmConfig, ProviderKind};
use crate::llm::{LlmProvider, ProviderError};

/// Construct the provider selected by `config.provider`.
pub fn build(config: &Config) -> Result<LlmProvider, ProviderError> {
    match config.provider {
        ProviderKind::Local => Ok(LlmProvider::Local(local::LocalProvider)),
        ProviderKind::OpenAiCompatible => Ok(LlmProvider::OpenAiCompatible(build_http(
            &config.llm,
            config.llm_api_key.clone(),
        )?)),
    }
}

/// Construct the HTTP backend regardless of the selected provider tag.
///
/// `api_key` is sourced from `LLM_API_KEY` env (never the JSON file) and is
/// `None` for keyless local servers.
pub fn build_http(
    llm: &LlmConfig,
    api_key: Option<String>,
) -> Result<openai_compatible::OpenAiCompatibleProvider, ProviderError> {
    openai_compatible::OpenAiCompatibleProvider::new(
        llm.base_url.clone(),
        llm.model.clone(),
        openai_compatible::Sampling {
            temperature: llm.temperature,
            top_p: llm.top_p,
            max_tokens: llm.max_tokens,
        },
        llm.timeout_seconds,
        api_key,
    )
}
