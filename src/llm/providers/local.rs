//! Local provider — offline stub that hands the prompt back prefixed with
//! `[local]`. Also the fallback text when a remote backend fails.

use crate::llm::{LlmResponse, ProviderError};

#[derive(Debug, Clone)]
pub struct LocalProvider;

impl LocalProvider {
    pub fn complete(&self, content: &str, _system: Option<&str>) -> Result<LlmResponse, ProviderError> {
        Ok(LlmResponse {
            text: reply(content),
            usage: None,
        })
    }
}

/// The stub's reply for `content`.
pub fn reply(content: &str) -> String {
    format!("[local] {content}")
}
