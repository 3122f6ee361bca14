//! Application-wide error types.

use thiserror::Error;

use crate::config::ConfigError;
use crate::corpus::CorpusError;
use crate::llm::ProviderError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("corpus error: {0}")]
    Corpus(#[from] CorpusError),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
