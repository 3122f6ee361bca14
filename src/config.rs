//! Configuration loading with env-var overrides.
//!
//! Reads `nestor/config/config.json` relative to the current working directory
//! (or the path given by `-f` / `NESTOR_CONFIG`), then applies
//! `NESTOR_LOG_FILE` and `NESTOR_LOG_LEVEL` env overrides.

use std::{
    env, fmt, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

/// Config path used when neither `-f` nor `NESTOR_CONFIG` is given.
pub const DEFAULT_CONFIG_PATH: &str = "nestor/config/config.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("parse error in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("{0}")]
    Invalid(String),
}

/// Which backend answers prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// Offline stub, no network.
    Local,
    /// Any `/chat/completions` endpoint (LM Studio, Ollama, OpenAI…).
    OpenAiCompatible,
}

impl ProviderKind {
    /// Map a config tag to a provider. `lmstudio` and `openai` are accepted
    /// spellings of the HTTP backend.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "local" => Some(Self::Local),
            "lmstudio" | "openai" | "openai-compatible" => Some(Self::OpenAiCompatible),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::OpenAiCompatible => "openai-compatible",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `logging` object.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Append-only log file.
    pub file: PathBuf,
    /// Lower-case level filter string (`"info"`, `"warn"`…).
    pub level: String,
    /// Mirror log lines to stderr.
    pub echo: bool,
}

/// OpenAI-compatible backend settings (`llm` object).
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Base URL without the `/chat/completions` suffix.
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    /// Per-request HTTP timeout in seconds.
    pub timeout_seconds: u64,
}

/// Prompt style switches (`style` object).
#[derive(Debug, Clone)]
pub struct StyleConfig {
    pub compact_default: bool,
    pub target_sentences: u32,
    pub emoji: bool,
    pub rating: String,
}

/// Fully-resolved session configuration. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_path: PathBuf,
    /// Tried only when `data_path` does not exist.
    pub data_fallback_path: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub provider: ProviderKind,
    pub llm: LlmConfig,
    pub style: StyleConfig,
    /// Directory holding an optional `persona.md`.
    pub prompts_dir: Option<PathBuf>,
    /// Emotion routing file (`paths.emotions`).
    pub emotions_path: Option<PathBuf>,
    /// Tag replies with an emotion when `emotions_path` is set
    /// (`routing.use_router`, default on).
    pub use_router: bool,
    /// API key from `LLM_API_KEY` env var — `None` for keyless local servers.
    /// Never sourced from the JSON file.
    pub llm_api_key: Option<String>,
}

/// Raw JSON shape — `serde` target before resolution.
#[derive(Deserialize)]
struct RawConfig {
    data_path: String,
    #[serde(default)]
    data_fallback_path: Option<String>,
    #[serde(default)]
    logging: RawLogging,
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    llm: RawLlm,
    #[serde(default)]
    style: RawStyle,
    #[serde(default)]
    prompts_dir: Option<String>,
    #[serde(default)]
    paths: RawPaths,
    #[serde(default)]
    routing: RawRouting,
}

#[derive(Deserialize, Default)]
struct RawPaths {
    #[serde(default)]
    emotions: Option<String>,
}

#[derive(Deserialize)]
struct RawRouting {
    #[serde(default = "default_true")]
    use_router: bool,
}

impl Default for RawRouting {
    fn default() -> Self {
        Self { use_router: true }
    }
}

#[derive(Deserialize)]
struct RawLogging {
    #[serde(default = "default_log_file")]
    file: String,
    #[serde(default = "default_log_level")]
    level: String,
    #[serde(default = "default_true")]
    echo: bool,
}

impl Default for RawLogging {
    fn default() -> Self {
        Self {
            file: default_log_file(),
            level: default_log_level(),
            echo: true,
        }
    }
}

#[derive(Deserialize)]
struct RawLlm {
    /// Legacy spellings of the top-level `provider` tag.
    #[serde(default)]
    provider: Option<String>,
    #[serde(default)]
    backend: Option<String>,
    #[serde(default = "default_base_url")]
    base_url: String,
    #[serde(default = "default_model")]
    model: String,
    #[serde(default = "default_temperature")]
    temperature: f32,
    #[serde(default = "default_top_p")]
    top_p: f32,
    #[serde(default = "default_max_tokens")]
    max_tokens: u32,
    #[serde(default = "default_timeout_seconds")]
    timeout_seconds: u64,
}

impl Default for RawLlm {
    fn default() -> Self {
        Self {
            provider: None,
            backend: None,
            base_url: default_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_tokens: default_max_tokens(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

#[derive(Deserialize)]
struct RawStyle {
    #[serde(default)]
    compact_default: bool,
    #[serde(default = "default_target_sentences")]
    target_sentences: u32,
    #[serde(default = "default_true")]
    emoji: bool,
    #[serde(default = "default_rating")]
    rating: String,
}

impl Default for RawStyle {
    fn default() -> Self {
        Self {
            compact_default: false,
            target_sentences: default_target_sentences(),
            emoji: true,
            rating: default_rating(),
        }
    }
}

fn default_log_file() -> String { "logs/logs.txt".to_string() }
fn default_log_level() -> String { "INFO".to_string() }
fn default_base_url() -> String { "http://localhost:1234/v1".to_string() }
fn default_model() -> String { "openai/gpt-oss-20b".to_string() }
fn default_temperature() -> f32 { 0.6 }
fn default_top_p() -> f32 { 0.95 }
fn default_max_tokens() -> u32 { 512 }
fn default_timeout_seconds() -> u64 { 60 }
fn default_target_sentences() -> u32 { 2 }
fn default_rating() -> String { "G".to_string() }

fn default_true() -> bool {
    true
}

/// Config file location: explicit path, then the `NESTOR_CONFIG` value,
/// then [`DEFAULT_CONFIG_PATH`]. Empty values count as unset.
pub fn resolve_path(explicit: Option<&str>, env_value: Option<String>) -> PathBuf {
    explicit
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .or_else(|| env_value.filter(|p| !p.is_empty()).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Load config from `config_path`, `NESTOR_CONFIG`, or [`DEFAULT_CONFIG_PATH`],
/// then apply env-var overrides.
///
/// `log_level_override` comes from the command line and beats
/// `NESTOR_LOG_LEVEL`.
pub fn load(config_path: Option<&str>, log_level_override: Option<&str>) -> Result<Config, ConfigError> {
    let path = resolve_path(config_path, env::var("NESTOR_CONFIG").ok());
    let log_file_override = env::var("NESTOR_LOG_FILE").ok();
    let env_level = env::var("NESTOR_LOG_LEVEL").ok();
    load_from(
        &path,
        log_file_override.as_deref(),
        log_level_override.or(env_level.as_deref()),
    )
}

/// Internal loader — accepts an explicit path and optional overrides.
/// Tests pass overrides directly instead of mutating env vars.
pub fn load_from(
    path: &Path,
    log_file_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Config, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    // Tolerate a UTF-8 BOM.
    let text = raw.strip_prefix('\u{feff}').unwrap_or(&raw);

    let parsed: RawConfig = serde_json::from_str(text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    if parsed.data_path.trim().is_empty() {
        return Err(ConfigError::Invalid("data_path must not be empty".into()));
    }

    let tag = parsed
        .provider
        .or(parsed.llm.provider)
        .or(parsed.llm.backend)
        .unwrap_or_else(|| "local".to_string());
    let provider = ProviderKind::from_tag(&tag)
        .ok_or_else(|| ConfigError::Invalid(format!("unknown provider: '{tag}'")))?;

    let level = normalize_level(log_level_override.unwrap_or(&parsed.logging.level))?;
    let log_file = log_file_override.unwrap_or(&parsed.logging.file);

    Ok(Config {
        data_path: expand_home(&parsed.data_path),
        data_fallback_path: parsed.data_fallback_path.as_deref().map(expand_home),
        logging: LoggingConfig {
            file: expand_home(log_file),
            level,
            echo: parsed.logging.echo,
        },
        provider,
        llm: LlmConfig {
            base_url: parsed.llm.base_url,
            model: parsed.llm.model,
            temperature: parsed.llm.temperature,
            top_p: parsed.llm.top_p,
            max_tokens: parsed.llm.max_tokens,
            timeout_seconds: parsed.llm.timeout_seconds,
        },
        style: StyleConfig {
            compact_default: parsed.style.compact_default,
            target_sentences: parsed.style.target_sentences,
            emoji: parsed.style.emoji,
            rating: parsed.style.rating,
        },
        prompts_dir: parsed.prompts_dir.as_deref().map(expand_home),
        emotions_path: parsed.paths.emotions.as_deref().map(expand_home),
        use_router: parsed.routing.use_router,
        llm_api_key: env::var("LLM_API_KEY").ok(),
    })
}

/// Lower-case a level name and check that `tracing` understands it.
/// `WARNING` is accepted as an alias for `warn`.
fn normalize_level(level: &str) -> Result<String, ConfigError> {
    let lower = level.trim().to_ascii_lowercase();
    let lower = if lower == "warning" { "warn".to_string() } else { lower };
    if lower.is_empty() {
        return Err(ConfigError::Invalid("log level must not be empty".into()));
    }
    lower
        .parse::<LevelFilter>()
        .map_err(|_| ConfigError::Invalid(format!("unrecognised log level: '{level}'")))?;
    Ok(lower)
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

// ── test helpers ──────────────────────────────────────────────────────────────

/// Safe `Config` for tests — local provider, no API keys, no external calls.
/// Everything lives under `dir`.
#[doc(hidden)]
impl Config {
    pub fn test_default(dir: &Path) -> Self {
        Self {
            data_path: dir.join("corpus.jsonl"),
            data_fallback_path: None,
            logging: LoggingConfig {
                file: dir.join("logs").join("logs.txt"),
                level: "info".into(),
                echo: false,
            },
            provider: ProviderKind::Local,
            llm: LlmConfig {
                base_url: "http://localhost:0/v1".into(),
                model: "test-model".into(),
                temperature: 0.0,
                top_p: 1.0,
                max_tokens: 16,
                timeout_seconds: 1,
            },
            style: StyleConfig {
                compact_default: false,
                target_sentences: 2,
                emoji: true,
                rating: "G".into(),
            },
            prompts_dir: None,
            emotions_path: None,
            use_router: true,
            llm_api_key: None,
        }
    }
}
