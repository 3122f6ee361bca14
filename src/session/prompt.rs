//! Prompt assembly for one exchange.
//!
//! A prompt is a stack of fragments joined by blank lines:
//!
//! ```text
//! 0. persona      — `<prompts_dir>/persona.md`, or the built-in persona
//! 1. style lines  — sentence limit (compact mode), no-emoji request
//! 2. body         — the joke, the theme, or a request for a fresh joke
//! ```
//!
//! `{{key}}` placeholders are substituted once, at [`build()`](PromptBuilder::build) time.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::config::StyleConfig;
use crate::corpus::CorpusRecord;

use super::SessionState;

const SEPARATOR: &str = "\n\n";

/// Built-in persona, used when no `persona.md` is configured.
pub const DEFAULT_PERSONA: &str =
    "Tu es Nestor, ado ophanim/cartoon sympa. Rating: {{rating}}. Garde un ton bienveillant et drôle.";

pub const PERSONA_FILENAME: &str = "persona.md";

/// Fluent builder for layered prompts.
#[derive(Debug, Default)]
pub struct PromptBuilder {
    parts: Vec<String>,
    vars: HashMap<String, String>,
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `dir/filename` when both exist and the file is non-blank,
    /// otherwise append `fallback`.
    pub fn layer_or(self, dir: Option<&Path>, filename: &str, fallback: &str) -> Self {
        let loaded = dir.and_then(|d| {
            let path = d.join(filename);
            match fs::read_to_string(&path) {
                Ok(text) if !text.trim().is_empty() => Some(text),
                Ok(_) => None,
                Err(_) => {
                    tracing::debug!("prompt: layer '{}' not found — using built-in", path.display());
                    None
                }
            }
        });
        match loaded {
            Some(text) => self.append(text),
            None => self.append(fallback),
        }
    }

    /// Directly append a text fragment. Blank fragments are dropped.
    pub fn append(mut self, text: impl Into<String>) -> Self {
        let s = text.into();
        let trimmed = s.trim();
        if !trimmed.is_empty() {
            self.parts.push(trimmed.to_string());
        }
        self
    }

    /// Append `text` only when `cond` holds.
    pub fn append_if(self, cond: bool, text: impl Into<String>) -> Self {
        if cond { self.append(text) } else { self }
    }

    /// Register a `{{key}}` → `value` substitution.
    pub fn var(mut self, key: &str, value: impl Into<String>) -> Self {
        self.vars.insert(key.to_string(), value.into());
        self
    }

    /// Join all fragments and apply variable substitution.
    pub fn build(self) -> String {
        let mut prompt = self.parts.join(SEPARATOR);
        for (k, v) in &self.vars {
            let placeholder = format!("{{{{{k}}}}}");
            prompt = prompt.replace(&placeholder, v);
        }
        prompt
    }
}

/// Render `record` into the prompt sent to the provider.
pub fn build_prompt(
    record: &CorpusRecord,
    state: &SessionState,
    style: &StyleConfig,
    prompts_dir: Option<&Path>,
) -> String {
    let body = match (record.setup(), record.punch()) {
        (Some(setup), Some(punch)) => format!("Blague:\nSetup: {setup}\nPunchline: {punch}"),
        (Some(setup), None) => format!("Complète ou remixe avec humour:\n{setup}"),
        _ => "Fais une petite blague propre et originale.".to_string(),
    };

    PromptBuilder::new()
        .layer_or(prompts_dir, PERSONA_FILENAME, DEFAULT_PERSONA)
        .append_if(
            state.compact,
            format!("Réponds en {} phrases maximum.", style.target_sentences),
        )
        .append_if(!style.emoji, "N'utilise pas d'emojis.")
        .append(body)
        .var("rating", state.rating.as_str())
        .build()
}
