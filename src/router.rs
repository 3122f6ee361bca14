//! Keyword emotion router.
//!
//! Scores a piece of text against the `routing.emotions` table of an
//! emotions file and names the emotion an avatar should play:
//!
//! ```json
//! {
//!   "emotions": { "idle": { "file": "idle.mp4", "loop": true }, ... },
//!   "routing": {
//!     "strategy": { "min_score_to_trigger": 1.0, "tie_breaker": "priority",
//!                   "fallback": "idle", "cooldown_seconds": 2.0 },
//!     "emotions": {
//!       "joie": { "priority": 2, "keywords": { "rire": 1.0 },
//!                 "phrases": { "trop bien": 1.5 } }
//!     }
//!   }
//! }
//! ```
//!
//! Matching is case- and accent-insensitive. A keyword counts when it is a
//! whole word of the text, a phrase when it appears anywhere in it.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ConfigError;

/// How equal non-zero scores are settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TieBreaker {
    /// Higher `priority` wins; equal priorities keep the first emotion.
    Priority,
    /// The first emotion in name order wins.
    First,
}

impl TieBreaker {
    fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "priority" => Some(Self::Priority),
            "first" | "none" => Some(Self::First),
            _ => None,
        }
    }
}

/// Outcome of [`EmotionRouter::analyze`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Route {
    pub emotion: String,
    pub score: f64,
}

/// One entry of the `emotions` catalog (the clip played for an emotion).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmotionClip {
    pub name: String,
    /// Resolved against the emotions file's directory.
    pub file: PathBuf,
    #[serde(rename = "loop")]
    pub looped: bool,
    pub description: String,
}

#[derive(Debug, Clone)]
struct Emotion {
    name: String,
    priority: i64,
    keywords: Vec<(String, f64)>,
    phrases: Vec<(String, f64)>,
}

#[derive(Debug)]
pub struct EmotionRouter {
    emotions: Vec<Emotion>,
    catalog: Vec<EmotionClip>,
    min_score: f64,
    tie_breaker: TieBreaker,
    fallback: String,
    cooldown: Duration,
    last_trigger: Option<Instant>,
}

// ── raw JSON shape ───────────────────────────────────────────────────────────

#[derive(Deserialize, Default)]
struct RawEmotionsFile {
    #[serde(default)]
    emotions: BTreeMap<String, RawClip>,
    #[serde(default)]
    routing: RawRouting,
}

#[derive(Deserialize)]
struct RawClip {
    #[serde(default)]
    file: String,
    #[serde(default, rename = "loop")]
    looped: bool,
    #[serde(default)]
    description: String,
}

#[derive(Deserialize, Default)]
struct RawRouting {
    #[serde(default)]
    strategy: RawStrategy,
    #[serde(default)]
    emotions: BTreeMap<String, RawEmotion>,
}

#[derive(Deserialize)]
struct RawStrategy {
    #[serde(default = "default_min_score")]
    min_score_to_trigger: f64,
    #[serde(default = "default_tie_breaker")]
    tie_breaker: String,
    #[serde(default = "default_fallback")]
    fallback: String,
    #[serde(default = "default_cooldown")]
    cooldown_seconds: f64,
}

impl Default for RawStrategy {
    fn default() -> Self {
        Self {
            min_score_to_trigger: default_min_score(),
            tie_breaker: default_tie_breaker(),
            fallback: default_fallback(),
            cooldown_seconds: default_cooldown(),
        }
    }
}

#[derive(Deserialize)]
struct RawEmotion {
    #[serde(default)]
    priority: i64,
    #[serde(default)]
    keywords: BTreeMap<String, f64>,
    #[serde(default)]
    phrases: BTreeMap<String, f64>,
}

fn default_min_score() -> f64 { 1.0 }
fn default_tie_breaker() -> String { "priority".to_string() }
fn default_fallback() -> String { "idle".to_string() }
fn default_cooldown() -> f64 { 2.0 }

impl EmotionRouter {
    /// Read and validate an emotions file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let text = raw.strip_prefix('\u{feff}').unwrap_or(&raw);
        let parsed: RawEmotionsFile = serde_json::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let base = path.parent().unwrap_or(Path::new(""));
        Self::resolve(parsed, base)
    }

    /// Build from an in-memory JSON document; clip paths stay relative.
    pub fn from_value(value: serde_json::Value) -> Result<Self, ConfigError> {
        let parsed: RawEmotionsFile =
            serde_json::from_value(value).map_err(|e| ConfigError::Invalid(format!("emotions: {e}")))?;
        Self::resolve(parsed, Path::new(""))
    }

    fn resolve(parsed: RawEmotionsFile, base: &Path) -> Result<Self, ConfigError> {
        let strategy = parsed.routing.strategy;
        let tie_breaker = TieBreaker::from_tag(&strategy.tie_breaker)
            .ok_or_else(|| ConfigError::Invalid(format!("unknown tie_breaker: '{}'", strategy.tie_breaker)))?;
        let cooldown = Duration::try_from_secs_f64(strategy.cooldown_seconds).map_err(|_| {
            ConfigError::Invalid(format!("invalid cooldown_seconds: {}", strategy.cooldown_seconds))
        })?;
        if !strategy.min_score_to_trigger.is_finite() {
            return Err(ConfigError::Invalid("min_score_to_trigger must be finite".into()));
        }
        if strategy.fallback.trim().is_empty() {
            return Err(ConfigError::Invalid("fallback emotion must not be empty".into()));
        }

        let emotions = parsed
            .routing
            .emotions
            .into_iter()
            .map(|(name, e)| Emotion {
                name,
                priority: e.priority,
                keywords: e.keywords.into_iter().map(|(k, w)| (fold(&k), w)).collect(),
                phrases: e.phrases.into_iter().map(|(p, w)| (fold(&p), w)).collect(),
            })
            .collect();

        let catalog = parsed
            .emotions
            .into_iter()
            .map(|(name, clip)| EmotionClip {
                name,
                file: base.join(&clip.file),
                looped: clip.looped,
                description: clip.description,
            })
            .collect();

        Ok(Self {
            emotions,
            catalog,
            min_score: strategy.min_score_to_trigger,
            tie_breaker,
            fallback: strategy.fallback,
            cooldown,
            last_trigger: None,
        })
    }

    pub fn fallback(&self) -> &str {
        &self.fallback
    }

    /// Clips sorted by name.
    pub fn catalog(&self) -> &[EmotionClip] {
        &self.catalog
    }

    pub fn analyze(&mut self, text: &str) -> Route {
        self.analyze_at(text, Instant::now())
    }

    /// Route `text` as if the clock read `now`.
    ///
    /// Within the cooldown of the last trigger, and whenever the best score
    /// is below `min_score_to_trigger`, the fallback is returned with score 0.
    pub fn analyze_at(&mut self, text: &str, now: Instant) -> Route {
        if let Some(last) = self.last_trigger {
            if now.saturating_duration_since(last) < self.cooldown {
                debug!(fallback = %self.fallback, "router cooling down");
                return self.fallback_route();
            }
        }

        let folded = fold(text);
        let words: Vec<&str> = folded
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| c.is_ascii_punctuation()))
            .filter(|w| !w.is_empty())
            .collect();

        let mut best: Option<(&Emotion, f64)> = None;
        for emotion in &self.emotions {
            let score = score(emotion, &folded, &words);
            best = match best {
                None => Some((emotion, score)),
                Some((_, top)) if score > top => Some((emotion, score)),
                Some((held, top))
                    if score == top
                        && score > 0.0
                        && self.tie_breaker == TieBreaker::Priority
                        && emotion.priority > held.priority =>
                {
                    Some((emotion, score))
                }
                keep => keep,
            };
        }

        match best {
            Some((emotion, score)) if score >= self.min_score => {
                self.last_trigger = Some(now);
                Route { emotion: emotion.name.clone(), score }
            }
            _ => self.fallback_route(),
        }
    }

    fn fallback_route(&self) -> Route {
        Route { emotion: self.fallback.clone(), score: 0.0 }
    }
}

fn score(emotion: &Emotion, text: &str, words: &[&str]) -> f64 {
    let keywords: f64 = emotion
        .keywords
        .iter()
        .filter(|(k, _)| words.contains(&k.as_str()))
        .map(|(_, w)| w)
        .sum();
    let phrases: f64 = emotion
        .phrases
        .iter()
        .filter(|(p, _)| !p.is_empty() && text.contains(p.as_str()))
        .map(|(_, w)| w)
        .sum();
    keywords + phrases
}

/// Lower-case and drop accents from Latin letters (`Été` → `ete`,
/// `cœur` → `coeur`). Combining marks are removed as well.
pub fn fold(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars().flat_map(char::to_lowercase) {
        match c {
            'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ā' | 'ă' | 'ą' => out.push('a'),
            'ç' | 'ć' | 'č' => out.push('c'),
            'ď' => out.push('d'),
            'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ė' | 'ę' | 'ě' => out.push('e'),
            'ì' | 'í' | 'î' | 'ï' | 'ī' | 'į' => out.push('i'),
            'ł' => out.push('l'),
            'ñ' | 'ń' | 'ň' => out.push('n'),
            'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' | 'ō' | 'ő' => out.push('o'),
            'ř' => out.push('r'),
            'ś' | 'š' => out.push('s'),
            'ť' => out.push('t'),
            'ù' | 'ú' | 'û' | 'ü' | 'ū' | 'ů' | 'ű' => out.push('u'),
            'ý' | 'ÿ' => out.push('y'),
            'ź' | 'ż' | 'ž' => out.push('z'),
            'œ' => out.push_str("oe"),
            'æ' => out.push_str("ae"),
            '\u{0300}'..='\u{036f}' => {}
            c => out.push(c),
        }
    }
    out
}
