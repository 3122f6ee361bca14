//! Session runner.
//!
//! Every entry point follows the same order: open the corpus, install the
//! session logger, build the provider, then talk. Corpus and config problems
//! therefore surface before anything is printed.
//!
//! - [`run_once`] — one cycle, then the `--- OUTPUT ---` banner.
//! - [`run_interactive`] — line-driven loop with a JSONL transcript.
//! - [`check_llm`] — smoke-test the HTTP backend with a fixed prompt.
//! - [`route`], [`list_emotions`] — query the emotions file.

pub mod prompt;
pub mod transcript;

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use rand_core::OsRng;
use serde::Serialize;
use tracing::{debug, error, info, info_span, warn};

use crate::config::{Config, ConfigError, StyleConfig};
use crate::corpus::{self, CorpusRecord};
use crate::error::AppError;
use crate::llm::providers::{self, local};
use crate::llm::LlmProvider;
use crate::logger;
use crate::router::{EmotionClip, EmotionRouter, Route};

use transcript::Transcript;

pub const OUTPUT_BANNER: &str = "--- OUTPUT ---";

/// Where interactive transcripts go, relative to the working directory.
pub const DEFAULT_SESSIONS_DIR: &str = "data/sessions";

/// Prompt sent by [`check_llm`]; a healthy backend answers `NESTOR-OK`.
pub const SMOKE_PROMPT: &str = "Répond exactement: NESTOR-OK";

/// One prompt and the reply it got.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Exchange {
    pub prompt: String,
    pub output: String,
}

/// Mutable per-session state.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub id: String,
    pub rating: String,
    /// Ask for at most `style.target_sentences` sentences.
    pub compact: bool,
    pub history: Vec<Exchange>,
}

impl SessionState {
    pub fn new(id: impl Into<String>, style: &StyleConfig) -> Self {
        Self {
            id: id.into(),
            rating: style.rating.clone(),
            compact: style.compact_default,
            history: Vec::new(),
        }
    }
}

/// Run a single interaction cycle and write the banner plus reply to `out`.
pub fn run_once<W: Write>(config: &Config, state: &mut SessionState, out: &mut W) -> Result<String, AppError> {
    let records = corpus::open_with_fallback(&config.data_path, config.data_fallback_path.as_deref())?;
    let subscriber = logger::build(&config.logging)?;

    tracing::subscriber::with_default(subscriber, || {
        let span = info_span!("session", id = %state.id);
        let _enter = span.enter();

        let result = cycle(config, state, records, out);
        if let Err(e) = &result {
            error!(error = %e, "session cycle failed");
        }
        result
    })
}

fn cycle<W: Write>(
    config: &Config,
    state: &mut SessionState,
    records: corpus::Records,
    out: &mut W,
) -> Result<String, AppError> {
    info!(
        provider = %config.provider,
        model = %config.llm.model,
        base_url = %config.llm.base_url,
        "session start"
    );
    let provider = providers::build(config)?;
    debug!(remote = provider.is_remote(), "provider ready");
    let mut router = load_router(config)?;

    let path = records.path().to_path_buf();
    if path != config.data_path {
        warn!(missing = %config.data_path.display(), fallback = %path.display(), "using fallback corpus");
    }
    let selection = corpus::select_random(records, &mut OsRng)?;
    info!(path = %path.display(), count = selection.count, "corpus loaded");

    let exchange = respond(&provider, router.as_mut(), &selection.record, state, config);

    write!(out, "\n{OUTPUT_BANNER}\n{}\n", exchange.output)?;
    out.flush()?;
    Ok(exchange.output)
}

/// Build the prompt for `record`, ask `provider`, record the exchange.
///
/// A failing remote backend is logged and replaced by the local stub's reply.
/// With a router, the emotions of the record and of the reply are logged.
fn respond(
    provider: &LlmProvider,
    router: Option<&mut EmotionRouter>,
    record: &CorpusRecord,
    state: &mut SessionState,
    config: &Config,
) -> Exchange {
    info!(record_id = ?record.id, tags = ?record.tags, "selected record");

    let prompt = prompt::build_prompt(record, state, &config.style, config.prompts_dir.as_deref());
    debug!(size = prompt.len(), "prompt built");

    let output = match provider.complete(&prompt, None) {
        Ok(resp) => {
            if let Some(usage) = resp.usage {
                debug!(input_tokens = usage.input_tokens, output_tokens = usage.output_tokens, "usage");
            }
            resp.text
        }
        Err(e) => {
            error!(error = %e, "LLM call failed; using local fallback");
            local::reply(&prompt)
        }
    };
    info!(chars = output.chars().count(), "generation ok");

    if let Some(router) = router {
        let heard = router.analyze(record.setup().unwrap_or_default());
        let said = router.analyze(&output);
        info!(
            emotion_in = %heard.emotion,
            score_in = heard.score,
            emotion_reply = %said.emotion,
            score_reply = said.score,
            "emotion routed"
        );
    }

    let exchange = Exchange { prompt, output };
    state.history.push(exchange.clone());
    exchange
}

fn load_router(config: &Config) -> Result<Option<EmotionRouter>, AppError> {
    match &config.emotions_path {
        Some(path) if config.use_router => {
            let router = EmotionRouter::load(path)?;
            debug!(path = %path.display(), "emotion router ready");
            Ok(Some(router))
        }
        _ => Ok(None),
    }
}

// ── Interactive mode ─────────────────────────────────────────────────────────

/// A `:`-prefixed line in interactive mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Quit,
    Help,
    Compact,
    Unknown(String),
}

impl Command {
    /// `None` when `line` is not a command.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if !line.starts_with(':') {
            return None;
        }
        Some(match line.to_lowercase().as_str() {
            ":q" | ":quit" | ":exit" => Command::Quit,
            ":help" => Command::Help,
            ":compact" => Command::Compact,
            other => Command::Unknown(other.to_string()),
        })
    }
}

/// Read lines from `input` until `:q` or end of input.
///
/// An empty line picks a random corpus record, any other non-command line
/// is taken as a theme. Returns the transcript path.
pub fn run_interactive<R: BufRead, W: Write>(
    config: &Config,
    state: &mut SessionState,
    input: R,
    out: &mut W,
    sessions_root: &Path,
) -> Result<PathBuf, AppError> {
    // One full pass up front so a missing, malformed or empty corpus fails
    // before the banner; the records are reopened per pick.
    let records = corpus::open_with_fallback(&config.data_path, config.data_fallback_path.as_deref())?;
    let data_path = records.path().to_path_buf();
    corpus::select_random(records, &mut OsRng)?;
    let subscriber = logger::build(&config.logging)?;

    tracing::subscriber::with_default(subscriber, || {
        let span = info_span!("session", id = %state.id);
        let _enter = span.enter();

        let result = repl(config, state, &data_path, input, out, sessions_root);
        if let Err(e) = &result {
            error!(error = %e, "interactive session failed");
        }
        result
    })
}

fn repl<R: BufRead, W: Write>(
    config: &Config,
    state: &mut SessionState,
    data_path: &Path,
    mut input: R,
    out: &mut W,
    sessions_root: &Path,
) -> Result<PathBuf, AppError> {
    info!(provider = %config.provider, model = %config.llm.model, "interactive session start");
    let provider = providers::build(config)?;
    let mut router = load_router(config)?;
    let transcript = Transcript::create(sessions_root, &state.id, Local::now())?;

    writeln!(out, "=== Nestor CLI ===")?;
    writeln!(out, "• ENTER = blague au hasard")?;
    writeln!(out, "• Entrez un thème pour une blague à la demande")?;
    writeln!(out, "• Commandes: :compact (toggle {} phrases max), :help, :q\n", config.style.target_sentences)?;

    let mut line = String::new();
    loop {
        write!(out, "Thème (ENTER aléatoire, :q quitter): ")?;
        out.flush()?;

        line.clear();
        if input.read_line(&mut line)? == 0 {
            debug!("end of input");
            break;
        }
        let raw = line.trim();

        let record = match Command::parse(raw) {
            Some(Command::Quit) => break,
            Some(Command::Help) => {
                writeln!(out, "Commandes: :compact (toggle), :q (quitter)")?;
                continue;
            }
            Some(Command::Compact) => {
                state.compact = !state.compact;
                let mode = if state.compact {
                    format!("ON ({} phrases max)", config.style.target_sentences)
                } else {
                    "OFF".to_string()
                };
                writeln!(out, "Mode compact = {mode}")?;
                info!(compact = state.compact, "compact mode toggled");
                continue;
            }
            Some(Command::Unknown(cmd)) => {
                warn!(command = %cmd, "unknown command");
                writeln!(out, "Commande inconnue. Essayez :help")?;
                continue;
            }
            None if raw.is_empty() => {
                let records = corpus::open(data_path)?;
                corpus::select_random(records, &mut OsRng)?.record
            }
            None => CorpusRecord::from_theme(raw),
        };

        let exchange = respond(&provider, router.as_mut(), &record, state, config);
        writeln!(out, "\n--- Nestor ---\n{}\n", exchange.output)?;
        transcript.append(&exchange)?;
    }

    info!(exchanges = state.history.len(), transcript = %transcript.path().display(), "interactive session end");
    writeln!(out, "\nHistorique → {}\nÀ bientôt! 👋", transcript.path().display())?;
    Ok(transcript.path().to_path_buf())
}

// ── Emotion queries ──────────────────────────────────────────────────────────

fn required_router(config: &Config) -> Result<EmotionRouter, AppError> {
    let path = config
        .emotions_path
        .as_deref()
        .ok_or_else(|| ConfigError::Invalid("paths.emotions is not set".into()))?;
    Ok(EmotionRouter::load(path)?)
}

/// Print `{"emotion": …, "score": …}` for `text`.
pub fn route<W: Write>(config: &Config, text: &str, out: &mut W) -> Result<Route, AppError> {
    let route = required_router(config)?.analyze(text);
    writeln!(out, "{}", to_json(&route)?)?;
    Ok(route)
}

/// Print the clip catalog as `{"emotions": [...]}`, sorted by name.
pub fn list_emotions<W: Write>(config: &Config, out: &mut W) -> Result<usize, AppError> {
    #[derive(Serialize)]
    struct Catalog<'a> {
        emotions: &'a [EmotionClip],
    }

    let router = required_router(config)?;
    writeln!(out, "{}", to_json(&Catalog { emotions: router.catalog() })?)?;
    Ok(router.catalog().len())
}

fn to_json<T: Serialize>(value: &T) -> Result<String, AppError> {
    serde_json::to_string(value).map_err(|e| AppError::Io(std::io::Error::other(format!("serialise: {e}"))))
}

// ── LLM smoke test ───────────────────────────────────────────────────────────

/// Send [`SMOKE_PROMPT`] to the configured HTTP backend, whatever the
/// provider tag, and print model and reply.
pub fn check_llm<W: Write>(config: &Config, out: &mut W) -> Result<String, AppError> {
    let subscriber = logger::build(&config.logging)?;

    tracing::subscriber::with_default(subscriber, || -> Result<String, AppError> {
        let provider = providers::build_http(&config.llm, config.llm_api_key.clone())?;
        writeln!(out, "Model: {}", provider.model())?;
        info!(endpoint = %provider.endpoint(), model = %provider.model(), "checking LLM backend");

        let reply = provider.complete(SMOKE_PROMPT, None).map_err(|e| {
            error!(error = %e, "LLM smoke test failed");
            e
        })?;
        writeln!(out, "Reply: {}", reply.text)?;
        Ok(reply.text)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn setup(corpus: &str) -> (TempDir, Config) {
        let dir = TempDir::new().unwrap();
        let cfg = Config::test_default(dir.path());
        fs::write(&cfg.data_path, corpus).unwrap();
        (dir, cfg)
    }

    #[test]
    fn command_parsing() {
        assert_eq!(Command::parse(":q"), Some(Command::Quit));
        assert_eq!(Command::parse(" :EXIT "), Some(Command::Quit));
        assert_eq!(Command::parse(":help"), Some(Command::Help));
        assert_eq!(Command::parse(":compact"), Some(Command::Compact));
        assert_eq!(Command::parse(":dance"), Some(Command::Unknown(":dance".into())));
        assert_eq!(Command::parse("les chats"), None);
        assert_eq!(Command::parse(""), None);
    }

    #[test]
    fn run_once_uses_local_provider() {
        let (_dir, cfg) = setup("{\"setup\": \"S\", \"punch\": \"P\"}\n");
        let mut state = SessionState::new("test", &cfg.style);
        let mut out = Vec::new();
        let text = run_once(&cfg, &mut state, &mut out).unwrap();

        assert!(text.starts_with("[local] "));
        assert!(text.contains("Punchline: P"));
        let printed = String::from_utf8(out).unwrap();
        assert!(printed.contains(OUTPUT_BANNER));
        assert!(printed.ends_with(&format!("{text}\n")));
        assert_eq!(state.history.len(), 1);
    }

    #[test]
    fn remote_failure_falls_back_to_local() {
        let (_dir, mut cfg) = setup("{\"setup\": \"S\"}\n");
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        cfg.llm.base_url = format!("http://{}/v1", listener.local_addr().unwrap());
        drop(listener);
        cfg.provider = crate::config::ProviderKind::OpenAiCompatible;

        let mut state = SessionState::new("test", &cfg.style);
        let mut out = Vec::new();
        let text = run_once(&cfg, &mut state, &mut out).unwrap();
        assert!(text.starts_with("[local] "));

        let log = fs::read_to_string(&cfg.logging.file).unwrap();
        assert!(log.contains("LLM call failed"));
    }

    #[test]
    fn configured_router_logs_emotions() {
        let (dir, mut cfg) = setup("{\"setup\": \"Quelle surprise incroyable\"}\n");
        let emotions = dir.path().join("emotions.json");
        fs::write(
            &emotions,
            r#"{ "routing": { "strategy": { "cooldown_seconds": 0 },
                 "emotions": { "surprise": { "keywords": { "incroyable": 1.0 } } } } }"#,
        )
        .unwrap();
        cfg.emotions_path = Some(emotions);

        let mut state = SessionState::new("test", &cfg.style);
        run_once(&cfg, &mut state, &mut Vec::new()).unwrap();

        let log = fs::read_to_string(&cfg.logging.file).unwrap();
        assert!(log.contains("emotion routed"));
        assert!(log.contains("emotion_in=surprise"));
    }

    #[test]
    fn broken_emotions_file_is_a_config_error() {
        let (dir, mut cfg) = setup("{\"setup\": \"S\"}\n");
        cfg.emotions_path = Some(dir.path().join("missing.json"));
        let mut state = SessionState::new("test", &cfg.style);
        let err = run_once(&cfg, &mut state, &mut Vec::new()).unwrap_err();
        assert!(matches!(err, AppError::Config(ConfigError::Read { .. })));

        cfg.use_router = false;
        run_once(&cfg, &mut state, &mut Vec::new()).unwrap();
    }

    #[test]
    fn route_and_list_emotions_print_json() {
        let dir = TempDir::new().unwrap();
        let mut cfg = Config::test_default(dir.path());
        let emotions = dir.path().join("emotions.json");
        fs::write(
            &emotions,
            r#"{ "emotions": { "joie": { "file": "joie.mp4" }, "idle": { "file": "idle.mp4", "loop": true } },
                 "routing": { "emotions": { "joie": { "phrases": { "trop bien": 1.0 } } } } }"#,
        )
        .unwrap();
        cfg.emotions_path = Some(emotions);

        let mut out = Vec::new();
        let r = route(&cfg, "C'est TROP bien", &mut out).unwrap();
        assert_eq!(r.emotion, "joie");
        let v: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(v, serde_json::json!({ "emotion": "joie", "score": 1.0 }));

        let mut out = Vec::new();
        assert_eq!(list_emotions(&cfg, &mut out).unwrap(), 2);
        let v: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(v["emotions"][0]["name"], "idle");
        assert_eq!(v["emotions"][0]["loop"], true);
    }

    #[test]
    fn route_without_emotions_file_is_a_config_error() {
        let dir = TempDir::new().unwrap();
        let cfg = Config::test_default(dir.path());
        let err = route(&cfg, "x", &mut Vec::new()).unwrap_err();
        assert!(matches!(err, AppError::Config(ConfigError::Invalid(_))));
    }

    #[test]
    fn empty_corpus_fails_without_banner() {
        let (_dir, cfg) = setup("\n\n");
        let mut state = SessionState::new("test", &cfg.style);
        let mut out = Vec::new();
        let err = run_once(&cfg, &mut state, &mut out).unwrap_err();
        assert!(matches!(err, AppError::Corpus(corpus::CorpusError::Empty)));
        assert!(out.is_empty());
        let log = fs::read_to_string(&cfg.logging.file).unwrap();
        assert!(log.contains("session cycle failed"));
    }

    #[test]
    fn interactive_handles_commands_and_themes() {
        let (dir, cfg) = setup("{\"setup\": \"S\", \"punch\": \"P\"}\n");
        let mut state = SessionState::new("cli", &cfg.style);
        let input = Cursor::new(":help\n:compact\n\nles lundis\n:nope\n:q\nignored\n");
        let mut out = Vec::new();
        let sessions = dir.path().join("sessions");

        let path = run_interactive(&cfg, &mut state, input, &mut out, &sessions).unwrap();

        let printed = String::from_utf8(out).unwrap();
        assert!(printed.contains("=== Nestor CLI ==="));
        assert!(printed.contains("Mode compact = ON (2 phrases max)"));
        assert!(printed.contains("Commande inconnue"));
        assert_eq!(printed.matches("--- Nestor ---").count(), 2);
        assert!(printed.contains("À bientôt!"));
        assert!(!printed.contains("ignored"));

        assert!(state.compact);
        assert_eq!(state.history.len(), 2);
        assert!(state.history[0].prompt.contains("Punchline: P"));
        assert!(state.history[0].prompt.contains("Réponds en 2 phrases maximum."));
        assert!(state.history[1].prompt.contains("les lundis"));

        assert!(path.starts_with(&sessions));
        let lines = fs::read_to_string(&path).unwrap();
        assert_eq!(lines.lines().count(), 2);
        for l in lines.lines() {
            let v: serde_json::Value = serde_json::from_str(l).unwrap();
            assert!(v["output"].as_str().unwrap().starts_with("[local] "));
        }
    }

    #[test]
    fn interactive_stops_at_end_of_input() {
        let (dir, cfg) = setup("{\"setup\": \"S\"}\n");
        let mut state = SessionState::new("cli", &cfg.style);
        let mut out = Vec::new();
        run_interactive(&cfg, &mut state, Cursor::new("theme\n"), &mut out, dir.path()).unwrap();
        assert_eq!(state.history.len(), 1);
    }

    #[test]
    fn interactive_missing_corpus_fails_early() {
        let dir = TempDir::new().unwrap();
        let cfg = Config::test_default(dir.path());
        let mut state = SessionState::new("cli", &cfg.style);
        let mut out = Vec::new();
        let err = run_interactive(&cfg, &mut state, Cursor::new(""), &mut out, dir.path()).unwrap_err();
        assert!(matches!(err, AppError::Corpus(corpus::CorpusError::NotFound(_))));
        assert!(out.is_empty());
        assert!(!cfg.logging.file.exists());
    }

    #[test]
    fn interactive_rejects_empty_or_malformed_corpus_before_banner() {
        for (corpus, empty) in [("\n", true), ("{\"setup\": \"S\"}\n{broken\n", false)] {
            let (dir, cfg) = setup(corpus);
            let mut state = SessionState::new("cli", &cfg.style);
            let mut out = Vec::new();
            let err = run_interactive(&cfg, &mut state, Cursor::new("\n"), &mut out, dir.path()).unwrap_err();
            match err {
                AppError::Corpus(corpus::CorpusError::Empty) => assert!(empty),
                AppError::Corpus(corpus::CorpusError::Parse { .. }) => assert!(!empty),
                other => panic!("unexpected error: {other}"),
            }
            assert!(out.is_empty());
            assert!(state.history.is_empty());
        }
    }

    #[test]
    fn check_llm_reports_unreachable_backend() {
        let dir = TempDir::new().unwrap();
        let mut cfg = Config::test_default(dir.path());
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        cfg.llm.base_url = format!("http://{}/v1", listener.local_addr().unwrap());
        drop(listener);

        let mut out = Vec::new();
        let err = check_llm(&cfg, &mut out).unwrap_err();
        assert!(matches!(err, AppError::Provider(_)));
        assert!(String::from_utf8(out).unwrap().contains("Model: test-model"));
    }
}
