//! Nestor — command-line entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Parse CLI args
//!   3. Load config (log level: CLI `-v` flags > `NESTOR_LOG_LEVEL` > config
//!      level; `RUST_LOG` is only read when that level does not parse)
//!   4. Run the session: open corpus, install logger, build provider, talk
//!   5. Print `error: …` and exit 1 on any failure

use std::io;
use std::path::Path;

use nestor::config;
use nestor::error::AppError;
use nestor::session::{self, SessionState};

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), AppError> {
    // Load .env if present — ignore errors (file is optional).
    let _ = dotenvy::dotenv();

    let args = parse_cli_args();

    let config = config::load(args.config_path.as_deref(), args.log_level)?;

    if args.check_llm {
        session::check_llm(&config, &mut io::stdout())?;
        return Ok(());
    }
    if let Some(text) = args.route_text.as_deref() {
        session::route(&config, text, &mut io::stdout())?;
        return Ok(());
    }
    if args.list_emotions {
        session::list_emotions(&config, &mut io::stdout())?;
        return Ok(());
    }

    let default_id = if args.interactive { "cli" } else { "local" };
    let session_id = std::env::var("NESTOR_SESSION_ID").unwrap_or_else(|_| default_id.to_string());
    let mut state = SessionState::new(session_id, &config.style);

    if args.interactive {
        session::run_interactive(
            &config,
            &mut state,
            io::stdin().lock(),
            &mut io::stdout(),
            Path::new(session::DEFAULT_SESSIONS_DIR),
        )?;
    } else {
        session::run_once(&config, &mut state, &mut io::stdout())?;
    }

    Ok(())
}

struct CliArgs {
    log_level: Option<&'static str>,
    interactive: bool,
    check_llm: bool,
    list_emotions: bool,
    route_text: Option<String>,
    config_path: Option<String>,
}

fn parse_cli_args() -> CliArgs {
    let mut verbosity = 0u8;
    let mut interactive = false;
    let mut check_llm = false;
    let mut list_emotions = false;
    let mut route_text = None;
    let mut config_path = None;

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        if arg == "--" {
            break;
        }

        match arg.as_str() {
            "-h" | "--help" => {
                println!("Usage: nestor [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -h, --help                 Print help");
                println!("  -i, --interactive          Interactive mode (ENTER = random joke, text = theme)");
                println!("  -f, --config <PATH>        Path to configuration file (default: {})", config::DEFAULT_CONFIG_PATH);
                println!("      --check-llm            Send a fixed test prompt to the configured LLM backend");
                println!("      --route <TEXT>         Print the emotion routed for TEXT");
                println!("      --emotions             List the clips of the emotions file");
                println!("  -v, -vv, -vvv, -vvvv       Increase logging verbosity");
                std::process::exit(0);
            }
            "-i" | "--interactive" => interactive = true,
            "--check-llm" => check_llm = true,
            "--emotions" => list_emotions = true,
            "--route" => {
                if let Some(text) = iter.next() {
                    route_text = Some(text);
                } else {
                    eprintln!("error: --route requires a text argument");
                    std::process::exit(1);
                }
            }
            "-f" | "--config" => {
                if let Some(path) = iter.next() {
                    config_path = Some(path);
                } else {
                    eprintln!("error: -f/--config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--verbose" => verbosity = verbosity.saturating_add(1),
            a => match v_count(a) {
                Some(n) => verbosity = verbosity.saturating_add(n),
                None => eprintln!("warning: ignoring unknown argument '{a}'"),
            },
        }
    }

    CliArgs {
        log_level: verbosity_level(verbosity),
        interactive,
        check_llm,
        list_emotions,
        route_text,
        config_path,
    }
}

/// Number of `v`s in a `-v`, `-vv`, … flag, saturating at `u8::MAX`.
fn v_count(arg: &str) -> Option<u8> {
    let vs = arg.strip_prefix('-')?;
    if vs.is_empty() || !vs.chars().all(|c| c == 'v') {
        return None;
    }
    Some(u8::try_from(vs.len()).unwrap_or(u8::MAX))
}

// Each -v raises verbosity one tier over the configured level:
//   -v      → warn
//   -vv     → info
//   -vvv    → debug
//   -vvvv+  → trace
fn verbosity_level(verbosity: u8) -> Option<&'static str> {
    match verbosity {
        0 => None,
        1 => Some("warn"),
        2 => Some("info"),
        3 => Some("debug"),
        _ => Some("trace"),
    }
}
