//! JSONL transcript of an interactive session.
//!
//! Layout under the sessions root:
//! ```text
//! data/sessions/
//! └── 2026-10-19/
//!     └── 142501_cli.jsonl   ({"prompt": ..., "output": ...} per line)
//! ```
//!
//! Every exchange is appended as soon as it happens, so an interrupted
//! session keeps everything said so far.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::error::AppError;

use super::Exchange;

#[derive(Debug)]
pub struct Transcript {
    path: PathBuf,
}

impl Transcript {
    /// Prepare `<root>/<YYYY-MM-DD>/<HHMMSS>_<session_id>.jsonl`.
    /// The directory is created now; the file on first append.
    pub fn create(root: &Path, session_id: &str, now: DateTime<Local>) -> Result<Self, AppError> {
        let dir = root.join(now.format("%Y-%m-%d").to_string());
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}_{}.jsonl", now.format("%H%M%S"), file_stem(session_id)));
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, exchange: &Exchange) -> Result<(), AppError> {
        let line = serde_json::to_string(exchange)
            .map_err(|e| AppError::Io(std::io::Error::other(format!("serialise exchange: {e}"))))?;
        let mut f = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(f, "{line}")?;
        Ok(())
    }
}

/// Session ids come from the environment; keep them to one path component.
fn file_stem(session_id: &str) -> String {
    let stem: String = session_id
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    if stem.is_empty() || stem.chars().all(|c| c == '.') {
        "session".to_string()
    } else {
        stem
    }
}
