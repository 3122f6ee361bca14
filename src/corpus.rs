//! Corpus accessor — lazy, single-pass reading of the joke corpus.
//!
//! Two on-disk shapes are understood:
//! - `*.jsonl` (or any other extension): one JSON object per line, blank
//!   lines skipped. Read line by line, never fully buffered.
//! - `*.json`: an array of objects, or `{ "items": [...] }`.
//!
//! A [`Records`] value is a one-pass iterator; reopen the file to read again.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use rand_core::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("corpus not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("cannot read {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("malformed record {position} in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        /// Line number for JSONL, 1-based item index for JSON arrays.
        position: usize,
        source: serde_json::Error,
    },

    #[error("{0}")]
    Invalid(String),

    #[error("corpus is empty — no record to select")]
    Empty,
}

/// One corpus entry. Only the fields the prompt builder looks at are typed;
/// everything else is kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorpusRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    setup: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    punch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    answer: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CorpusRecord {
    /// A record standing in for a theme typed by the user.
    pub fn from_theme(theme: impl Into<String>) -> Self {
        Self {
            setup: Some(theme.into()),
            tags: vec!["user".to_string()],
            ..Self::default()
        }
    }

    /// `setup`, falling back to `text`. Empty strings count as absent.
    pub fn setup(&self) -> Option<&str> {
        first_non_empty(&self.setup, &self.text)
    }

    /// `punch`, falling back to `answer`. Empty strings count as absent.
    pub fn punch(&self) -> Option<&str> {
        first_non_empty(&self.punch, &self.answer)
    }
}

fn first_non_empty<'a>(a: &'a Option<String>, b: &'a Option<String>) -> Option<&'a str> {
    [a, b]
        .into_iter()
        .filter_map(|s| s.as_deref())
        .find(|s| !s.is_empty())
}

// ── Records ──────────────────────────────────────────────────────────────────

/// Lazy iterator over the records of one corpus file.
pub struct Records {
    path: PathBuf,
    source: Source,
    done: bool,
}

enum Source {
    Lines {
        lines: io::Lines<BufReader<File>>,
        line_no: usize,
    },
    Items {
        items: std::vec::IntoIter<Value>,
        index: usize,
    },
}

impl Records {
    /// Path the records are read from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Iterator for Records {
    type Item = Result<CorpusRecord, CorpusError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = match &mut self.source {
            Source::Lines { lines, line_no } => loop {
                *line_no += 1;
                match lines.next()? {
                    Err(source) => {
                        break Err(CorpusError::Read { path: self.path.clone(), source });
                    }
                    Ok(line) if line.trim().is_empty() => continue,
                    Ok(line) => {
                        break serde_json::from_str(line.trim()).map_err(|source| CorpusError::Parse {
                            path: self.path.clone(),
                            position: *line_no,
                            source,
                        });
                    }
                }
            },
            Source::Items { items, index } => {
                let value = items.next()?;
                *index += 1;
                serde_json::from_value(value).map_err(|source| CorpusError::Parse {
                    path: self.path.clone(),
                    position: *index,
                    source,
                })
            }
        };
        if item.is_err() {
            self.done = true;
        }
        Some(item)
    }
}

/// Open `path` for sequential reading.
///
/// Fails with [`CorpusError::NotFound`] when the path does not exist.
pub fn open(path: &Path) -> Result<Records, CorpusError> {
    if !path.exists() {
        return Err(CorpusError::NotFound(path.to_path_buf()));
    }
    let read_err = |source| CorpusError::Read { path: path.to_path_buf(), source };

    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let source = if is_json {
        let file = File::open(path).map_err(read_err)?;
        let value: Value = serde_json::from_reader(BufReader::new(file)).map_err(|source| {
            CorpusError::Parse { path: path.to_path_buf(), position: 0, source }
        })?;
        let items = match value {
            Value::Array(items) => items,
            Value::Object(mut obj) => match obj.remove("items") {
                Some(Value::Array(items)) => items,
                Some(_) => {
                    return Err(CorpusError::Invalid(format!(
                        "{}: `items` must be an array",
                        path.display()
                    )));
                }
                None => Vec::new(),
            },
            _ => {
                return Err(CorpusError::Invalid(format!(
                    "{}: expected a list of objects",
                    path.display()
                )));
            }
        };
        Source::Items { items: items.into_iter(), index: 0 }
    } else {
        let file = File::open(path).map_err(read_err)?;
        Source::Lines { lines: BufReader::new(file).lines(), line_no: 0 }
    };

    debug!(path = %path.display(), json = is_json, "corpus opened");
    Ok(Records { path: path.to_path_buf(), source, done: false })
}

/// Open `primary`, or `fallback` when `primary` is missing and a fallback
/// is configured. Any other error from `primary` is returned as is.
pub fn open_with_fallback(primary: &Path, fallback: Option<&Path>) -> Result<Records, CorpusError> {
    match (open(primary), fallback) {
        (Err(CorpusError::NotFound(_)), Some(alt)) => {
            warn!(
                missing = %primary.display(),
                fallback = %alt.display(),
                "corpus path not found, trying fallback"
            );
            open(alt)
        }
        (result, _) => result,
    }
}

/// Result of [`select_random`].
#[derive(Debug, Clone)]
pub struct Selection {
    pub record: CorpusRecord,
    /// Number of records read to make the choice.
    pub count: usize,
}

/// Pick one record uniformly at random in a single pass (reservoir of one).
///
/// The first read or parse error aborts the selection.
pub fn select_random<I, R>(records: I, rng: &mut R) -> Result<Selection, CorpusError>
where
    I: IntoIterator<Item = Result<CorpusRecord, CorpusError>>,
    R: RngCore + ?Sized,
{
    let mut chosen = None;
    let mut count = 0usize;
    for record in records {
        let record = record?;
        count += 1;
        if rng.next_u64() % count as u64 == 0 {
            chosen = Some(record);
        }
    }
    chosen
        .map(|record| Selection { record, count })
        .ok_or(CorpusError::Empty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    /// Always returns the same word: 0 makes every record replace the
    /// current pick, so the last record wins.
    struct FixedRng(u64);

    impl RngCore for FixedRng {
        fn next_u32(&mut self) -> u32 {
            self.0 as u32
        }
        fn next_u64(&mut self) -> u64 {
            self.0
        }
        fn fill_bytes(&mut self, dest: &mut [u8]) {
            dest.fill(0);
        }
        fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
            self.fill_bytes(dest);
            Ok(())
        }
    }

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = open(&dir.path().join("nope.jsonl")).err().unwrap();
        assert!(matches!(err, CorpusError::NotFound(_)));
    }

    #[test]
    fn jsonl_skips_blank_lines() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "c.jsonl",
            "{\"id\": 1, \"setup\": \"a\"}\n\n   \n{\"id\": 2, \"text\": \"b\"}\n",
        );
        let records: Vec<_> = open(&path).unwrap().collect::<Result<_, _>>().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].setup(), Some("a"));
        assert_eq!(records[1].setup(), Some("b"));
    }

    #[test]
    fn malformed_line_reports_line_number() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "c.jsonl", "{\"setup\": \"a\"}\n\nnot json\n{\"setup\": \"c\"}\n");
        let mut records = open(&path).unwrap();
        assert!(records.next().unwrap().is_ok());
        match records.next().unwrap() {
            Err(CorpusError::Parse { position, .. }) => assert_eq!(position, 3),
            other => panic!("expected parse error, got {other:?}"),
        }
        // fused after the first error
        assert!(records.next().is_none());
    }

    #[test]
    fn json_array_and_items_object() {
        let dir = TempDir::new().unwrap();
        let arr = write(&dir, "a.json", r#"[{"setup": "x", "punch": "y"}]"#);
        let obj = write(&dir, "b.json", r#"{"items": [{"setup": "x"}, {"setup": "z"}]}"#);
        assert_eq!(open(&arr).unwrap().count(), 1);
        assert_eq!(open(&obj).unwrap().count(), 2);
    }

    #[test]
    fn json_scalar_is_invalid() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "s.json", "42");
        assert!(matches!(open(&path), Err(CorpusError::Invalid(_))));
    }

    #[test]
    fn fallback_used_only_when_primary_missing() {
        let dir = TempDir::new().unwrap();
        let alt = write(&dir, "alt.jsonl", "{\"setup\": \"fallback\"}\n");
        let records = open_with_fallback(&dir.path().join("missing.jsonl"), Some(&alt)).unwrap();
        assert_eq!(records.path(), alt.as_path());

        let err = open_with_fallback(&dir.path().join("missing.jsonl"), None).err().unwrap();
        assert!(matches!(err, CorpusError::NotFound(_)));
    }

    #[test]
    fn aliases_and_empty_strings() {
        let r: CorpusRecord =
            serde_json::from_str(r#"{"setup": "", "text": "t", "answer": "a", "rating": "G"}"#).unwrap();
        assert_eq!(r.setup(), Some("t"));
        assert_eq!(r.punch(), Some("a"));
        assert_eq!(r.extra.get("rating"), Some(&Value::from("G")));
    }

    #[test]
    fn theme_record_is_tagged_user() {
        let r = CorpusRecord::from_theme("les chats");
        assert_eq!(r.setup(), Some("les chats"));
        assert_eq!(r.punch(), None);
        assert_eq!(r.tags, vec!["user".to_string()]);
    }

    #[test]
    fn select_from_empty_errors() {
        let records: Vec<Result<CorpusRecord, CorpusError>> = Vec::new();
        assert!(matches!(select_random(records, &mut FixedRng(0)), Err(CorpusError::Empty)));
    }

    #[test]
    fn select_counts_every_record() {
        let records = (0..5).map(|i| Ok(CorpusRecord::from_theme(format!("r{i}"))));
        let sel = select_random(records, &mut FixedRng(0)).unwrap();
        assert_eq!(sel.count, 5);
        assert_eq!(sel.record.setup(), Some("r4"));
    }

    #[test]
    fn select_keeps_first_when_rng_never_hits() {
        // 1 % n != 0 for every n > 1, so only the first record is ever taken.
        let records = (0..5).map(|i| Ok(CorpusRecord::from_theme(format!("r{i}"))));
        let sel = select_random(records, &mut FixedRng(1)).unwrap();
        assert_eq!(sel.record.setup(), Some("r0"));
    }

    #[test]
    fn select_propagates_parse_errors() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "c.jsonl", "{\"setup\": \"a\"}\n[oops\n");
        let err = select_random(open(&path).unwrap(), &mut FixedRng(0)).unwrap_err();
        assert!(matches!(err, CorpusError::Parse { position: 2, .. }));
    }
}
