use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::convert::LineEndingStyle;

pub const LOG_DIR: &str = ".eolunify";
const LOG_FILE: &str = "change_log.jsonl";
const MAX_ENTRIES: usize = 500;

#[derive(Debug, Serialize)]
struct ChangeLogEntry<'a> {
    timestamp: &'a str,
    trigger: &'a str,
    path: &'a Path,
    from: Option<LineEndingStyle>,
    target: LineEndingStyle,
    line_endings: usize,
    encoding: &'a str,
}

/// What a single save wrote.
#[derive(Debug, Clone, Copy)]
pub struct SavedChange<'a> {
    pub from: Option<LineEndingStyle>,
    pub target: LineEndingStyle,
    pub line_endings: usize,
    pub encoding: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct RecordedChange {
    pub timestamp: String,
    pub trigger: String,
    pub path: String,
    #[serde(default)]
    pub from: Option<String>,
    pub target: String,
    pub line_endings: usize,
    #[serde(default)]
    pub encoding: String,
}

/// Append-only JSONL record of every document the unifier wrote.
#[derive(Debug, Clone)]
pub struct ChangeLog {
    path: PathBuf,
}

impl ChangeLog {
    pub fn in_dir(root: &Path) -> Self {
        Self {
            path: root.join(LOG_DIR).join(LOG_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, trigger: &str, path: &Path, change: &SavedChange<'_>) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }
        let timestamp = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_else(|_| "unknown".into());
        let entry = ChangeLogEntry {
            timestamp: &timestamp,
            trigger,
            path,
            from: change.from,
            target: change.target,
            line_endings: change.line_endings,
            encoding: change.encoding,
        };
        let json = serde_json::to_string(&entry)?;
        let mut file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .with_context(|| format!("opening {}", self.path.display()))?;
        writeln!(file, "{json}")?;
        self.truncate()
    }

    /// Most recent `tail` entries, oldest first. Unparseable lines are skipped.
    pub fn read_recent(&self, tail: usize) -> Result<Vec<RecordedChange>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let lines = self.read_lines()?;
        let start = lines.len().saturating_sub(tail);
        Ok(lines[start..]
            .iter()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }

    fn read_lines(&self) -> Result<Vec<String>> {
        let file = OpenOptions::new()
            .read(true)
            .open(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))?;
        let lines = BufReader::new(file)
            .lines()
            .collect::<Result<Vec<_>, _>>()?;
        Ok(lines)
    }

    fn truncate(&self) -> Result<()> {
        let lines = self.read_lines()?;
        if lines.len() <= MAX_ENTRIES {
            return Ok(());
        }
        let keep = &lines[lines.len() - MAX_ENTRIES..];
        fs::write(&self.path, keep.join("\n") + "\n")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn change(from: Option<LineEndingStyle>, target: LineEndingStyle, n: usize) -> SavedChange<'static> {
        SavedChange {
            from,
            target,
            line_endings: n,
            encoding: "UTF-8",
        }
    }

    #[test]
    fn records_are_read_back_in_order() {
        let dir = tempdir().expect("temp dir");
        let log = ChangeLog::in_dir(dir.path());
        log.record(
            "folder",
            Path::new("a.c"),
            &change(Some(LineEndingStyle::Crlf), LineEndingStyle::Lf, 2),
        )
        .expect("record a");
        log.record("saved", Path::new("b.c"), &change(None, LineEndingStyle::Crlf, 4))
            .expect("record b");

        let recent = log.read_recent(10).expect("read");
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].path, "a.c");
        assert_eq!(recent[0].from.as_deref(), Some("crlf"));
        assert_eq!(recent[0].target, "lf");
        assert_eq!(recent[1].trigger, "saved");
        assert_eq!(recent[1].from, None);
        assert_eq!(recent[1].line_endings, 4);

        let last = log.read_recent(1).expect("read tail");
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].path, "b.c");
    }

    #[test]
    fn missing_log_reads_empty() {
        let dir = tempdir().expect("temp dir");
        let log = ChangeLog::in_dir(dir.path());
        assert!(log.read_recent(5).expect("read").is_empty());
    }

    #[test]
    fn log_is_capped() {
        let dir = tempdir().expect("temp dir");
        let log = ChangeLog::in_dir(dir.path());
        for idx in 0..(MAX_ENTRIES + 3) {
            let name = format!("f{idx}.c");
            log.record("solution", Path::new(&name), &change(None, LineEndingStyle::Lf, 0))
                .expect("record");
        }
        let all = log.read_recent(usize::MAX).expect("read");
        assert_eq!(all.len(), MAX_ENTRIES);
        assert_eq!(all[0].path, "f3.c");
    }
}
