use std::fmt;
use std::ops::AddAssign;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Deserialize, Serialize, ValueEnum, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LineEndingStyle {
    #[default]
    Crlf,
    Lf,
    Cr,
    /// Leaves every line ending as it is. Only meaningful as a target.
    #[serde(rename = "none")]
    #[value(name = "none")]
    Unchanged,
}

impl LineEndingStyle {
    pub fn as_str(self) -> &'static str {
        match self {
            LineEndingStyle::Crlf => "\r\n",
            LineEndingStyle::Lf => "\n",
            LineEndingStyle::Cr => "\r",
            LineEndingStyle::Unchanged => "",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            LineEndingStyle::Crlf => "crlf",
            LineEndingStyle::Lf => "lf",
            LineEndingStyle::Cr => "cr",
            LineEndingStyle::Unchanged => "none",
        }
    }
}

impl fmt::Display for LineEndingStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ChangeReport {
    pub individual_changes: usize,
    pub total_line_endings: usize,
}

impl AddAssign for ChangeReport {
    fn add_assign(&mut self, other: Self) {
        self.individual_changes += other.individual_changes;
        self.total_line_endings += other.total_line_endings;
    }
}

/// Rewrites every line ending in `text` to `target`.
///
/// `\r\n` is always a single token; a lone `\r` (including one at the very end
/// of the input) counts as a CR ending. With [`LineEndingStyle::Unchanged`] the
/// text is returned as-is and only the endings are counted.
pub fn convert(text: &str, target: LineEndingStyle) -> (String, ChangeReport) {
    let mut report = ChangeReport::default();
    let mut out = String::with_capacity(text.len() + text.len() / 16);
    let bytes = text.as_bytes();
    let mut copied_to = 0usize;
    let mut idx = 0usize;

    while idx < bytes.len() {
        let found = match bytes[idx] {
            b'\r' if bytes.get(idx + 1) == Some(&b'\n') => Some(LineEndingStyle::Crlf),
            b'\r' => Some(LineEndingStyle::Cr),
            b'\n' => Some(LineEndingStyle::Lf),
            _ => None,
        };
        let Some(found) = found else {
            idx += 1;
            continue;
        };

        let width = found.as_str().len();
        report.total_line_endings += 1;
        if target != LineEndingStyle::Unchanged && found != target {
            out.push_str(&text[copied_to..idx]);
            out.push_str(target.as_str());
            copied_to = idx + width;
            report.individual_changes += 1;
        }
        idx += width;
    }

    out.push_str(&text[copied_to..]);
    (out, report)
}

/// Most frequent line ending in `text`, preferring CRLF, then LF, then CR on ties.
pub fn detect_dominant(text: &str) -> Option<LineEndingStyle> {
    let (mut crlf, mut lf, mut cr) = (0usize, 0usize, 0usize);
    let bytes = text.as_bytes();
    let mut idx = 0usize;
    while idx < bytes.len() {
        match bytes[idx] {
            b'\r' if bytes.get(idx + 1) == Some(&b'\n') => {
                crlf += 1;
                idx += 1;
            }
            b'\r' => cr += 1,
            b'\n' => lf += 1,
            _ => {}
        }
        idx += 1;
    }

    [
        (LineEndingStyle::Crlf, crlf),
        (LineEndingStyle::Lf, lf),
        (LineEndingStyle::Cr, cr),
    ]
    .into_iter()
    .filter(|(_, count)| *count > 0)
    .fold(None, |best: Option<(LineEndingStyle, usize)>, candidate| match best {
        Some(current) if current.1 >= candidate.1 => Some(current),
        _ => Some(candidate),
    })
    .map(|(style, _)| style)
}
