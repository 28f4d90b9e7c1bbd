use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::convert::LineEndingStyle;
use crate::qualify::QualificationRule;

const CONFIG_CANDIDATES: [&str; 3] = [".eolunify.yaml", ".eolunify.yml", ".eolunify.json"];

pub const DEFAULT_FILE_FORMATS: &str = ".cpp; .c; .h; .hpp; .cs; .js; .vb; .txt";
pub const DEFAULT_FILE_NAMES: &str = "";

/// Raw settings as stored on disk.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, rename_all = "snake_case")]
pub struct Settings {
    pub default_line_ending: LineEndingStyle,
    pub supported_file_formats: String,
    pub supported_file_names: String,
    pub save_files_after_unifying: bool,
    pub unify_only_open_files_on_save: bool,
    pub force_default_line_ending_on_save: bool,
    pub write_report: bool,
    pub change_log: bool,
    pub include_hidden: bool,
    pub exclude: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_line_ending: LineEndingStyle::Crlf,
            supported_file_formats: DEFAULT_FILE_FORMATS.to_string(),
            supported_file_names: DEFAULT_FILE_NAMES.to_string(),
            save_files_after_unifying: true,
            unify_only_open_files_on_save: false,
            force_default_line_ending_on_save: false,
            write_report: true,
            change_log: true,
            include_hidden: false,
            exclude: Vec::new(),
        }
    }
}

/// Everything a batch reads, parsed once when the invocation starts.
#[derive(Debug, Clone)]
pub struct Options {
    pub target_style: LineEndingStyle,
    pub save_after_unify: bool,
    pub unify_only_open_files_during_bulk_save: bool,
    pub force_on_save: bool,
    pub write_report: bool,
    pub rule: QualificationRule,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read(path).with_context(|| format!("reading settings {}", path.display()))?;
        let settings = if path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false)
        {
            serde_json::from_slice(&data)
                .with_context(|| format!("parsing JSON settings {}", path.display()))?
        } else {
            serde_yaml::from_slice(&data)
                .with_context(|| format!("parsing YAML settings {}", path.display()))?
        };
        Ok(settings)
    }

    /// Explicit path first, then the well-known names under `root`, then defaults.
    pub fn discover(root: &Path, explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit {
            return Ok((Self::load(path)?, Some(path.to_path_buf())));
        }
        for name in CONFIG_CANDIDATES {
            let candidate = root.join(name);
            if candidate.is_file() {
                return Ok((Self::load(&candidate)?, Some(candidate)));
            }
        }
        Ok((Self::default(), None))
    }

    pub fn options(&self) -> Options {
        Options {
            target_style: self.default_line_ending,
            save_after_unify: self.save_files_after_unifying,
            unify_only_open_files_during_bulk_save: self.unify_only_open_files_on_save,
            force_on_save: self.force_default_line_ending_on_save,
            write_report: self.write_report,
            rule: QualificationRule::from_lists(
                &self.supported_file_formats,
                &self.supported_file_names,
            ),
        }
    }
}
