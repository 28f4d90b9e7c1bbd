use std::io::{self, Write};
use std::path::Path;

use crate::convert::ChangeReport;

pub const STARTED: &str = "Unifying started...\n";
pub const DONE: &str = "Done\n";
pub const NOT_A_SOURCE_FILE: &str = "This is not a valid source file!";

/// Named text channel receiving progress output.
pub trait OutputSink: Send {
    fn output(&mut self, message: &str);
}

pub fn leaf_line(path: &Path, report: &ChangeReport) -> String {
    format!(
        "{}: changed {} out of {} line endings\n",
        path.display(),
        report.individual_changes,
        report.total_line_endings
    )
}

pub fn done_in(seconds: f64) -> String {
    format!("Done in {seconds} seconds\n")
}

pub fn success_summary(changes: usize, seconds: f64) -> String {
    format!("Successfully changed {changes} line endings in {seconds} seconds!")
}

/// Writes channel messages to any writer; silent when reporting is disabled.
pub struct Reporter {
    enabled: bool,
    out: Box<dyn Write + Send>,
}

impl Reporter {
    pub fn new(enabled: bool, out: Box<dyn Write + Send>) -> Self {
        Self { enabled, out }
    }

    pub fn stdout(enabled: bool) -> Self {
        Self::new(enabled, Box::new(io::stdout()))
    }
}

impl OutputSink for Reporter {
    fn output(&mut self, message: &str) {
        if !self.enabled {
            return;
        }
        // The channel is best effort; a closed stdout must not abort a batch.
        let _ = self.out.write_all(message.as_bytes());
        let _ = self.out.flush();
    }
}
