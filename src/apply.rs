use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use serde::Serialize;

use crate::convert::{ChangeReport, LineEndingStyle, convert};
use crate::guard::ReentrancyGuard;
use crate::qualify::QualificationRule;
use crate::report::{self, OutputSink};
use crate::tree::{ContainerNode, DocumentHost};

#[derive(Debug, Clone, Copy)]
pub struct BatchPolicy {
    pub target: LineEndingStyle,
    pub save_after_unify: bool,
    pub only_open_during_bulk_save: bool,
    /// Set when the batch was started by a save rather than a manual command.
    pub save_all_was_hit: bool,
}

impl BatchPolicy {
    fn may_open(&self) -> bool {
        !(self.save_all_was_hit && self.only_open_during_bulk_save)
    }
}

#[derive(Debug, Clone)]
pub struct BatchContext {
    pub rule: QualificationRule,
    pub policy: BatchPolicy,
    pub guard: ReentrancyGuard,
    pub cancel: Option<Arc<AtomicBool>>,
}

impl BatchContext {
    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LeafStage {
    Open,
    Edit,
    Save,
    Close,
}

impl fmt::Display for LeafStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LeafStage::Open => "open",
            LeafStage::Edit => "edit",
            LeafStage::Save => "save",
            LeafStage::Close => "close",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeafReport {
    pub path: PathBuf,
    #[serde(flatten)]
    pub report: ChangeReport,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeafFailure {
    pub path: PathBuf,
    pub stage: LeafStage,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub totals: ChangeReport,
    pub leaves: Vec<LeafReport>,
    pub failures: Vec<LeafFailure>,
    /// Qualifying leaves without a text document (or closed, under the
    /// open-only policy).
    pub skipped: usize,
    pub cancelled: bool,
}

/// Walks `root` depth-first in host order and unifies every qualifying leaf.
///
/// A failing leaf is reported and the walk moves on; nothing here aborts the
/// batch except the cancellation flag.
pub fn apply<H: DocumentHost + ?Sized>(
    host: &mut H,
    root: &ContainerNode,
    ctx: &BatchContext,
    sink: &mut dyn OutputSink,
) -> BatchReport {
    let mut batch = BatchReport::default();
    let mut stack = vec![root];

    while let Some(node) = stack.pop() {
        if ctx.cancelled() {
            batch.cancelled = true;
            break;
        }
        if !node.is_leaf() {
            stack.extend(node.children.iter().rev());
            continue;
        }
        if !ctx.rule.qualifies(&node.name) {
            continue;
        }
        unify_leaf(host, &node.path, ctx, sink, &mut batch);
    }

    batch
}

fn unify_leaf<H: DocumentHost + ?Sized>(
    host: &mut H,
    path: &Path,
    ctx: &BatchContext,
    sink: &mut dyn OutputSink,
    batch: &mut BatchReport,
) {
    let mut opened_here = false;
    if !host.is_open(path) && ctx.policy.may_open() {
        if let Err(err) = host.open(path) {
            record_failure(sink, batch, path, LeafStage::Open, &err);
            return;
        }
        opened_here = true;
    }

    match convert_document(host, path, ctx) {
        Ok(Some(counts)) => {
            batch.totals += counts;
            batch.leaves.push(LeafReport {
                path: path.to_path_buf(),
                report: counts,
            });
            sink.output(&report::leaf_line(path, &counts));
        }
        Ok(None) => batch.skipped += 1,
        Err((stage, err)) => record_failure(sink, batch, path, stage, &err),
    }

    if opened_here {
        if let Err(err) = host.close(path) {
            record_failure(sink, batch, path, LeafStage::Close, &err);
        }
    }
}

fn convert_document<H: DocumentHost + ?Sized>(
    host: &mut H,
    path: &Path,
    ctx: &BatchContext,
) -> std::result::Result<Option<ChangeReport>, (LeafStage, anyhow::Error)> {
    let Some(text) = host.document_text(path) else {
        return Ok(None);
    };
    let (new_text, counts) = convert(text, ctx.policy.target);
    if counts.individual_changes > 0 {
        host.replace_text(path, new_text)
            .map_err(|err| (LeafStage::Edit, err))?;
    }

    if ctx.policy.save_after_unify {
        let saved: Result<()> = ctx.guard.guarded(|| host.save(path));
        saved.map_err(|err| (LeafStage::Save, err))?;
    }

    Ok(Some(counts))
}

fn record_failure(
    sink: &mut dyn OutputSink,
    batch: &mut BatchReport,
    path: &Path,
    stage: LeafStage,
    err: &anyhow::Error,
) {
    let message = format!("{err:#}");
    sink.output(&format!("{}: {stage} failed: {message}\n", path.display()));
    batch.failures.push(LeafFailure {
        path: path.to_path_buf(),
        stage,
        message,
    });
}
