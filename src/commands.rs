use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::apply::{self, BatchContext, BatchPolicy, BatchReport};
use crate::config::Options;
use crate::convert::LineEndingStyle;
use crate::guard::ReentrancyGuard;
use crate::hook::{self, SaveAction};
use crate::report::{self, OutputSink};
use crate::schedule::run_async;
use crate::tree::{ContainerNode, DocumentHost, NodeKind};
use crate::workspace::{FsHost, canonicalize};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    File,
    Folder,
    Project,
    Solution,
}

impl Scope {
    pub fn label(self) -> &'static str {
        match self {
            Scope::File => "file",
            Scope::Folder => "folder",
            Scope::Project => "project",
            Scope::Solution => "solution",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A loaded workspace together with everything one invocation needs.
pub struct Session {
    pub tree: ContainerNode,
    pub host: FsHost,
    pub options: Options,
    pub guard: ReentrancyGuard,
}

pub struct ManualOutcome {
    pub batch: BatchReport,
    pub seconds: f64,
    pub warnings: Vec<String>,
}

impl Session {
    /// Marks documents as already open in the editor.
    pub fn preopen(&mut self, paths: &[PathBuf]) -> Result<()> {
        for path in paths {
            let path = canonicalize(path);
            if !self.host.is_open(&path) {
                self.host
                    .open(&path)
                    .with_context(|| format!("opening {}", path.display()))?;
            }
        }
        Ok(())
    }

    /// Resolves the node a manual command targets and checks it has the right shape.
    pub fn target(&self, scope: Scope, path: Option<&Path>) -> Result<&ContainerNode> {
        let Some(path) = path else {
            return Ok(&self.tree);
        };
        let wanted = canonicalize(path);
        let Some(node) = self.tree.find(&wanted) else {
            bail!(
                "{} is not part of the workspace {}",
                path.display(),
                self.tree.path.display()
            );
        };
        let matches = match scope {
            Scope::File => node.is_leaf(),
            Scope::Folder => node.kind == NodeKind::Folder || node.kind == NodeKind::Project,
            Scope::Project => node.kind == NodeKind::Project,
            Scope::Solution => node.kind == NodeKind::Collection,
        };
        if !matches {
            bail!("{} is not a {scope}", path.display());
        }
        if scope == Scope::File && !self.options.rule.qualifies(&node.name) {
            bail!(report::NOT_A_SOURCE_FILE);
        }
        Ok(node)
    }
}

/// Runs a manual unify over `node` on a background thread and reports the
/// elapsed time to the sink.
pub fn run_manual<S>(
    session: Session,
    scope: Scope,
    node: ContainerNode,
    target: LineEndingStyle,
    mut sink: S,
) -> Result<ManualOutcome>
where
    S: OutputSink + 'static,
{
    let Session {
        mut host,
        options,
        guard,
        ..
    } = session;
    host.set_trigger(scope.label(), target);
    let ctx = BatchContext {
        rule: options.rule.clone(),
        policy: BatchPolicy {
            target,
            save_after_unify: options.save_after_unify,
            only_open_during_bulk_save: options.unify_only_open_files_during_bulk_save,
            save_all_was_hit: false,
        },
        guard,
        cancel: None,
    };

    let task = run_async(scope.label(), move || {
        sink.output(report::STARTED);
        let batch = apply::apply(&mut host, &node, &ctx, &mut sink);
        (batch, sink, host.warnings().to_vec())
    })?;
    let timed = task.join()?;
    let seconds = timed.seconds();
    let (batch, mut sink, warnings) = timed.value;
    sink.output(&report::done_in(seconds));
    Ok(ManualOutcome {
        batch,
        seconds,
        warnings,
    })
}

/// Reacts to the host reporting that `path` was saved.
pub fn run_saved(
    session: &mut Session,
    path: &Path,
    sink: &mut dyn OutputSink,
) -> Result<(SaveAction, Option<BatchReport>)> {
    let path = canonicalize(path);
    let leaf = match session.tree.find(&path) {
        Some(node) if node.is_leaf() => node.clone(),
        Some(_) => bail!("{} is not a file", path.display()),
        None => {
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .with_context(|| format!("{} has no file name", path.display()))?;
            ContainerNode::item(name, &path)
        }
    };
    // The editor still holds the document it just saved.
    session.preopen(std::slice::from_ref(&path))?;

    let action = hook::handle_save_notification(&leaf.name, &session.options, &session.guard);
    session.host.set_trigger("saved", session.options.target_style);
    let batch = hook::on_document_saved(
        &mut session.host,
        &leaf,
        &session.options,
        &session.guard,
        sink,
    );
    Ok((action, batch))
}

/// Bulk save of the whole collection.
pub fn run_save_all(session: &mut Session, sink: &mut dyn OutputSink) -> Option<BatchReport> {
    session
        .host
        .set_trigger("save-all", session.options.target_style);
    hook::on_save_all(
        &mut session.host,
        &session.tree,
        &session.options,
        &session.guard,
        sink,
    )
}
