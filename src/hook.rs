use std::path::Path;

use crate::apply::{self, BatchContext, BatchPolicy, BatchReport};
use crate::config::Options;
use crate::guard::ReentrancyGuard;
use crate::report::{self, OutputSink};
use crate::tree::{ContainerNode, DocumentHost};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The save was issued by the engine itself.
    Reentrant,
    ForceDisabled,
    NotQualifying,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveAction {
    Ignore(IgnoreReason),
    Unify,
}

/// Decides what a save notification for `name` should trigger.
pub fn handle_save_notification(
    name: &str,
    options: &Options,
    guard: &ReentrancyGuard,
) -> SaveAction {
    if guard.is_held() {
        return SaveAction::Ignore(IgnoreReason::Reentrant);
    }
    if !options.force_on_save {
        return SaveAction::Ignore(IgnoreReason::ForceDisabled);
    }
    if !options.rule.qualifies(name) {
        return SaveAction::Ignore(IgnoreReason::NotQualifying);
    }
    SaveAction::Unify
}

/// Save-notification entry point: unifies the saved leaf to the default
/// style and saves it again under the guard.
pub fn on_document_saved<H: DocumentHost + ?Sized>(
    host: &mut H,
    leaf: &ContainerNode,
    options: &Options,
    guard: &ReentrancyGuard,
    sink: &mut dyn OutputSink,
) -> Option<BatchReport> {
    match handle_save_notification(&leaf.name, options, guard) {
        SaveAction::Ignore(_) => None,
        SaveAction::Unify => {
            let ctx = BatchContext {
                rule: options.rule.clone(),
                policy: BatchPolicy {
                    target: options.target_style,
                    save_after_unify: true,
                    only_open_during_bulk_save: options.unify_only_open_files_during_bulk_save,
                    save_all_was_hit: true,
                },
                guard: guard.clone(),
                cancel: None,
            };
            sink.output(report::STARTED);
            let batch = apply::apply(host, leaf, &ctx, sink);
            sink.output(report::DONE);
            Some(batch)
        }
    }
}

/// Bulk "save all": every project in the collection, default style, only
/// touching closed files when the options allow it.
pub fn on_save_all<H: DocumentHost + ?Sized>(
    host: &mut H,
    collection: &ContainerNode,
    options: &Options,
    guard: &ReentrancyGuard,
    sink: &mut dyn OutputSink,
) -> Option<BatchReport> {
    if guard.is_held() || !options.force_on_save {
        return None;
    }
    let ctx = BatchContext {
        rule: options.rule.clone(),
        policy: BatchPolicy {
            target: options.target_style,
            save_after_unify: options.save_after_unify,
            only_open_during_bulk_save: options.unify_only_open_files_during_bulk_save,
            save_all_was_hit: true,
        },
        guard: guard.clone(),
        cancel: None,
    };
    sink.output(report::STARTED);
    let batch = apply::apply(host, collection, &ctx, sink);
    sink.output(report::DONE);
    Some(batch)
}

pub fn describe(action: SaveAction, path: &Path) -> String {
    match action {
        SaveAction::Unify => format!("unifying {}", path.display()),
        SaveAction::Ignore(IgnoreReason::Reentrant) => {
            format!("ignoring save of {} (issued by unifier)", path.display())
        }
        SaveAction::Ignore(IgnoreReason::ForceDisabled) => format!(
            "ignoring save of {} (force_default_line_ending_on_save is off)",
            path.display()
        ),
        SaveAction::Ignore(IgnoreReason::NotQualifying) => {
            format!("ignoring save of {} (not a supported file)", path.display())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::LineEndingStyle;
    use crate::qualify::QualificationRule;
    use crate::report::capture::CaptureSink;
    use crate::tree::NodeKind;
    use crate::tree::memory::MemoryHost;
    use std::path::PathBuf;

    fn options(force_on_save: bool) -> Options {
        Options {
            target_style: LineEndingStyle::Lf,
            save_after_unify: true,
            unify_only_open_files_during_bulk_save: false,
            force_on_save,
            write_report: true,
            rule: QualificationRule::from_lists(".c;.h", "Makefile"),
        }
    }

    #[test]
    fn decision_table() {
        let guard = ReentrancyGuard::new();
        assert_eq!(
            handle_save_notification("main.c", &options(true), &guard),
            SaveAction::Unify
        );
        assert_eq!(
            handle_save_notification("main.c", &options(false), &guard),
            SaveAction::Ignore(IgnoreReason::ForceDisabled)
        );
        assert_eq!(
            handle_save_notification("logo.png", &options(true), &guard),
            SaveAction::Ignore(IgnoreReason::NotQualifying)
        );
        let _token = guard.acquire();
        assert_eq!(
            handle_save_notification("main.c", &options(true), &guard),
            SaveAction::Ignore(IgnoreReason::Reentrant)
        );
    }

    #[test]
    fn saved_leaf_is_unified_and_resaved() {
        let guard = ReentrancyGuard::new();
        let mut host = MemoryHost::default()
            .with_text("p/main.c", "int x;\r\nint y;\r\n")
            .already_open("p/main.c");
        let leaf = ContainerNode::item("main.c", "p/main.c");
        let mut sink = CaptureSink::default();

        let batch = on_document_saved(&mut host, &leaf, &options(true), &guard, &mut sink)
            .expect("save should trigger unify");

        assert_eq!(batch.totals.individual_changes, 2);
        assert_eq!(host.stored_text("p/main.c"), Some("int x;\nint y;\n"));
        assert_eq!(
            sink.messages(),
            vec![
                "Unifying started...\n".to_string(),
                "p/main.c: changed 2 out of 2 line endings\n".to_string(),
                "Done\n".to_string(),
            ]
        );
    }

    #[test]
    fn engine_save_does_not_retrigger_the_hook() {
        let guard = ReentrancyGuard::new();
        let opts = options(true);
        let leaf = ContainerNode::item("main.c", "p/main.c");
        let mut host = MemoryHost::default()
            .with_text("p/main.c", "a\r\n")
            .already_open("p/main.c");
        host.observer = Some(guard.clone());

        on_document_saved(&mut host, &leaf, &opts, &guard, &mut CaptureSink::default());

        // The host saw its save while the guard was raised, so the
        // notification it would fire for that save is a no-op.
        assert_eq!(host.saves_while_guarded, 1);
        let _token = guard.acquire();
        let mut nested_sink = CaptureSink::default();
        assert!(on_document_saved(&mut host, &leaf, &opts, &guard, &mut nested_sink).is_none());
        assert!(nested_sink.messages().is_empty());
    }

    #[test]
    fn non_qualifying_leaf_is_not_resaved() {
        let guard = ReentrancyGuard::new();
        let mut host = MemoryHost::default()
            .with_text("p/notes.md", "a\r\n")
            .already_open("p/notes.md");
        let leaf = ContainerNode::item("notes.md", "p/notes.md");

        let outcome =
            on_document_saved(&mut host, &leaf, &options(true), &guard, &mut CaptureSink::default());

        assert!(outcome.is_none());
        assert!(host.saved.is_empty());
    }

    #[test]
    fn save_all_respects_open_only_option() {
        let guard = ReentrancyGuard::new();
        let mut opts = options(true);
        opts.unify_only_open_files_during_bulk_save = true;
        let tree = ContainerNode::interior(
            NodeKind::Collection,
            "s",
            "s",
            vec![ContainerNode::interior(
                NodeKind::Project,
                "p",
                "s/p",
                vec![
                    ContainerNode::item("a.c", "s/p/a.c"),
                    ContainerNode::item("b.h", "s/p/b.h"),
                ],
            )],
        );
        let mut host = MemoryHost::default()
            .with_text("s/p/a.c", "1\r\n")
            .with_text("s/p/b.h", "2\r\n")
            .already_open("s/p/b.h");
        let mut sink = CaptureSink::default();

        let batch = on_save_all(&mut host, &tree, &opts, &guard, &mut sink).expect("save all");

        assert_eq!(batch.leaves.len(), 1);
        assert_eq!(batch.leaves[0].path, PathBuf::from("s/p/b.h"));
        assert_eq!(host.stored_text("s/p/a.c"), Some("1\r\n"));
        assert_eq!(sink.messages().last().map(String::as_str), Some("Done\n"));
    }
}
