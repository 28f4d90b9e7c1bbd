use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use clap::{ArgAction, Args, Parser, Subcommand, ValueHint};
use is_terminal::IsTerminal;
use serde_json::json;

mod apply;
mod commands;
mod config;
mod convert;
mod encoding;
mod guard;
mod hook;
mod logging;
mod qualify;
mod report;
mod schedule;
mod tree;
mod workspace;

use apply::BatchReport;
use commands::{Scope, Session};
use config::{Options, Settings};
use convert::LineEndingStyle;
use encoding::EncodingStrategy;
use guard::ReentrancyGuard;
use logging::ChangeLog;
use qualify::QualificationRule;
use report::Reporter;
use workspace::{FsHost, ScanOptions, canonicalize, scan};

fn main() -> Result<()> {
    let cli = Cli::parse();
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::File(cmd) => handle_manual(Scope::File, &cmd.common, Some(cmd.path.as_path()))?,
        Command::Folder(cmd) => handle_manual(Scope::Folder, &cmd.common, Some(cmd.path.as_path()))?,
        Command::Project(cmd) => handle_manual(Scope::Project, &cmd.common, Some(cmd.path.as_path()))?,
        Command::Solution(cmd) => handle_manual(Scope::Solution, &cmd.common, None)?,
        Command::Saved(cmd) => handle_saved(cmd)?,
        Command::SaveAll(cmd) => handle_save_all(cmd)?,
        Command::Log(cmd) => handle_log(cmd)?,
    }

    Ok(())
}

fn handle_manual(scope: Scope, common: &CommonArgs, path: Option<&Path>) -> Result<()> {
    let session = open_session(common)?;
    let node = session.target(scope, path)?.clone();
    let default_style = common.style.unwrap_or(session.options.target_style);
    let style = if common.style.is_none() && allow_prompt(common) {
        let current = match scope {
            Scope::File => session.host.current_style(&node.path),
            _ => None,
        };
        match prompt_style(&node.name, default_style, current)? {
            Some(style) => style,
            None => {
                println!("cancelled; nothing was changed.");
                return Ok(());
            }
        }
    } else {
        default_style
    };
    if style == LineEndingStyle::Unchanged {
        println!("target style is 'none'; nothing to do.");
        return Ok(());
    }

    let write_report = session.options.write_report;
    let outcome = commands::run_manual(
        session,
        scope,
        node,
        style,
        Reporter::stdout(write_report),
    )?;
    print_warnings(write_report, &outcome.warnings);
    if !common.json {
        println!(
            "{}",
            report::success_summary(outcome.batch.totals.individual_changes, outcome.seconds)
        );
    }
    print_batch_details(common, scope.label(), &outcome.batch, Some(outcome.seconds))
}

fn handle_saved(cmd: PathCommand) -> Result<()> {
    let mut session = open_session(&cmd.common)?;
    let mut sink = Reporter::stdout(session.options.write_report);
    let (action, batch) = commands::run_saved(&mut session, &cmd.path, &mut sink)?;
    print_warnings(session.options.write_report, session.host.warnings());
    if !cmd.common.json {
        println!("{}", hook::describe(action, &cmd.path));
    }
    match batch {
        Some(batch) => print_batch_details(&cmd.common, "saved", &batch, None),
        None => Ok(()),
    }
}

fn handle_save_all(cmd: SolutionCommand) -> Result<()> {
    let mut session = open_session(&cmd.common)?;
    let mut sink = Reporter::stdout(session.options.write_report);
    let batch = commands::run_save_all(&mut session, &mut sink);
    print_warnings(session.options.write_report, session.host.warnings());
    match batch {
        Some(batch) => print_batch_details(&cmd.common, "save-all", &batch, None),
        None => {
            if !cmd.common.json {
                println!("force_default_line_ending_on_save is off; nothing to do.");
            }
            Ok(())
        }
    }
}

fn handle_log(cmd: LogCommand) -> Result<()> {
    let log = ChangeLog::in_dir(&canonicalize(&cmd.root));
    let entries = log.read_recent(cmd.tail)?;
    if entries.is_empty() {
        println!("change log is empty ({}).", log.path().display());
        return Ok(());
    }
    for entry in entries {
        println!(
            "[{}] {:<9} {:>5} -> {:<4} {:>6} {:<12} {}",
            entry.timestamp,
            entry.trigger,
            entry.from.as_deref().unwrap_or("-"),
            entry.target,
            entry.line_endings,
            entry.encoding,
            entry.path
        );
    }
    Ok(())
}

fn open_session(common: &CommonArgs) -> Result<Session> {
    let root = canonicalize(&common.root);
    let (settings, found) = Settings::discover(&root, common.config.as_deref())?;
    let options = resolve_options(common, &settings);
    let scan_options = ScanOptions {
        include_hidden: common.include_hidden || settings.include_hidden,
        exclude: settings
            .exclude
            .iter()
            .chain(common.exclude.iter())
            .cloned()
            .collect(),
    };
    let tree = scan(&root, &scan_options)?;

    let mut host = FsHost::new(EncodingStrategy::new(common.encoding.as_deref())?);
    if settings.change_log && !common.no_log {
        host = host.with_change_log(ChangeLog::in_dir(&root));
    }
    if options.write_report && !common.json {
        print_session_summary(&root, found.as_deref(), &options, tree.leaf_count());
    }

    let mut session = Session {
        tree,
        host,
        options,
        guard: ReentrancyGuard::new(),
    };
    session.preopen(&common.open)?;
    Ok(session)
}

fn resolve_options(common: &CommonArgs, settings: &Settings) -> Options {
    let mut options = settings.options();
    if let Some(style) = common.style {
        options.target_style = style;
    }
    if common.extensions.is_some() || common.names.is_some() {
        options.rule = QualificationRule::from_lists(
            common
                .extensions
                .as_deref()
                .unwrap_or(&settings.supported_file_formats),
            common
                .names
                .as_deref()
                .unwrap_or(&settings.supported_file_names),
        );
    }
    if common.no_save {
        options.save_after_unify = false;
    }
    if common.only_open {
        options.unify_only_open_files_during_bulk_save = true;
    }
    if common.force_on_save {
        options.force_on_save = true;
    }
    if common.quiet || common.json {
        options.write_report = false;
    }
    options
}

fn print_session_summary(root: &Path, config: Option<&Path>, options: &Options, leaves: usize) {
    println!("=== eolunify ===");
    println!("workspace: {} ({leaves} files)", root.display());
    println!(
        "settings: {}",
        config
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "defaults".to_string())
    );
    println!(
        "extensions: {}; names: {}",
        join_or_none(options.rule.extensions()),
        join_or_none(options.rule.exact_names())
    );
    println!(
        "save_after_unify={}, only_open_on_save={}, force_on_save={}",
        options.save_after_unify,
        options.unify_only_open_files_during_bulk_save,
        options.force_on_save
    );
    println!("---");
}

fn join_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "(none)".to_string()
    } else {
        items.join(", ")
    }
}

fn print_batch_details(
    common: &CommonArgs,
    trigger: &str,
    batch: &BatchReport,
    seconds: Option<f64>,
) -> Result<()> {
    if common.json {
        let payload = json!({
            "trigger": trigger,
            "seconds": seconds,
            "report": batch,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        if batch.skipped > 0 {
            println!("skipped {} file(s) without a text document", batch.skipped);
        }
        for failure in &batch.failures {
            println!(
                "failed to {} {}: {}",
                failure.stage,
                failure.path.display(),
                failure.message
            );
        }
    }
    if !batch.failures.is_empty() {
        bail!("{} file(s) could not be unified", batch.failures.len());
    }
    Ok(())
}

fn print_warnings(write_report: bool, warnings: &[String]) {
    if !write_report {
        return;
    }
    for warning in warnings {
        eprintln!("warning: {warning}");
    }
}

fn allow_prompt(common: &CommonArgs) -> bool {
    !common.json && io::stdin().is_terminal() && io::stdout().is_terminal()
}

/// Asks which style `name` should be unified to. `None` means cancel.
fn prompt_style(
    name: &str,
    default: LineEndingStyle,
    current: Option<LineEndingStyle>,
) -> Result<Option<LineEndingStyle>> {
    let message = prompt_message(name, default, current);
    loop {
        print_prompt(&message)?;
        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            return Ok(None);
        }
        match input.trim().to_lowercase().as_str() {
            "" => return Ok(Some(default)),
            "c" | "crlf" => return Ok(Some(LineEndingStyle::Crlf)),
            "l" | "lf" => return Ok(Some(LineEndingStyle::Lf)),
            "r" | "cr" => return Ok(Some(LineEndingStyle::Cr)),
            "n" | "none" | "q" | "quit" => return Ok(None),
            _ => {
                println!("Please enter c, l, r, or n.");
            }
        }
    }
}

fn prompt_message(
    name: &str,
    default: LineEndingStyle,
    current: Option<LineEndingStyle>,
) -> String {
    let currently = current
        .map(|style| format!(" (currently {style})"))
        .unwrap_or_default();
    format!("Line endings for {name}{currently}? [c]rlf/[l]f/[r] cr/[n]one (default {default}): ")
}

fn print_prompt(message: &str) -> Result<()> {
    print!("{message}");
    io::stdout().flush()?;
    Ok(())
}

#[derive(Debug, Parser)]
#[command(
    name = "eolunify",
    version,
    about = "Unify line endings across files, folders, projects and whole workspaces"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Unify a single file.
    File(PathCommand),
    /// Unify every supported file under a folder.
    Folder(PathCommand),
    /// Unify every supported file in a project (a top-level directory).
    Project(PathCommand),
    /// Unify the whole workspace.
    Solution(SolutionCommand),
    /// Notify that a file was saved; unifies it when forced on save.
    Saved(PathCommand),
    /// Unify the workspace as part of a bulk save.
    SaveAll(SolutionCommand),
    /// Show recent entries of the change log.
    Log(LogCommand),
}

#[derive(Debug, Clone, Args)]
struct CommonArgs {
    #[arg(long, default_value = ".", value_hint = ValueHint::DirPath)]
    root: PathBuf,
    #[arg(long, value_name = "PATH", value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,
    #[arg(long, value_enum)]
    style: Option<LineEndingStyle>,
    #[arg(long = "open", value_name = "PATH", value_hint = ValueHint::FilePath)]
    open: Vec<PathBuf>,
    #[arg(long, value_name = "LIST")]
    extensions: Option<String>,
    #[arg(long, value_name = "LIST")]
    names: Option<String>,
    #[arg(long, value_name = "ENCODING")]
    encoding: Option<String>,
    #[arg(long = "no-save", action = ArgAction::SetTrue)]
    no_save: bool,
    #[arg(long = "only-open", action = ArgAction::SetTrue)]
    only_open: bool,
    #[arg(long = "force-on-save", action = ArgAction::SetTrue)]
    force_on_save: bool,
    #[arg(long = "include-hidden", action = ArgAction::SetTrue)]
    include_hidden: bool,
    #[arg(long = "exclude", value_name = "GLOB")]
    exclude: Vec<String>,
    #[arg(long = "no-log", action = ArgAction::SetTrue)]
    no_log: bool,
    #[arg(long, short = 'q', action = ArgAction::SetTrue)]
    quiet: bool,
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(Debug, Args)]
struct PathCommand {
    #[command(flatten)]
    common: CommonArgs,
    #[arg(value_name = "PATH", value_hint = ValueHint::AnyPath)]
    path: PathBuf,
}

#[derive(Debug, Args)]
struct SolutionCommand {
    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Debug, Args)]
struct LogCommand {
    #[arg(long, default_value = ".", value_hint = ValueHint::DirPath)]
    root: PathBuf,
    #[arg(long = "tail", default_value_t = 20)]
    tail: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).expect("valid arguments")
    }

    fn common_of(cli: Cli) -> CommonArgs {
        match cli.command {
            Command::File(cmd) | Command::Folder(cmd) | Command::Project(cmd) => cmd.common,
            Command::Saved(cmd) => cmd.common,
            Command::Solution(cmd) | Command::SaveAll(cmd) => cmd.common,
            Command::Log(_) => panic!("log has no common arguments"),
        }
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn style_values_parse() {
        let common = common_of(parse(&["eolunify", "solution", "--style", "lf"]));
        assert_eq!(common.style, Some(LineEndingStyle::Lf));
        let common = common_of(parse(&["eolunify", "file", "a.c", "--style", "none"]));
        assert_eq!(common.style, Some(LineEndingStyle::Unchanged));
        assert!(Cli::try_parse_from(["eolunify", "solution", "--style", "unix"]).is_err());
    }

    #[test]
    fn overrides_apply_on_top_of_settings() {
        let common = common_of(parse(&[
            "eolunify",
            "save-all",
            "--extensions",
            ".rs; .toml",
            "--no-save",
            "--only-open",
            "--force-on-save",
            "--json",
        ]));
        let options = resolve_options(&common, &Settings::default());
        assert_eq!(options.rule.extensions(), [".rs", ".toml"]);
        assert!(options.rule.exact_names().is_empty());
        assert!(!options.save_after_unify);
        assert!(options.unify_only_open_files_during_bulk_save);
        assert!(options.force_on_save);
        assert!(!options.write_report);
    }

    #[test]
    fn prompt_mentions_the_current_style_when_known() {
        assert_eq!(
            prompt_message("main.c", LineEndingStyle::Crlf, Some(LineEndingStyle::Lf)),
            "Line endings for main.c (currently lf)? [c]rlf/[l]f/[r] cr/[n]one (default crlf): "
        );
        assert!(
            prompt_message("app", LineEndingStyle::Lf, None).starts_with("Line endings for app? ")
        );
    }

    #[test]
    fn settings_are_used_without_overrides() {
        let common = common_of(parse(&["eolunify", "project", "app"]));
        let mut settings = Settings::default();
        settings.default_line_ending = LineEndingStyle::Cr;
        settings.supported_file_names = "Makefile".to_string();
        let options = resolve_options(&common, &settings);
        assert_eq!(options.target_style, LineEndingStyle::Cr);
        assert!(options.rule.qualifies("Makefile"));
        assert!(options.write_report);
    }
}
