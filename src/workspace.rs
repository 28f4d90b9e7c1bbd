use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use globset::{Glob, GlobSet, GlobSetBuilder};
use time::OffsetDateTime;
use walkdir::{DirEntry, WalkDir};

use crate::convert::{LineEndingStyle, convert, detect_dominant};
use crate::encoding::{EncodingStrategy, TextFormat};
use crate::logging::{ChangeLog, LOG_DIR, SavedChange};
use crate::tree::{ContainerNode, DocumentHost, NodeKind};

#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub include_hidden: bool,
    pub exclude: Vec<String>,
}

/// Builds the container tree for a workspace directory: the directory is the
/// collection, its sub-directories are projects, anything deeper is a folder.
pub fn scan(root: &Path, options: &ScanOptions) -> Result<ContainerNode> {
    let root = canonicalize(root);
    let metadata =
        fs::metadata(&root).with_context(|| format!("reading workspace {}", root.display()))?;
    if !metadata.is_dir() {
        bail!("workspace root {} is not a directory", root.display());
    }
    let exclude = build_exclude_globs(&options.exclude)?;
    let name = display_name(&root);
    let children = scan_children(&root, &root, 0, options, exclude.as_ref())?;
    Ok(ContainerNode::interior(
        NodeKind::Collection,
        name,
        root,
        children,
    ))
}

fn scan_children(
    root: &Path,
    dir: &Path,
    depth: usize,
    options: &ScanOptions,
    exclude: Option<&GlobSet>,
) -> Result<Vec<ContainerNode>> {
    let walker = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| options.include_hidden || !is_hidden(entry));

    let mut children = Vec::new();
    for entry in walker {
        let entry = entry.with_context(|| format!("listing {}", dir.display()))?;
        let path = entry.path();
        if is_log_dir(root, path) || is_excluded(root, path, exclude) {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type().is_dir() {
            let kind = if depth == 0 {
                NodeKind::Project
            } else {
                NodeKind::Folder
            };
            let nested = scan_children(root, path, depth + 1, options, exclude)?;
            children.push(ContainerNode::interior(kind, name, path, nested));
        } else if entry.file_type().is_file() {
            children.push(ContainerNode::item(name, path));
        }
    }
    Ok(children)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

fn is_log_dir(root: &Path, path: &Path) -> bool {
    path == root.join(LOG_DIR)
}

fn is_excluded(root: &Path, path: &Path, exclude: Option<&GlobSet>) -> bool {
    let Some(set) = exclude else {
        return false;
    };
    let relative = path.strip_prefix(root).unwrap_or(path);
    set.is_match(normalize_slashes(relative).as_str())
}

fn normalize_slashes(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

pub fn canonicalize(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn build_exclude_globs(patterns: &[String]) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }

    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob =
            Glob::new(pattern).map_err(|err| anyhow!("invalid exclude glob '{pattern}': {err}"))?;
        builder.add(glob);
    }

    builder
        .build()
        .map(Some)
        .map_err(|err| anyhow!("unable to build exclude globs: {err}"))
}

#[derive(Debug)]
struct OpenDocument {
    /// `None` when the file is not text.
    text: Option<String>,
    format: Option<TextFormat>,
    original_style: Option<LineEndingStyle>,
    dirty: bool,
}

/// Documents backed by files on disk.
#[derive(Debug)]
pub struct FsHost {
    encoding: EncodingStrategy,
    documents: BTreeMap<PathBuf, OpenDocument>,
    change_log: Option<ChangeLog>,
    trigger: String,
    target: LineEndingStyle,
    warnings: Vec<String>,
}

impl FsHost {
    pub fn new(encoding: EncodingStrategy) -> Self {
        Self {
            encoding,
            documents: BTreeMap::new(),
            change_log: None,
            trigger: "manual".to_string(),
            target: LineEndingStyle::Unchanged,
            warnings: Vec::new(),
        }
    }

    pub fn with_change_log(mut self, log: ChangeLog) -> Self {
        self.change_log = Some(log);
        self
    }

    /// Label and target written to the change log for every save.
    pub fn set_trigger(&mut self, trigger: &str, target: LineEndingStyle) {
        self.trigger = trigger.to_string();
        self.target = target;
    }

    /// Problems noticed while opening or saving that did not fail the leaf.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Dominant line-ending style of `path` as it is now, without opening it.
    pub fn current_style(&self, path: &Path) -> Option<LineEndingStyle> {
        if let Some(document) = self.documents.get(path) {
            return document.text.as_deref().and_then(detect_dominant);
        }
        let (document, _) = self.load(path).ok()?;
        document.original_style
    }

    #[cfg(test)]
    fn open_count(&self) -> usize {
        self.documents.len()
    }

    /// Reads and decodes `path`. A file that does not decode cleanly gets no
    /// text document, since re-encoding it would replace the bad bytes.
    fn load(&self, path: &Path) -> Result<(OpenDocument, Option<String>)> {
        let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let no_text = OpenDocument {
            text: None,
            format: None,
            original_style: None,
            dirty: false,
        };
        let Some(decoded) = self.encoding.decode(&bytes) else {
            return Ok((no_text, None));
        };
        if decoded.had_errors {
            let warning = format!(
                "{} does not decode cleanly as {} (via {}); left untouched",
                path.display(),
                decoded.format.encoding.name(),
                decoded.format.source
            );
            return Ok((no_text, Some(warning)));
        }
        let document = OpenDocument {
            original_style: detect_dominant(&decoded.text),
            text: Some(decoded.text),
            format: Some(decoded.format),
            dirty: false,
        };
        Ok((document, None))
    }
}

impl DocumentHost for FsHost {
    fn is_open(&self, path: &Path) -> bool {
        self.documents.contains_key(path)
    }

    fn open(&mut self, path: &Path) -> Result<()> {
        let (document, warning) = self.load(path)?;
        self.warnings.extend(warning);
        self.documents.insert(path.to_path_buf(), document);
        Ok(())
    }

    fn close(&mut self, path: &Path) -> Result<()> {
        self.documents
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| anyhow!("{} is not open", path.display()))
    }

    fn document_text(&self, path: &Path) -> Option<&str> {
        self.documents.get(path)?.text.as_deref()
    }

    fn replace_text(&mut self, path: &Path, text: String) -> Result<()> {
        let document = self
            .documents
            .get_mut(path)
            .ok_or_else(|| anyhow!("{} is not open", path.display()))?;
        if document.text.is_none() {
            bail!("{} has no text document", path.display());
        }
        document.text = Some(text);
        document.dirty = true;
        Ok(())
    }

    fn save(&mut self, path: &Path) -> Result<()> {
        let document = self
            .documents
            .get_mut(path)
            .ok_or_else(|| anyhow!("{} is not open", path.display()))?;
        let (Some(text), Some(format)) = (document.text.as_deref(), document.format) else {
            return Ok(());
        };
        if !document.dirty {
            return Ok(());
        }
        let (encoded, lossy) = format.encode(text);
        if lossy {
            bail!(
                "{} cannot be written back as {} without loss",
                path.display(),
                format.encoding.name()
            );
        }
        write_via_temp(path, &encoded).with_context(|| format!("writing {}", path.display()))?;
        document.dirty = false;

        // The file is already written; a log failure must not undo that.
        if let Some(log) = &self.change_log {
            let (_, report) = convert(text, LineEndingStyle::Unchanged);
            let change = SavedChange {
                from: document.original_style,
                target: self.target,
                line_endings: report.total_line_endings,
                encoding: format.encoding.name(),
            };
            if let Err(err) = log.record(&self.trigger, path, &change) {
                self.warnings
                    .push(format!("change log not updated for {}: {err:#}", path.display()));
            }
        }
        Ok(())
    }
}

fn write_via_temp(path: &Path, data: &[u8]) -> Result<()> {
    let base_dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let unique = format!(
        ".eolunify-tmp-{}-{}",
        std::process::id(),
        OffsetDateTime::now_utc().unix_timestamp_nanos()
    );
    let temp_path = base_dir.join(unique);
    {
        let mut file = fs::File::create(&temp_path)
            .with_context(|| format!("creating temp file {}", temp_path.display()))?;
        file.write_all(data)
            .with_context(|| format!("writing temp file {}", temp_path.display()))?;
        file.sync_all()
            .with_context(|| format!("syncing temp file {}", temp_path.display()))?;
    }
    if let Ok(metadata) = fs::metadata(path) {
        let _ = fs::set_permissions(&temp_path, metadata.permissions());
    }
    fs::rename(&temp_path, path).or_else(|err| {
        let _ = fs::remove_file(&temp_path);
        Err(err).with_context(|| format!("replacing {}", path.display()))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(path: &Path, data: &[u8]) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(path, data).expect("write file");
    }

    fn names(nodes: &[ContainerNode]) -> Vec<&str> {
        nodes.iter().map(|node| node.name.as_str()).collect()
    }

    #[test]
    fn scan_assigns_kinds_by_depth_in_name_order() {
        let dir = tempdir().expect("temp dir");
        let root = dir.path();
        write(&root.join("README.txt"), b"top");
        write(&root.join("beta/src/lib.c"), b"x");
        write(&root.join("alpha/main.c"), b"y");
        write(&root.join(".git/config"), b"hidden");
        write(&root.join(".eolunify/change_log.jsonl"), b"");

        let tree = scan(root, &ScanOptions::default()).expect("scan");

        assert_eq!(tree.kind, NodeKind::Collection);
        assert_eq!(names(&tree.children), vec!["README.txt", "alpha", "beta"]);
        assert_eq!(tree.children[0].kind, NodeKind::Item);
        assert_eq!(tree.children[1].kind, NodeKind::Project);
        let beta = &tree.children[2];
        assert_eq!(beta.children[0].kind, NodeKind::Folder);
        assert_eq!(beta.children[0].children[0].name, "lib.c");
        assert_eq!(tree.leaf_count(), 3);
    }

    #[test]
    fn scan_honours_hidden_and_exclude_options() {
        let dir = tempdir().expect("temp dir");
        let root = dir.path();
        write(&root.join("app/.env"), b"SECRET=1");
        write(&root.join("app/target/out.c"), b"generated");
        write(&root.join("app/main.c"), b"int main;");
        write(&root.join(".eolunify/change_log.jsonl"), b"");

        let options = ScanOptions {
            include_hidden: true,
            exclude: vec!["**/target".to_string()],
        };
        let tree = scan(root, &options).expect("scan");

        assert_eq!(names(&tree.children), vec!["app"]);
        assert_eq!(names(&tree.children[0].children), vec![".env", "main.c"]);
    }

    #[test]
    fn scan_rejects_files_and_bad_globs() {
        let dir = tempdir().expect("temp dir");
        let file = dir.path().join("lone.c");
        write(&file, b"");
        assert!(scan(&file, &ScanOptions::default()).is_err());

        let options = ScanOptions {
            include_hidden: false,
            exclude: vec!["[".to_string()],
        };
        assert!(scan(dir.path(), &options).is_err());
    }

    #[test]
    fn host_round_trip_preserves_bom_and_logs() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("a.cs");
        write(&path, b"\xEF\xBB\xBFclass A {}\n\n");
        let log = ChangeLog::in_dir(dir.path());
        let mut host = FsHost::new(EncodingStrategy::default()).with_change_log(log.clone());
        host.set_trigger("file", LineEndingStyle::Crlf);

        host.open(&path).expect("open");
        assert!(host.is_open(&path));
        let (text, _) = convert(host.document_text(&path).expect("text"), LineEndingStyle::Crlf);
        host.replace_text(&path, text).expect("replace");
        host.save(&path).expect("save");
        host.close(&path).expect("close");

        assert_eq!(
            fs::read(&path).expect("read back"),
            b"\xEF\xBB\xBFclass A {}\r\n\r\n"
        );
        assert_eq!(host.open_count(), 0);
        let recent = log.read_recent(5).expect("log");
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].trigger, "file");
        assert_eq!(recent[0].from.as_deref(), Some("lf"));
        assert_eq!(recent[0].line_endings, 2);
    }

    #[test]
    fn clean_documents_are_not_rewritten() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("a.c");
        write(&path, b"x\n");
        let log = ChangeLog::in_dir(dir.path());
        let mut host = FsHost::new(EncodingStrategy::default()).with_change_log(log.clone());

        host.open(&path).expect("open");
        host.save(&path).expect("save");

        assert!(log.read_recent(5).expect("log").is_empty());
    }

    #[test]
    fn binary_files_have_no_text_document() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("logo.txt");
        write(&path, b"\x89PNG\x00\x00");
        let mut host = FsHost::new(EncodingStrategy::default());

        host.open(&path).expect("open");

        assert!(host.document_text(&path).is_none());
        assert!(host.replace_text(&path, "x".into()).is_err());
        assert!(host.save(&path).is_ok());
    }

    #[test]
    fn undecodable_bytes_are_never_rewritten() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("a.c");
        write(&path, b"caf\xE9\r\n");
        let strategy = EncodingStrategy::new(Some("utf-8")).expect("strategy");
        let mut host = FsHost::new(strategy);

        host.open(&path).expect("open");

        assert!(host.document_text(&path).is_none());
        assert!(host.save(&path).is_ok());
        assert_eq!(fs::read(&path).expect("read back"), b"caf\xE9\r\n");
        assert_eq!(host.warnings().len(), 1);
        assert!(host.warnings()[0].contains("does not decode cleanly"));
    }

    #[test]
    fn change_log_failure_does_not_fail_the_save() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("a.c");
        write(&path, b"x\r\ny\r\n");
        write(&dir.path().join(LOG_DIR), b"not a directory");
        let mut host =
            FsHost::new(EncodingStrategy::default()).with_change_log(ChangeLog::in_dir(dir.path()));

        host.open(&path).expect("open");
        host.replace_text(&path, "x\ny\n".into()).expect("replace");
        host.save(&path).expect("save still succeeds");

        assert_eq!(fs::read(&path).expect("read back"), b"x\ny\n");
        assert_eq!(host.warnings().len(), 1);
        assert!(host.warnings()[0].starts_with("change log not updated"));
    }

    #[test]
    fn current_style_peeks_without_opening() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("a.c");
        write(&path, b"1\r\n2\r\n3\n");
        let mut host = FsHost::new(EncodingStrategy::default());

        assert_eq!(host.current_style(&path), Some(LineEndingStyle::Crlf));
        assert_eq!(host.open_count(), 0);

        host.open(&path).expect("open");
        host.replace_text(&path, "1\n2\n".into()).expect("replace");
        assert_eq!(host.current_style(&path), Some(LineEndingStyle::Lf));
        assert_eq!(host.current_style(&dir.path().join("gone.c")), None);
    }

    #[test]
    fn missing_files_fail_to_open() {
        let dir = tempdir().expect("temp dir");
        let mut host = FsHost::new(EncodingStrategy::default());
        let err = host.open(&dir.path().join("gone.c")).expect_err("missing");
        assert!(format!("{err:#}").contains("failed to read"));
        assert!(host.close(&dir.path().join("gone.c")).is_err());
    }
}
