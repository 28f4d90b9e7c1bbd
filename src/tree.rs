use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Collection,
    Project,
    Folder,
    Item,
}

/// One node of the container hierarchy. Items are leaves unless they carry
/// children of their own, in which case they are walked like folders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerNode {
    pub kind: NodeKind,
    pub name: String,
    pub path: PathBuf,
    pub children: Vec<ContainerNode>,
}

impl ContainerNode {
    pub fn interior(
        kind: NodeKind,
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        children: Vec<ContainerNode>,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            path: path.into(),
            children,
        }
    }

    pub fn item(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::interior(NodeKind::Item, name, path, Vec::new())
    }

    pub fn is_leaf(&self) -> bool {
        self.kind == NodeKind::Item && self.children.is_empty()
    }

    /// Depth-first lookup by path.
    pub fn find(&self, path: &Path) -> Option<&ContainerNode> {
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if node.path == path {
                return Some(node);
            }
            stack.extend(node.children.iter().rev());
        }
        None
    }

    pub fn leaf_count(&self) -> usize {
        if self.is_leaf() {
            return 1;
        }
        self.children.iter().map(ContainerNode::leaf_count).sum()
    }
}

/// Document operations the batch applier needs from its host. Opening,
/// saving and closing are the only calls that may block.
pub trait DocumentHost {
    fn is_open(&self, path: &Path) -> bool;

    fn open(&mut self, path: &Path) -> Result<()>;

    fn close(&mut self, path: &Path) -> Result<()>;

    /// Full text of an open document; `None` when the leaf is not open or
    /// has no text document behind it.
    fn document_text(&self, path: &Path) -> Option<&str>;

    /// Replaces the whole buffer in one edit, keeping any markers the host tracks.
    fn replace_text(&mut self, path: &Path, text: String) -> Result<()>;

    fn save(&mut self, path: &Path) -> Result<()>;
}
