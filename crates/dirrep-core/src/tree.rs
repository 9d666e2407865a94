//! Persistent tree model
//!
//! A repository's content is a tree of [`DirectoryNode`]s whose children are
//! [`Node`]s: either a tracked file ([`FileEntry`]) or a nested directory.
//! Children are always kept sorted files first, then directories, each group
//! by name, so walks and serialized descriptors are reproducible.
//!
//! Reading is public. Mutation is crate-private and only reachable from
//! closures run by the transaction protocol.

use chrono::{DateTime, Utc};
use dirrep_fs::RelPath;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use uuid::Uuid;

use crate::{Error, Result};

/// A tracked file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    /// Stable identity, fresh on every dump and copy
    pub id: Uuid,
    /// Codec used to write the payload
    pub dump_codec: String,
    /// Codec used to read the payload back
    pub pull_codec: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub description: Value,
    /// Optional type hint stored in the class sidecar
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_tag: Option<String>,
}

impl FileEntry {
    /// A new entry whose dump and pull codec are both `codec`.
    pub fn new(name: impl Into<String>, codec: impl Into<String>) -> Self {
        let now = Utc::now();
        let codec = codec.into();
        Self {
            name: name.into(),
            id: Uuid::new_v4(),
            dump_codec: codec.clone(),
            pull_codec: codec,
            created_at: now,
            updated_at: now,
            description: Value::Null,
            class_tag: None,
        }
    }
}

/// A tracked directory and its ordered children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryNode {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub description: Value,
    #[serde(default)]
    children: Vec<Node>,
}

/// One child of a [`DirectoryNode`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    File(FileEntry),
    Directory(DirectoryNode),
}

impl Node {
    pub fn name(&self) -> &str {
        match self {
            Node::File(file) => &file.name,
            Node::Directory(dir) => &dir.name,
        }
    }

    pub(crate) fn set_name(&mut self, name: &str) {
        match self {
            Node::File(file) => file.name = name.to_string(),
            Node::Directory(dir) => dir.name = name.to_string(),
        }
    }

    pub fn is_file(&self) -> bool {
        matches!(self, Node::File(_))
    }

    pub fn as_file(&self) -> Option<&FileEntry> {
        match self {
            Node::File(file) => Some(file),
            Node::Directory(_) => None,
        }
    }

    pub fn as_directory(&self) -> Option<&DirectoryNode> {
        match self {
            Node::Directory(dir) => Some(dir),
            Node::File(_) => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Node::File(_) => 0,
            Node::Directory(_) => 1,
        }
    }

    fn order(&self, other: &Node) -> Ordering {
        self.rank()
            .cmp(&other.rank())
            .then_with(|| self.name().cmp(other.name()))
    }
}

impl DirectoryNode {
    pub fn new(name: impl Into<String>, description: Value) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            created_at: now,
            updated_at: now,
            description,
            children: Vec::new(),
        }
    }

    /// The unnamed root directory.
    pub fn root() -> Self {
        Self::new("", Value::Null)
    }

    /// Children in walk order: files first, then directories, each by name.
    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.name() == name)
    }

    pub fn file(&self, name: &str) -> Option<&FileEntry> {
        self.child(name).and_then(Node::as_file)
    }

    pub fn directory(&self, name: &str) -> Option<&DirectoryNode> {
        self.child(name).and_then(Node::as_directory)
    }

    pub fn files(&self) -> impl Iterator<Item = &FileEntry> {
        self.children.iter().filter_map(Node::as_file)
    }

    pub fn directories(&self) -> impl Iterator<Item = &DirectoryNode> {
        self.children.iter().filter_map(Node::as_directory)
    }

    /// Follow `path` down from this directory.
    pub fn descend(&self, path: &RelPath) -> Option<&DirectoryNode> {
        path.segments()
            .try_fold(self, |dir, segment| dir.directory(segment))
    }

    /// The file at `path` below this directory.
    pub fn file_at(&self, path: &RelPath) -> Option<&FileEntry> {
        let name = path.file_name()?;
        self.descend(&path.parent()?)?.file(name)
    }

    /// The node at `path` below this directory; `None` for the root itself.
    pub fn node_at(&self, path: &RelPath) -> Option<&Node> {
        let name = path.file_name()?;
        self.descend(&path.parent()?)?.child(name)
    }

    /// Walk the subtree rooted here. See [`Walk`].
    pub fn walk(&self, recursive: bool) -> Walk<'_> {
        Walk::new(self, recursive)
    }

    pub(crate) fn children_mut(&mut self) -> &mut Vec<Node> {
        &mut self.children
    }

    pub(crate) fn child_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.children.iter_mut().find(|c| c.name() == name)
    }

    pub(crate) fn file_mut(&mut self, name: &str) -> Option<&mut FileEntry> {
        match self.child_mut(name) {
            Some(Node::File(file)) => Some(file),
            _ => None,
        }
    }

    pub(crate) fn directory_mut(&mut self, name: &str) -> Option<&mut DirectoryNode> {
        match self.child_mut(name) {
            Some(Node::Directory(dir)) => Some(dir),
            _ => None,
        }
    }

    pub(crate) fn descend_mut(&mut self, path: &RelPath) -> Option<&mut DirectoryNode> {
        let mut current = self;
        for segment in path.segments() {
            current = current.directory_mut(segment)?;
        }
        Some(current)
    }

    pub(crate) fn file_at_mut(&mut self, path: &RelPath) -> Option<&mut FileEntry> {
        let name = path.file_name()?;
        self.descend_mut(&path.parent()?)?.file_mut(name)
    }

    /// Insert a child, keeping the order. Sibling names must stay unique.
    pub(crate) fn insert(&mut self, node: Node) -> Result<()> {
        if self.child(node.name()).is_some() {
            return Err(Error::invariant(format!(
                "'{}' is already tracked in directory '{}'",
                node.name(),
                self.name
            )));
        }
        let at = self
            .children
            .binary_search_by(|probe| probe.order(&node))
            .unwrap_or_else(|pos| pos);
        self.children.insert(at, node);
        Ok(())
    }

    /// Insert a child, dropping any sibling of the same name first.
    pub(crate) fn replace(&mut self, node: Node) -> Option<Node> {
        let previous = self.remove(node.name());
        self.children.push(node);
        self.children.sort_by(Node::order);
        previous
    }

    pub(crate) fn remove(&mut self, name: &str) -> Option<Node> {
        let at = self.children.iter().position(|c| c.name() == name)?;
        Some(self.children.remove(at))
    }

    /// Detach the node at `path`.
    pub(crate) fn detach(&mut self, path: &RelPath) -> Option<Node> {
        let name = path.file_name()?;
        self.descend_mut(&path.parent()?)?.remove(name)
    }

    /// Restore ordering and drop duplicate names, keeping the first.
    ///
    /// Returns the number of dropped duplicates. Used after deserializing a
    /// descriptor that may have been edited by hand.
    pub(crate) fn normalize(&mut self) -> usize {
        self.children.sort_by(Node::order);
        let before = self.children.len();
        let mut seen = std::collections::HashSet::new();
        self.children.retain(|c| seen.insert(c.name().to_string()));
        let mut dropped = before - self.children.len();
        for child in &mut self.children {
            if let Node::Directory(dir) = child {
                dropped += dir.normalize();
            }
        }
        dropped
    }
}

/// Depth-first walk over a directory subtree.
///
/// Yields `(path, node)` pairs with paths relative to the walk's start. At
/// every level files come before directories, each sorted by name, and a
/// directory is followed immediately by its own contents when walking
/// recursively.
#[derive(Debug, Clone)]
pub struct Walk<'a> {
    stack: Vec<(RelPath, std::slice::Iter<'a, Node>)>,
    recursive: bool,
}

impl<'a> Walk<'a> {
    fn new(start: &'a DirectoryNode, recursive: bool) -> Self {
        Self {
            stack: vec![(RelPath::root(), start.children.iter())],
            recursive,
        }
    }

    /// A walk over nothing, for missing start directories.
    pub fn empty() -> Self {
        Self {
            stack: Vec::new(),
            recursive: false,
        }
    }

    /// Only the files, with their entries.
    pub fn files(self) -> impl Iterator<Item = (RelPath, &'a FileEntry)> {
        self.filter_map(|(path, node)| node.as_file().map(|file| (path, file)))
    }

    /// Only the directories, with their nodes.
    pub fn directories(self) -> impl Iterator<Item = (RelPath, &'a DirectoryNode)> {
        self.filter_map(|(path, node)| node.as_directory().map(|dir| (path, dir)))
    }
}

impl<'a> Iterator for Walk<'a> {
    type Item = (RelPath, &'a Node);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (base, children) = self.stack.last_mut()?;
            let Some(node) = children.next() else {
                self.stack.pop();
                continue;
            };
            let path = base.join(node.name());
            if self.recursive {
                if let Node::Directory(dir) = node {
                    self.stack.push((path.clone(), dir.children.iter()));
                }
            }
            return Some((path, node));
        }
    }
}
