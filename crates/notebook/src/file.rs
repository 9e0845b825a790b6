//! File: one path within a node's attached file tree.
//!
//! A path names a directory when it is empty (the tree root) or ends in `/`.
//! Directories list children lazily; only leaf files carry content.

use crate::events::NotebookEvent;
use crate::node::Node;
use crate::notebook::{NotebookError, Result};
use std::sync::{Arc, RwLock, Weak};

/// A path is a directory when empty (the node's file-tree root) or when it
/// ends with a separator.
pub(crate) fn is_dir_path(path: &str) -> bool {
    path.is_empty() || path.ends_with('/')
}

/// One path in a node's file tree, directory or leaf.
pub struct File {
    node: Weak<Node>,
    path: String,
    is_dir: bool,
    /// Populated for directories only, after `fetch`.
    children: RwLock<Vec<Arc<File>>>,
}

impl File {
    pub(crate) fn new(node: Weak<Node>, path: &str) -> Arc<Self> {
        Arc::new(Self {
            node,
            path: path.to_string(),
            is_dir: is_dir_path(path),
            children: RwLock::new(Vec::new()),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    /// Final path segment; directories drop their trailing separator.
    pub fn basename(&self) -> &str {
        if self.path.is_empty() {
            return "";
        }
        let trimmed = if self.is_dir {
            self.path.trim_end_matches('/')
        } else {
            &self.path
        };
        trimmed.rsplit('/').next().unwrap_or("")
    }

    fn node(&self) -> Result<Arc<Node>> {
        self.node.upgrade().ok_or(NotebookError::Detached)
    }

    /// Current children (directories only; empty before `fetch`).
    pub fn children(&self) -> Vec<Arc<File>> {
        self.children
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Refresh a directory's child list from the store. A leaf has no
    /// fetchable metadata, so this resolves instantly.
    ///
    /// The old child list is discarded wholesale: consumers get a
    /// removing-children notification before the swap and an adding-children
    /// notification after it, so they can detach before reattaching.
    pub async fn fetch(self: &Arc<Self>) -> Result<()> {
        if !self.is_dir {
            return Ok(());
        }

        let node = self.node()?;
        let listing = node.store().list_dir(node.id(), &self.path).await?;
        tracing::debug!("listed {} entries under {}/{}", listing.len(), node.id(), self.path);

        node.events().emit(NotebookEvent::FileChildrenRemoving {
            node_id: node.id().clone(),
            path: self.path.clone(),
        });

        let children: Vec<Arc<File>> = listing
            .iter()
            .map(|child_path| node.get_file(child_path))
            .collect();
        *self.children.write().unwrap_or_else(|e| e.into_inner()) = children;

        node.events().emit(NotebookEvent::FileChildrenAdded {
            node_id: node.id().clone(),
            path: self.path.clone(),
        });
        node.events().emit(NotebookEvent::FileChanged {
            node_id: node.id().clone(),
            path: self.path.clone(),
        });
        Ok(())
    }

    /// Fetch, then hand back the refreshed children.
    pub async fn fetch_children(self: &Arc<Self>) -> Result<Vec<Arc<File>>> {
        self.fetch().await?;
        Ok(self.children())
    }

    /// Linear scan of the fetched children by basename.
    pub fn get_child_by_name(&self, name: &str) -> Option<Arc<File>> {
        self.children
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|child| child.basename() == name)
            .map(Arc::clone)
    }

    /// Read a leaf file's content. Directories fail without any I/O.
    pub async fn read(&self) -> Result<Vec<u8>> {
        if self.is_dir {
            return Err(NotebookError::NotAFile(self.path.clone()));
        }
        let node = self.node()?;
        Ok(node.store().read_file(node.id(), &self.path).await?)
    }

    /// Write a leaf file's content. Directories fail without any I/O.
    pub async fn write(&self, content: &[u8]) -> Result<()> {
        if self.is_dir {
            return Err(NotebookError::NotAFile(self.path.clone()));
        }
        let node = self.node()?;
        Ok(node.store().write_file(node.id(), &self.path, content).await?)
    }

    /// Delete this file from the store.
    pub async fn delete(&self) -> Result<()> {
        let node = self.node()?;
        node.delete_file(&self.path).await
    }
}
