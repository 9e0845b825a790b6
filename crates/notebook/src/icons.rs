//! Icon resolution seam and cache entry states.
//!
//! The resolver itself is an external collaborator; the notebook only caches
//! its answers. Cache entries are a tagged state rather than an overloaded
//! null: `Pending` marks an in-flight lookup so concurrent calls for the
//! same basename issue exactly one underlying lookup.

use crate::node::Node;
use async_trait::async_trait;
use std::collections::HashMap;

/// Built-in fallback icon shown while a real lookup is in flight.
pub const DEFAULT_ICON: &str = "note.png";
/// Built-in icon for nodes whose candidates all failed to resolve.
pub const UNKNOWN_ICON: &str = "note-unknown.png";

pub const DEFAULT_ICON_PATH: &str = "/static/images/node_icons/note.png";
pub const UNKNOWN_ICON_PATH: &str = "/static/images/node_icons/note-unknown.png";

/// Notebook-relative directory holding notebook-local icons.
pub const NOTEBOOK_META_DIR: &str = "__NOTEBOOK__";
pub const NOTEBOOK_ICON_DIR: &str = "icons";

/// State of one basename in the notebook's icon cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IconState {
    /// A lookup is in flight; do not start another.
    Pending,
    /// Lookup committed a usable path.
    Resolved(String),
    /// Lookup committed, but found nothing usable.
    Unresolved,
}

/// Maps nodes to candidate icon basenames and basenames to file paths.
#[async_trait]
pub trait IconResolver: Send + Sync {
    /// Ordered candidate basenames per icon kind for a node.
    fn candidate_basenames(&self, node: &Node) -> HashMap<String, Vec<String>>;

    /// Resolve a basename to a file path, or `None`/empty if it has none.
    async fn lookup_filename(&self, basename: &str) -> Option<String>;
}
