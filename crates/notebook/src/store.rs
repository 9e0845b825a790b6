//! NodeStore trait abstraction over the remote notebook backend.
//!
//! Implementations:
//! - `InMemoryStore` - For testing
//! - `HttpStore` (in notebook-http) - Speaks the HTTP/JSON wire protocol
//!
//! The store is the authority for node ids and for the side effects of
//! structural changes (e.g. it removes a deleted node's id from its parents'
//! child lists). File paths are relative to a node's file-tree root;
//! directories carry a trailing `/`.

use crate::attrs::{NodeAttrs, NodeId};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Remote store for node metadata and per-node file trees.
#[async_trait]
pub trait NodeStore: Send + Sync {
    /// Read a node's full metadata record.
    async fn read_node(&self, id: &NodeId) -> Result<NodeAttrs>;

    /// Persist the fields present in `patch` and return the updated record.
    /// Callers treat local state as committed only once this resolves.
    async fn update_node(&self, id: &NodeId, patch: &NodeAttrs) -> Result<NodeAttrs>;

    /// Create a node and return its store-assigned id.
    async fn create_node(&self, attrs: &NodeAttrs) -> Result<NodeId>;

    /// Destroy a node. The store also removes the id from the child lists of
    /// the node's parents.
    async fn delete_node(&self, id: &NodeId) -> Result<()>;

    /// Read a leaf file's content.
    async fn read_file(&self, id: &NodeId, path: &str) -> Result<Vec<u8>>;

    /// Write a leaf file's content, creating it if needed.
    async fn write_file(&self, id: &NodeId, path: &str, content: &[u8]) -> Result<()>;

    /// Existence check (HEAD).
    async fn has_file(&self, id: &NodeId, path: &str) -> Result<bool>;

    /// Delete a file.
    async fn delete_file(&self, id: &NodeId, path: &str) -> Result<()>;

    /// List a directory: child paths relative to the node root, directories
    /// with a trailing `/`. The empty path is the node's file-tree root.
    async fn list_dir(&self, id: &NodeId, path: &str) -> Result<Vec<String>>;

    /// Ask the store to persist the whole notebook (`POST ?save`).
    async fn persist(&self) -> Result<()>;

    /// Run a search query (`POST ?index`), e.g. `["search", "title", value]`.
    async fn search(&self, query: &Value) -> Result<Value>;
}

/// In-memory store for testing.
///
/// Counts node reads so tests can assert that cached fetches issue no calls.
pub struct InMemoryStore {
    nodes: RwLock<HashMap<NodeId, NodeAttrs>>,
    files: RwLock<HashMap<(NodeId, String), Vec<u8>>>,
    node_reads: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            files: RwLock::new(HashMap::new()),
            node_reads: AtomicUsize::new(0),
        }
    }

    /// Seed a node record; assigns an id if the record has none.
    pub fn insert_node(&self, mut attrs: NodeAttrs) -> NodeId {
        let id = attrs
            .node_id
            .clone()
            .unwrap_or_else(|| NodeId::new(Uuid::new_v4().to_string()));
        attrs.node_id = Some(id.clone());
        self.nodes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), attrs);
        id
    }

    /// Seed a file under a node.
    pub fn insert_file(&self, id: &NodeId, path: &str, content: &[u8]) {
        self.files
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert((id.clone(), path.to_string()), content.to_vec());
    }

    /// Number of `read_node` calls issued so far.
    pub fn node_reads(&self) -> usize {
        self.node_reads.load(Ordering::Relaxed)
    }

    /// Peek at a stored record (test inspection).
    pub fn node(&self, id: &NodeId) -> Option<NodeAttrs> {
        self.nodes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeStore for InMemoryStore {
    async fn read_node(&self, id: &NodeId) -> Result<NodeAttrs> {
        self.node_reads.fetch_add(1, Ordering::Relaxed);
        self.nodes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NodeNotFound(id.to_string()))
    }

    async fn update_node(&self, id: &NodeId, patch: &NodeAttrs) -> Result<NodeAttrs> {
        let mut nodes = self.nodes.write().unwrap_or_else(|e| e.into_inner());
        let attrs = nodes
            .get_mut(id)
            .ok_or_else(|| StoreError::NodeNotFound(id.to_string()))?;
        attrs.merge(patch.clone());
        Ok(attrs.clone())
    }

    async fn create_node(&self, attrs: &NodeAttrs) -> Result<NodeId> {
        let id = NodeId::new(Uuid::new_v4().to_string());
        let mut record = attrs.clone();
        record.node_id = Some(id.clone());
        self.nodes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), record);
        Ok(id)
    }

    async fn delete_node(&self, id: &NodeId) -> Result<()> {
        let mut nodes = self.nodes.write().unwrap_or_else(|e| e.into_inner());
        nodes
            .remove(id)
            .ok_or_else(|| StoreError::NodeNotFound(id.to_string()))?;

        // The store owns the parent-side cleanup of a deleted id.
        for attrs in nodes.values_mut() {
            if let Some(children) = attrs.children_ids.as_mut() {
                children.retain(|child| child != id);
            }
        }
        drop(nodes);

        self.files
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(owner, _), _| owner != id);
        Ok(())
    }

    async fn read_file(&self, id: &NodeId, path: &str) -> Result<Vec<u8>> {
        self.files
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(id.clone(), path.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::FileNotFound(format!("{}/{}", id, path)))
    }

    async fn write_file(&self, id: &NodeId, path: &str, content: &[u8]) -> Result<()> {
        self.files
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert((id.clone(), path.to_string()), content.to_vec());
        Ok(())
    }

    async fn has_file(&self, id: &NodeId, path: &str) -> Result<bool> {
        Ok(self
            .files
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&(id.clone(), path.to_string())))
    }

    async fn delete_file(&self, id: &NodeId, path: &str) -> Result<()> {
        self.files
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&(id.clone(), path.to_string()))
            .map(|_| ())
            .ok_or_else(|| StoreError::FileNotFound(format!("{}/{}", id, path)))
    }

    async fn list_dir(&self, id: &NodeId, path: &str) -> Result<Vec<String>> {
        if !path.is_empty() && !path.ends_with('/') {
            return Err(StoreError::InvalidResponse(format!(
                "not a directory: {}",
                path
            )));
        }

        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        let mut entries = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for (key, _) in files.iter() {
            if key.0 != *id {
                continue;
            }
            let Some(rest) = key.1.strip_prefix(path) else {
                continue;
            };
            let segment = rest.split('/').next().unwrap_or("");
            if segment.is_empty() {
                continue;
            }
            let child = if rest.contains('/') {
                format!("{}{}/", path, segment)
            } else {
                format!("{}{}", path, segment)
            };
            if seen.insert(child.clone()) {
                entries.push(child);
            }
        }

        if entries.is_empty() && !path.is_empty() {
            return Err(StoreError::FileNotFound(format!("{}/{}", id, path)));
        }

        entries.sort();
        Ok(entries)
    }

    async fn persist(&self) -> Result<()> {
        Ok(())
    }

    async fn search(&self, query: &Value) -> Result<Value> {
        // Only the title search the client issues is modeled.
        let parts = query
            .as_array()
            .ok_or_else(|| StoreError::InvalidResponse("query must be an array".into()))?;
        match (
            parts.first().and_then(Value::as_str),
            parts.get(1).and_then(Value::as_str),
            parts.get(2).and_then(Value::as_str),
        ) {
            (Some("search"), Some("title"), Some(title)) => {
                let nodes = self.nodes.read().unwrap_or_else(|e| e.into_inner());
                let hits: Vec<Value> = nodes
                    .values()
                    .filter(|attrs| attrs.title.as_deref() == Some(title))
                    .filter_map(|attrs| attrs.node_id.as_ref())
                    .map(|id| Value::String(id.to_string()))
                    .collect();
                Ok(Value::Array(hits))
            }
            _ => Err(StoreError::InvalidResponse(format!(
                "unsupported query: {}",
                query
            ))),
        }
    }
}

// Implement NodeStore for Arc<T> where T: NodeStore
// This allows sharing a store between a Notebook and test assertions
#[async_trait]
impl<T: NodeStore + Send + Sync> NodeStore for std::sync::Arc<T> {
    async fn read_node(&self, id: &NodeId) -> Result<NodeAttrs> {
        (**self).read_node(id).await
    }

    async fn update_node(&self, id: &NodeId, patch: &NodeAttrs) -> Result<NodeAttrs> {
        (**self).update_node(id, patch).await
    }

    async fn create_node(&self, attrs: &NodeAttrs) -> Result<NodeId> {
        (**self).create_node(attrs).await
    }

    async fn delete_node(&self, id: &NodeId) -> Result<()> {
        (**self).delete_node(id).await
    }

    async fn read_file(&self, id: &NodeId, path: &str) -> Result<Vec<u8>> {
        (**self).read_file(id, path).await
    }

    async fn write_file(&self, id: &NodeId, path: &str, content: &[u8]) -> Result<()> {
        (**self).write_file(id, path, content).await
    }

    async fn has_file(&self, id: &NodeId, path: &str) -> Result<bool> {
        (**self).has_file(id, path).await
    }

    async fn delete_file(&self, id: &NodeId, path: &str) -> Result<()> {
        (**self).delete_file(id, path).await
    }

    async fn list_dir(&self, id: &NodeId, path: &str) -> Result<Vec<String>> {
        (**self).list_dir(id, path).await
    }

    async fn persist(&self) -> Result<()> {
        (**self).persist().await
    }

    async fn search(&self, query: &Value) -> Result<Value> {
        (**self).search(query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_node_crud() {
        let store = InMemoryStore::new();
        let id = store
            .create_node(&NodeAttrs {
                title: Some("Page".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        let attrs = store.read_node(&id).await.unwrap();
        assert_eq!(attrs.title.as_deref(), Some("Page"));
        assert_eq!(attrs.node_id, Some(id.clone()));

        let updated = store
            .update_node(
                &id,
                &NodeAttrs {
                    order: Some(4),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.order, Some(4));
        assert_eq!(updated.title.as_deref(), Some("Page"));

        store.delete_node(&id).await.unwrap();
        assert!(matches!(
            store.read_node(&id).await,
            Err(StoreError::NodeNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_removes_id_from_parents() {
        let store = InMemoryStore::new();
        let child = store.insert_node(NodeAttrs {
            node_id: Some(NodeId::from("c1")),
            ..Default::default()
        });
        store.insert_node(NodeAttrs {
            node_id: Some(NodeId::from("p1")),
            children_ids: Some(vec![child.clone(), NodeId::from("c2")]),
            ..Default::default()
        });

        store.delete_node(&child).await.unwrap();

        let parent = store.node(&NodeId::from("p1")).unwrap();
        assert_eq!(parent.children_ids(), &[NodeId::from("c2")]);
    }

    #[tokio::test]
    async fn test_list_dir() {
        let store = InMemoryStore::new();
        let id = NodeId::from("n1");
        store.insert_file(&id, "page.html", b"<html/>");
        store.insert_file(&id, "res/a.png", b"a");
        store.insert_file(&id, "res/sub/b.png", b"b");

        let mut root = store.list_dir(&id, "").await.unwrap();
        root.sort();
        assert_eq!(root, vec!["page.html".to_string(), "res/".to_string()]);

        let res = store.list_dir(&id, "res/").await.unwrap();
        assert_eq!(res, vec!["res/a.png".to_string(), "res/sub/".to_string()]);

        assert!(store.list_dir(&id, "missing/").await.is_err());
    }

    #[tokio::test]
    async fn test_search_title() {
        let store = InMemoryStore::new();
        store.insert_node(NodeAttrs {
            node_id: Some(NodeId::from("n1")),
            title: Some("Trip notes".into()),
            ..Default::default()
        });
        store.insert_node(NodeAttrs {
            node_id: Some(NodeId::from("n2")),
            title: Some("Other".into()),
            ..Default::default()
        });

        let hits = store
            .search(&json!(["search", "title", "Trip notes"]))
            .await
            .unwrap();
        assert_eq!(hits, json!(["n1"]));
    }
}
