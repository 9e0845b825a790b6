//! HTTP/JSON binding of the notebook `NodeStore`.
//!
//! Speaks the notebook server's wire protocol: node CRUD under
//! `base/nodes/{id}`, file access under `base/nodes/{id}/{path}` (directory
//! listings come back as `{"files": [...]}`), and the `?save` / `?index`
//! whole-notebook side channels.

use async_trait::async_trait;
use notebook::{NodeAttrs, NodeId, NodeStore, StoreError};
use reqwest::{Client, StatusCode};
use serde_json::Value;

type Result<T> = std::result::Result<T, StoreError>;

/// `NodeStore` over HTTP.
pub struct HttpStore {
    client: Client,
    /// Notebook base URL, kept with a trailing slash.
    base: String,
}

impl HttpStore {
    /// Connect to a notebook served at `base`, e.g.
    /// `http://localhost:8123/notebook/`.
    pub fn new(base: impl Into<String>) -> Self {
        let mut base = base.into();
        if !base.ends_with('/') {
            base.push('/');
        }
        Self {
            client: Client::new(),
            base,
        }
    }

    fn nodes_url(&self) -> String {
        format!("{}nodes/", self.base)
    }

    fn node_url(&self, id: &NodeId) -> String {
        format!("{}nodes/{}", self.base, urlencoding::encode(id.as_str()))
    }

    /// Per-segment encoding; a directory path's trailing separator survives
    /// as an empty final segment.
    fn file_url(&self, id: &NodeId, path: &str) -> String {
        let encoded: Vec<String> = path
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        format!("{}/{}", self.node_url(id), encoded.join("/"))
    }

    fn transport(err: reqwest::Error) -> StoreError {
        StoreError::Transport(err.to_string())
    }

    fn invalid(err: reqwest::Error) -> StoreError {
        StoreError::InvalidResponse(err.to_string())
    }
}

#[async_trait]
impl NodeStore for HttpStore {
    async fn read_node(&self, id: &NodeId) -> Result<NodeAttrs> {
        let response = self
            .client
            .get(self.node_url(id))
            .send()
            .await
            .map_err(Self::transport)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::NodeNotFound(id.to_string()));
        }
        let response = response.error_for_status().map_err(Self::transport)?;
        response.json().await.map_err(Self::invalid)
    }

    async fn update_node(&self, id: &NodeId, patch: &NodeAttrs) -> Result<NodeAttrs> {
        let response = self
            .client
            .post(self.node_url(id))
            .json(patch)
            .send()
            .await
            .map_err(Self::transport)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::NodeNotFound(id.to_string()));
        }
        let response = response.error_for_status().map_err(Self::transport)?;
        response.json().await.map_err(Self::invalid)
    }

    async fn create_node(&self, attrs: &NodeAttrs) -> Result<NodeId> {
        let response = self
            .client
            .post(self.nodes_url())
            .json(attrs)
            .send()
            .await
            .map_err(Self::transport)?
            .error_for_status()
            .map_err(Self::transport)?;
        let body: Value = response.json().await.map_err(Self::invalid)?;
        let id = body
            .get("nodeid")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                StoreError::InvalidResponse(format!("create returned no nodeid: {}", body))
            })?;
        tracing::debug!("created remote node {}", id);
        Ok(NodeId::from(id))
    }

    async fn delete_node(&self, id: &NodeId) -> Result<()> {
        let response = self
            .client
            .delete(self.node_url(id))
            .send()
            .await
            .map_err(Self::transport)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::NodeNotFound(id.to_string()));
        }
        response.error_for_status().map_err(Self::transport)?;
        Ok(())
    }

    async fn read_file(&self, id: &NodeId, path: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(self.file_url(id, path))
            .send()
            .await
            .map_err(Self::transport)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::FileNotFound(format!("{}/{}", id, path)));
        }
        let response = response.error_for_status().map_err(Self::transport)?;
        Ok(response.bytes().await.map_err(Self::transport)?.to_vec())
    }

    async fn write_file(&self, id: &NodeId, path: &str, content: &[u8]) -> Result<()> {
        self.client
            .post(self.file_url(id, path))
            .body(content.to_vec())
            .send()
            .await
            .map_err(Self::transport)?
            .error_for_status()
            .map_err(Self::transport)?;
        Ok(())
    }

    async fn has_file(&self, id: &NodeId, path: &str) -> Result<bool> {
        let response = self
            .client
            .head(self.file_url(id, path))
            .send()
            .await
            .map_err(Self::transport)?;
        Ok(response.status().is_success())
    }

    async fn delete_file(&self, id: &NodeId, path: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.file_url(id, path))
            .send()
            .await
            .map_err(Self::transport)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::FileNotFound(format!("{}/{}", id, path)));
        }
        response.error_for_status().map_err(Self::transport)?;
        Ok(())
    }

    async fn list_dir(&self, id: &NodeId, path: &str) -> Result<Vec<String>> {
        let response = self
            .client
            .get(self.file_url(id, path))
            .send()
            .await
            .map_err(Self::transport)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::FileNotFound(format!("{}/{}", id, path)));
        }
        let response = response.error_for_status().map_err(Self::transport)?;
        let body: Value = response.json().await.map_err(Self::invalid)?;
        let files = body
            .get("files")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                StoreError::InvalidResponse(format!("listing returned no files: {}", body))
            })?;
        files
            .iter()
            .map(|entry| {
                entry.as_str().map(str::to_string).ok_or_else(|| {
                    StoreError::InvalidResponse(format!("non-string listing entry: {}", entry))
                })
            })
            .collect()
    }

    async fn persist(&self) -> Result<()> {
        self.client
            .post(format!("{}?save", self.base))
            .send()
            .await
            .map_err(Self::transport)?
            .error_for_status()
            .map_err(Self::transport)?;
        Ok(())
    }

    async fn search(&self, query: &Value) -> Result<Value> {
        let response = self
            .client
            .post(format!("{}?index", self.base))
            .json(query)
            .send()
            .await
            .map_err(Self::transport)?
            .error_for_status()
            .map_err(Self::transport)?;
        response.json().await.map_err(Self::invalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_gets_trailing_slash() {
        let store = HttpStore::new("http://localhost:8123/notebook");
        assert_eq!(store.nodes_url(), "http://localhost:8123/notebook/nodes/");
    }

    #[test]
    fn test_node_url_encodes_id() {
        let store = HttpStore::new("http://localhost:8123/notebook/");
        assert_eq!(
            store.node_url(&NodeId::from("a b")),
            "http://localhost:8123/notebook/nodes/a%20b"
        );
    }

    #[test]
    fn test_file_url_encodes_each_segment() {
        let store = HttpStore::new("http://localhost:8123/notebook/");
        let id = NodeId::from("n1");
        assert_eq!(
            store.file_url(&id, "res/my img.png"),
            "http://localhost:8123/notebook/nodes/n1/res/my%20img.png"
        );
        // Directory paths keep their trailing separator.
        assert_eq!(
            store.file_url(&id, "res/sub/"),
            "http://localhost:8123/notebook/nodes/n1/res/sub/"
        );
    }
}
