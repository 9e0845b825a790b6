//! Node identifiers and the schemaless attribute record.
//!
//! The store keeps nodes as JSON objects with a handful of well-known fields
//! (`nodeid`, `parentids`, `childrenids`, `order`, ...) plus arbitrary extra
//! attributes. `NodeAttrs` models both a full record and a partial patch:
//! every field is optional, and `merge` overwrites only the fields a patch
//! carries.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Opaque node identifier assigned by the store on creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Node metadata record, also used as a partial-save patch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeAttrs {
    #[serde(rename = "nodeid", skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(rename = "parentids", skip_serializing_if = "Option::is_none")]
    pub parent_ids: Option<Vec<NodeId>>,

    #[serde(rename = "childrenids", skip_serializing_if = "Option::is_none")]
    pub children_ids: Option<Vec<NodeId>>,

    /// Integer rank among siblings. Absent until the node has been fetched
    /// with its order loaded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_filename: Option<String>,

    /// Any attributes the store returns beyond the well-known fields.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl NodeAttrs {
    pub fn parent_ids(&self) -> &[NodeId] {
        self.parent_ids.as_deref().unwrap_or(&[])
    }

    pub fn children_ids(&self) -> &[NodeId] {
        self.children_ids.as_deref().unwrap_or(&[])
    }

    /// Truthiness of an extra attribute, for flags like `expanded`.
    pub fn flag(&self, name: &str) -> bool {
        match self.extra.get(name) {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
            Some(Value::String(s)) => !s.is_empty(),
            Some(_) => true,
        }
    }

    /// Overwrite the fields present in `patch`, leaving the rest untouched.
    pub fn merge(&mut self, patch: NodeAttrs) {
        if let Some(v) = patch.node_id {
            self.node_id = Some(v);
        }
        if let Some(v) = patch.content_type {
            self.content_type = Some(v);
        }
        if let Some(v) = patch.title {
            self.title = Some(v);
        }
        if let Some(v) = patch.parent_ids {
            self.parent_ids = Some(v);
        }
        if let Some(v) = patch.children_ids {
            self.children_ids = Some(v);
        }
        if let Some(v) = patch.order {
            self.order = Some(v);
        }
        if let Some(v) = patch.payload_filename {
            self.payload_filename = Some(v);
        }
        for (key, value) in patch.extra {
            self.extra.insert(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_field_names() {
        let attrs: NodeAttrs = serde_json::from_value(json!({
            "nodeid": "n1",
            "content_type": "text/xhtml+xml",
            "title": "Page",
            "parentids": ["p1"],
            "childrenids": ["c1", "c2"],
            "order": 3,
            "payload_filename": "page.html",
            "expanded": true,
        }))
        .unwrap();

        assert_eq!(attrs.node_id, Some(NodeId::from("n1")));
        assert_eq!(attrs.children_ids(), &[NodeId::from("c1"), NodeId::from("c2")]);
        assert_eq!(attrs.order, Some(3));
        assert!(attrs.flag("expanded"));

        let json = serde_json::to_value(&attrs).unwrap();
        assert_eq!(json["nodeid"], "n1");
        assert_eq!(json["parentids"], json!(["p1"]));
    }

    #[test]
    fn test_patch_skips_absent_fields() {
        let patch = NodeAttrs {
            order: Some(2),
            ..Default::default()
        };
        let json = serde_json::to_value(&patch).unwrap();
        assert_eq!(json, json!({ "order": 2 }));
    }

    #[test]
    fn test_merge_overwrites_only_present_fields() {
        let mut attrs: NodeAttrs = serde_json::from_value(json!({
            "nodeid": "n1",
            "title": "Old",
            "order": 0,
            "expanded": false,
        }))
        .unwrap();

        attrs.merge(NodeAttrs {
            title: Some("New".into()),
            ..Default::default()
        });

        assert_eq!(attrs.title.as_deref(), Some("New"));
        assert_eq!(attrs.order, Some(0));
        assert_eq!(attrs.node_id, Some(NodeId::from("n1")));
    }

    #[test]
    fn test_flag_truthiness() {
        let attrs: NodeAttrs = serde_json::from_value(json!({
            "a": 1,
            "b": 0,
            "c": "",
            "d": "yes",
        }))
        .unwrap();

        assert!(attrs.flag("a"));
        assert!(!attrs.flag("b"));
        assert!(!attrs.flag("c"));
        assert!(attrs.flag("d"));
        assert!(!attrs.flag("missing"));
    }
}
