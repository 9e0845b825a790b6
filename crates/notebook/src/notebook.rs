//! Notebook: the identity map and every structural mutation.
//!
//! The notebook owns the process-wide id-to-node map. `get_node` is the
//! single allocation point for node identity: the same id always yields the
//! same `Arc<Node>`. Mutations that touch more than one node's child list
//! (create, move, delete, reorder) are driven from here as sequential chains
//! of dependent store calls - the store is the authority for ids and order,
//! so no step is skipped even when its result could be inferred locally.

use crate::attrs::{NodeAttrs, NodeId};
use crate::events::{EventBus, NotebookEvent, Subscription};
use crate::icons::{
    IconResolver, IconState, DEFAULT_ICON, DEFAULT_ICON_PATH, NOTEBOOK_ICON_DIR,
    NOTEBOOK_META_DIR, UNKNOWN_ICON, UNKNOWN_ICON_PATH,
};
use crate::node::{Node, PAGE_CONTENT_TYPE, PAGE_FILE};
use crate::store::{NodeStore, StoreError};
use futures::future;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Title given to freshly created nodes.
const NEW_NODE_TITLE: &str = "New Page";
/// Initial payload written for freshly created page nodes.
const EMPTY_PAGE: &str = "<html><body></body></html>";

#[derive(Debug, Error)]
pub enum NotebookError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Not a file: {0}")]
    NotAFile(String),

    #[error("Invalid move: {0}")]
    InvalidMove(String),

    #[error("Node is no longer attached to a notebook")]
    Detached,
}

pub type Result<T> = std::result::Result<T, NotebookError>;

/// Where a moved node should land relative to a target node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    /// Last child of the target.
    Child,
    /// Sibling right after the target, in the target's primary parent.
    After,
    /// Sibling at the target's position, in the target's primary parent.
    Before,
}

/// Destination of a `move_node` call. Either `parent` (with an optional
/// `index`) or `target` plus `relation` must be given.
#[derive(Default)]
pub struct MoveRequest {
    pub target: Option<Arc<Node>>,
    pub relation: Option<Relation>,
    pub parent: Option<Arc<Node>>,
    pub index: Option<usize>,
}

struct NodeEntry {
    node: Arc<Node>,
    /// Forwards the node's events onto the notebook's aggregate bus; dropped
    /// (and thereby unsubscribed) when the node is evicted.
    _forward: Subscription,
}

pub(crate) struct NotebookInner {
    store: Arc<dyn NodeStore>,
    icons: Arc<dyn IconResolver>,
    root_id: NodeId,
    nodes: RwLock<HashMap<NodeId, NodeEntry>>,
    events: Arc<EventBus>,
    /// Process-wide icon basename cache. `Pending` entries are in-flight
    /// sentinels that suppress duplicate lookups.
    icon_cache: RwLock<HashMap<String, IconState>>,
}

impl NotebookInner {
    /// The cached node for an id, allocating an unfetched placeholder (and
    /// wiring its event forwarding) on first sight.
    pub(crate) fn get_node(self: &Arc<Self>, id: &NodeId) -> Arc<Node> {
        if let Some(entry) = self
            .nodes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
        {
            return Arc::clone(&entry.node);
        }

        let mut nodes = self.nodes.write().unwrap_or_else(|e| e.into_inner());
        // A concurrent caller may have won the race for the same id.
        if let Some(entry) = nodes.get(id) {
            return Arc::clone(&entry.node);
        }

        let node = Node::new(id.clone(), Arc::downgrade(self), Arc::clone(&self.store));
        let bus = Arc::clone(&self.events);
        let forward = node.events().subscribe(move |event| bus.emit(event));
        nodes.insert(
            id.clone(),
            NodeEntry {
                node: Arc::clone(&node),
                _forward: forward,
            },
        );
        node
    }

    /// Non-allocating cache lookup.
    fn cached_node(&self, id: &NodeId) -> Option<Arc<Node>> {
        self.nodes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .map(|entry| Arc::clone(&entry.node))
    }

    fn evict(&self, id: &NodeId) {
        self.nodes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id);
    }
}

/// Client-side model of one notebook tree.
pub struct Notebook {
    inner: Arc<NotebookInner>,
}

impl Notebook {
    pub fn new(
        store: Arc<dyn NodeStore>,
        icons: Arc<dyn IconResolver>,
        root_id: impl Into<NodeId>,
    ) -> Self {
        let root_id = root_id.into();
        let mut icon_cache = HashMap::new();
        icon_cache.insert(
            DEFAULT_ICON.to_string(),
            IconState::Resolved(DEFAULT_ICON_PATH.to_string()),
        );
        icon_cache.insert(
            UNKNOWN_ICON.to_string(),
            IconState::Resolved(UNKNOWN_ICON_PATH.to_string()),
        );

        let inner = Arc::new(NotebookInner {
            store,
            icons,
            root_id: root_id.clone(),
            nodes: RwLock::new(HashMap::new()),
            events: Arc::new(EventBus::new()),
            icon_cache: RwLock::new(icon_cache),
        });
        inner.get_node(&root_id);
        Self { inner }
    }

    /// The root node (an unfetched placeholder until fetched).
    pub fn root(&self) -> Arc<Node> {
        self.inner.get_node(&self.inner.root_id)
    }

    /// The cached node for an id; same id, same object, always.
    pub fn get_node(&self, id: &NodeId) -> Arc<Node> {
        self.inner.get_node(id)
    }

    /// Cache peek that does not allocate a placeholder.
    pub fn cached_node(&self, id: &NodeId) -> Option<Arc<Node>> {
        self.inner.cached_node(id)
    }

    /// Aggregate bus carrying every node's events plus notebook-level ones.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.inner.events
    }

    /// Subscribe to the aggregate bus.
    pub fn subscribe(
        &self,
        callback: impl Fn(NotebookEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.events.subscribe(callback)
    }

    /// Fetch the root node.
    pub async fn fetch(&self) -> Result<()> {
        self.root().fetch().await
    }

    /// Fetch a node by id.
    pub async fn fetch_node(&self, id: &NodeId) -> Result<Arc<Node>> {
        let node = self.get_node(id);
        node.fetch().await?;
        Ok(node)
    }

    /// Ask the store to persist the whole notebook.
    pub async fn save_all(&self) -> Result<()> {
        Ok(self.inner.store.persist().await?)
    }

    /// Run a raw search query against the store's index.
    pub async fn search(&self, query: &Value) -> Result<Value> {
        Ok(self.inner.store.search(query).await?)
    }

    /// Search nodes by exact title.
    pub async fn search_title(&self, title: &str) -> Result<Value> {
        self.search(&json!(["search", "title", title])).await
    }

    /// Create a new page node under `parent` at `index` (clamped; `None`
    /// appends). Returns the registered node.
    ///
    /// The chain is strictly sequential: create, write the empty payload,
    /// renumber the spliced sibling list, persist the parent's child ids,
    /// then re-fetch the parent's children so local state reflects the
    /// store's view.
    pub async fn create_child(
        &self,
        parent: &Arc<Node>,
        index: Option<usize>,
    ) -> Result<Arc<Node>> {
        let child_count = parent.children_ids().len();
        let index = index.unwrap_or(child_count).min(child_count);

        let mut record = NodeAttrs {
            content_type: Some(PAGE_CONTENT_TYPE.to_string()),
            title: Some(NEW_NODE_TITLE.to_string()),
            parent_ids: Some(vec![parent.id().clone()]),
            children_ids: Some(Vec::new()),
            order: Some(index as i64),
            ..Default::default()
        };
        let id = self.inner.store.create_node(&record).await?;
        record.node_id = Some(id.clone());
        tracing::info!("created node {} under {}", id, parent.id());

        let node = self.inner.get_node(&id);
        node.apply_record(record, false);

        self.inner
            .store
            .write_file(&id, PAGE_FILE, EMPTY_PAGE.as_bytes())
            .await?;

        let mut children_ids = parent.children_ids();
        children_ids.insert(index, id.clone());
        self.update_child_order(&children_ids).await?;

        parent
            .save(NodeAttrs {
                children_ids: Some(children_ids),
                ..Default::default()
            })
            .await?;
        parent.fetch_children(true).await?;

        Ok(node)
    }

    /// Move a node to the destination described by `request`.
    ///
    /// Removal from the old primary parent uses a placeholder slot so the
    /// insertion index stays relative to the original list when the old and
    /// new parent are the same. The node's own save must land first; the
    /// new-parent and old-parent save+refetch then run concurrently. The old
    /// parent's orders may be left non-contiguous.
    pub async fn move_node(&self, node: &Arc<Node>, request: MoveRequest) -> Result<()> {
        let MoveRequest {
            target,
            relation,
            parent,
            index,
        } = request;

        // Resolve the destination (parent, index) pair.
        let (parent, index) = if let Some(parent) = parent {
            let len = parent.children_ids().len();
            (parent, index.unwrap_or(len).min(len))
        } else {
            let target = target
                .ok_or_else(|| NotebookError::InvalidMove("target node must be given".into()))?;
            match relation {
                Some(Relation::Child) => {
                    let len = target.children_ids().len();
                    (target, len)
                }
                Some(relation @ (Relation::After | Relation::Before)) => {
                    let parent = target
                        .parents()?
                        .into_iter()
                        .next()
                        .unwrap_or_else(|| Arc::clone(&target));
                    let siblings = parent.children_ids();
                    let index = match siblings.iter().position(|id| id == target.id()) {
                        Some(at) if relation == Relation::After => at + 1,
                        Some(at) => at,
                        None => siblings.len(),
                    };
                    (parent, index)
                }
                None => {
                    return Err(NotebookError::InvalidMove(
                        "a relation to the target must be given".into(),
                    ))
                }
            }
        };

        let old_parent = node
            .parents()?
            .into_iter()
            .next()
            .ok_or_else(|| NotebookError::InvalidMove("node has no parent".into()))?;
        let same_parent = Arc::ptr_eq(&parent, &old_parent);
        tracing::info!(
            "moving node {} from {} to {} at {}",
            node.id(),
            old_parent.id(),
            parent.id(),
            index
        );

        // Blank the node's old slot first; the insertion index is relative
        // to the original list, which matters when both parents are one list.
        let mut old_ids: Vec<Option<NodeId>> =
            old_parent.children_ids().into_iter().map(Some).collect();
        if let Some(at) = old_ids
            .iter()
            .position(|slot| slot.as_ref() == Some(node.id()))
        {
            old_ids[at] = None;
        }

        let new_children_ids: Vec<NodeId>;
        let old_children_ids: Vec<NodeId>;
        if same_parent {
            old_ids.insert(index.min(old_ids.len()), Some(node.id().clone()));
            if let Some(at) = old_ids.iter().position(Option::is_none) {
                old_ids.remove(at);
            }
            new_children_ids = old_ids.into_iter().flatten().collect();
            old_children_ids = Vec::new();
        } else {
            let mut ids = parent.children_ids();
            ids.insert(index.min(ids.len()), node.id().clone());
            new_children_ids = ids;
            if let Some(at) = old_ids.iter().position(Option::is_none) {
                old_ids.remove(at);
            }
            old_children_ids = old_ids.into_iter().flatten().collect();
        }

        // The node's new parent list must be persisted before anything else.
        node.save(NodeAttrs {
            parent_ids: Some(vec![parent.id().clone()]),
            ..Default::default()
        })
        .await?;

        // Renumber the new sibling list; the old parent's orders can wait
        // for the next operation that touches it.
        self.update_child_order(&new_children_ids).await?;

        let new_side = async {
            parent
                .save(NodeAttrs {
                    children_ids: Some(new_children_ids.clone()),
                    ..Default::default()
                })
                .await?;
            parent.fetch_children(true).await
        };
        let old_side = async {
            if same_parent {
                return Ok(());
            }
            old_parent
                .save(NodeAttrs {
                    children_ids: Some(old_children_ids.clone()),
                    ..Default::default()
                })
                .await?;
            old_parent.fetch_children(true).await
        };
        future::try_join(new_side, old_side).await?;
        Ok(())
    }

    /// Assign `order = position` for every id in `ids` and persist each
    /// assignment. Ids absent from the cache are skipped. The saves run
    /// concurrently; completion waits for all of them to settle.
    pub async fn update_child_order(&self, ids: &[NodeId]) -> Result<()> {
        let saves = ids.iter().enumerate().filter_map(|(position, id)| {
            let node = self.inner.cached_node(id)?;
            Some(async move {
                node.save(NodeAttrs {
                    order: Some(position as i64),
                    ..Default::default()
                })
                .await
            })
        });

        let results = future::join_all(saves).await;
        for result in results {
            result?;
        }
        Ok(())
    }

    /// Destroy a node remotely, evict it from the cache, and re-fetch its
    /// former parents to pick up the store's removal of the id from their
    /// child lists. Children are left as-is: no cascade.
    pub async fn delete_node(&self, node: &Arc<Node>) -> Result<()> {
        let parents = node.parents()?;
        self.inner.store.delete_node(node.id()).await?;
        tracing::info!("deleted node {}", node.id());

        // Emit before eviction so the forwarding subscriber still exists.
        node.events().emit(NotebookEvent::NodeDestroyed {
            node_id: node.id().clone(),
        });
        self.inner.evict(node.id());

        let results = future::join_all(parents.iter().map(|parent| parent.fetch())).await;
        for result in results {
            result?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Icon resolution
    // ------------------------------------------------------------------

    /// Notebook-relative path of a notebook-local icon file.
    pub fn icon_filename(basename: &str) -> String {
        format!("{}/{}/{}", NOTEBOOK_META_DIR, NOTEBOOK_ICON_DIR, basename)
    }

    /// Resolve the icon path for a node and icon kind, synchronously.
    ///
    /// Scans the resolver's candidate basenames in order. A committed
    /// resolution wins; an unseen candidate starts exactly one background
    /// lookup (committing the result and emitting `IconResolved`) and the
    /// call returns the default fallback path meanwhile; an in-flight
    /// candidate also returns the fallback without a duplicate lookup. Only
    /// candidates that committed as unresolvable are scanned past. If every
    /// candidate is unresolvable, the fixed "unknown" path is returned.
    pub fn node_icon(&self, node: &Arc<Node>, kind: &str) -> String {
        let mut kinds = self.inner.icons.candidate_basenames(node);
        let basenames = kinds.remove(kind).unwrap_or_default();

        let mut cache = self
            .inner
            .icon_cache
            .write()
            .unwrap_or_else(|e| e.into_inner());
        for basename in basenames {
            match cache.get(&basename) {
                Some(IconState::Resolved(path)) => return path.clone(),
                Some(IconState::Pending) => return Self::fallback_icon(&cache),
                Some(IconState::Unresolved) => continue,
                None => {
                    cache.insert(basename.clone(), IconState::Pending);
                    self.spawn_icon_lookup(basename);
                    return Self::fallback_icon(&cache);
                }
            }
        }

        UNKNOWN_ICON_PATH.to_string()
    }

    fn fallback_icon(cache: &HashMap<String, IconState>) -> String {
        match cache.get(DEFAULT_ICON) {
            Some(IconState::Resolved(path)) => path.clone(),
            _ => DEFAULT_ICON_PATH.to_string(),
        }
    }

    fn spawn_icon_lookup(&self, basename: String) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let resolved = inner.icons.lookup_filename(&basename).await;
            tracing::debug!("icon lookup {} -> {:?}", basename, resolved);
            let state = match resolved {
                Some(path) if !path.is_empty() => IconState::Resolved(path),
                _ => IconState::Unresolved,
            };
            inner
                .icon_cache
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .insert(basename.clone(), state);
            inner.events.emit(NotebookEvent::IconResolved { basename });
        });
    }
}
