//! Node: one document in the notebook tree.
//!
//! A node's authoritative state is its attribute record, in particular the
//! `parentids`/`childrenids` lists. Object references to parents and
//! children are derived by resolving those ids through the notebook's
//! identity map, allocating unfetched placeholders as needed - that is how
//! the object graph grows transitively.

use crate::attrs::{NodeAttrs, NodeId};
use crate::events::{EventBus, NotebookEvent, Subscription};
use crate::file::{is_dir_path, File};
use crate::notebook::{NotebookError, NotebookInner, Result};
use crate::store::NodeStore;
use futures::future::{self, BoxFuture, FutureExt};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

/// Content type marking a node as a page.
pub const PAGE_CONTENT_TYPE: &str = "text/xhtml+xml";
/// Primary content file of a page node.
pub const PAGE_FILE: &str = "page.html";
/// Default attribute consulted by `fetch_expanded`.
pub const EXPAND_ATTR: &str = "expanded";

/// Per-node fetch state. `Fetched` is terminal for a fetch cycle; a re-fetch
/// resets to `Fetching`. A failed fetch stays at `Fetching` so a later
/// `ensure_fetched` can retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    Unfetched,
    Fetching,
    Fetched,
}

struct NodeState {
    attrs: NodeAttrs,
    fetch: FetchState,
    /// True once children have been sorted by `order` since the last
    /// structural change.
    ordered: bool,
}

/// One document: metadata, ordered children, parents, and a file tree.
pub struct Node {
    id: NodeId,
    notebook: Weak<NotebookInner>,
    store: Arc<dyn NodeStore>,
    events: Arc<EventBus>,
    state: RwLock<NodeState>,
    /// At most one `File` per path for the node's lifetime.
    files: RwLock<HashMap<String, Arc<File>>>,
}

impl Node {
    pub(crate) fn new(
        id: NodeId,
        notebook: Weak<NotebookInner>,
        store: Arc<dyn NodeStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            notebook,
            store,
            events: Arc::new(EventBus::new()),
            state: RwLock::new(NodeState {
                attrs: NodeAttrs::default(),
                fetch: FetchState::Unfetched,
                ordered: false,
            }),
            files: RwLock::new(HashMap::new()),
        })
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    /// This node's event bus. The notebook forwards everything emitted here
    /// onto its aggregate bus.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Subscribe to this node's events.
    pub fn subscribe(
        &self,
        callback: impl Fn(NotebookEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.events.subscribe(callback)
    }

    pub(crate) fn store(&self) -> &Arc<dyn NodeStore> {
        &self.store
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, NodeState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, NodeState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn inner(&self) -> Result<Arc<NotebookInner>> {
        self.notebook.upgrade().ok_or(NotebookError::Detached)
    }

    pub fn fetch_state(&self) -> FetchState {
        self.read_state().fetch
    }

    pub fn is_fetched(&self) -> bool {
        self.fetch_state() == FetchState::Fetched
    }

    pub fn is_ordered(&self) -> bool {
        self.read_state().ordered
    }

    /// Snapshot of the current attribute record.
    pub fn attrs(&self) -> NodeAttrs {
        self.read_state().attrs.clone()
    }

    pub fn title(&self) -> Option<String> {
        self.read_state().attrs.title.clone()
    }

    pub fn content_type(&self) -> Option<String> {
        self.read_state().attrs.content_type.clone()
    }

    pub fn order(&self) -> Option<i64> {
        self.read_state().attrs.order
    }

    pub fn payload_filename(&self) -> Option<String> {
        self.read_state().attrs.payload_filename.clone()
    }

    pub fn parent_ids(&self) -> Vec<NodeId> {
        self.read_state().attrs.parent_ids().to_vec()
    }

    pub fn children_ids(&self) -> Vec<NodeId> {
        self.read_state().attrs.children_ids().to_vec()
    }

    /// An extra attribute by name.
    pub fn attr(&self, name: &str) -> Option<serde_json::Value> {
        self.read_state().attrs.extra.get(name).cloned()
    }

    /// Truthiness of an extra attribute, for flags like `expanded`.
    pub fn flag(&self, name: &str) -> bool {
        self.read_state().attrs.flag(name)
    }

    pub fn is_page(&self) -> bool {
        self.content_type().as_deref() == Some(PAGE_CONTENT_TYPE)
    }

    /// Parent nodes, primary parent first. Derived from `parentids`.
    pub fn parents(&self) -> Result<Vec<Arc<Node>>> {
        let inner = self.inner()?;
        Ok(self
            .parent_ids()
            .iter()
            .map(|id| inner.get_node(id))
            .collect())
    }

    /// Child nodes in current id-list order. Derived from `childrenids`.
    pub fn children(&self) -> Result<Vec<Arc<Node>>> {
        let inner = self.inner()?;
        Ok(self
            .children_ids()
            .iter()
            .map(|id| inner.get_node(id))
            .collect())
    }

    /// Fetch this node's metadata from the store.
    pub async fn fetch(self: &Arc<Self>) -> Result<()> {
        self.write_state().fetch = FetchState::Fetching;
        tracing::debug!("fetching node {}", self.id);
        let record = self.store.read_node(&self.id).await?;
        self.apply_record(record, true);
        Ok(())
    }

    /// Fetch only if not already fetched. Issues zero store calls once
    /// `Fetched`; an in-flight fetch is not deduplicated.
    pub async fn ensure_fetched(self: &Arc<Self>) -> Result<()> {
        if self.is_fetched() {
            return Ok(());
        }
        self.fetch().await
    }

    /// Fetch every child in parallel, then sort them by `order`.
    pub async fn fetch_children(self: &Arc<Self>, refetch: bool) -> Result<()> {
        if refetch || !self.is_fetched() {
            self.fetch().await?;
        }

        let children = self.children()?;
        let results = future::join_all(children.iter().map(|child| child.fetch())).await;
        for result in results {
            result?;
        }

        self.order_children(true)
    }

    /// Recursively fetch this node and every descendant whose `expand_attr`
    /// is truthy. Each level is sorted only once its own fan-out settles.
    pub fn fetch_expanded<'a>(self: &'a Arc<Self>, expand_attr: &'a str) -> BoxFuture<'a, Result<()>> {
        async move {
            self.ensure_fetched().await?;

            if self.flag(expand_attr) {
                let children = self.children()?;
                let results = future::join_all(
                    children.iter().map(|child| child.fetch_expanded(expand_attr)),
                )
                .await;
                for result in results {
                    result?;
                }
                self.order_children(true)?;
            }
            Ok(())
        }
        .boxed()
    }

    /// Sort children ascending by `order` (stable, so ties keep their
    /// id-list position) and rewrite `childrenids` to match.
    pub fn order_children(&self, emit: bool) -> Result<()> {
        let inner = self.inner()?;
        self.sort_children(&inner, emit);
        Ok(())
    }

    fn sort_children(&self, inner: &Arc<NotebookInner>, emit: bool) {
        let ids = self.children_ids();
        let mut keyed: Vec<(NodeId, i64)> = ids
            .into_iter()
            .map(|id| {
                let order = inner.get_node(&id).order().unwrap_or(0);
                (id, order)
            })
            .collect();
        keyed.sort_by_key(|(_, order)| *order);

        {
            let mut state = self.write_state();
            state.attrs.children_ids = Some(keyed.into_iter().map(|(id, _)| id).collect());
            state.ordered = true;
        }

        if emit {
            self.emit(NotebookEvent::NodeChanged {
                node_id: self.id.clone(),
            });
        }
    }

    /// Walk the primary-parent chain; true if it reaches `ancestor`.
    pub fn is_descendant(self: &Arc<Self>, ancestor: &Arc<Node>) -> bool {
        let mut ptr = Arc::clone(self);
        loop {
            if Arc::ptr_eq(&ptr, ancestor) {
                return true;
            }
            let parent = match ptr.parents() {
                Ok(parents) => parents.into_iter().next(),
                Err(_) => return false,
            };
            match parent {
                Some(parent) => ptr = parent,
                None => return false,
            }
        }
    }

    /// Replace the attribute record with a store response and rebuild the
    /// derived parent/child state.
    pub(crate) fn apply_record(&self, record: NodeAttrs, mark_fetched: bool) {
        let (children_changed, parents_changed);
        {
            let mut state = self.write_state();
            children_changed = state.attrs.children_ids != record.children_ids;
            parents_changed = state.attrs.parent_ids != record.parent_ids;
            state.attrs = record;
            if mark_fetched {
                state.fetch = FetchState::Fetched;
            }
        }

        self.rebuild_children();

        if children_changed {
            self.emit(NotebookEvent::ChildrenChanged {
                node_id: self.id.clone(),
            });
        }
        if parents_changed {
            self.emit(NotebookEvent::ParentsChanged {
                node_id: self.id.clone(),
            });
        }
        self.emit(NotebookEvent::NodeChanged {
            node_id: self.id.clone(),
        });
    }

    /// Allocate placeholders for the current child ids and sort them if every
    /// child's `order` is already loaded; otherwise ordering is deferred to
    /// the next `fetch_children`/`fetch_expanded`.
    fn rebuild_children(&self) {
        let Some(inner) = self.notebook.upgrade() else {
            return;
        };

        let mut has_order_loaded = true;
        for id in self.children_ids() {
            let child = inner.get_node(&id);
            if child.order().is_none() {
                has_order_loaded = false;
            }
        }
        // Parents only need placeholders; they carry no order of ours.
        for id in self.parent_ids() {
            inner.get_node(&id);
        }

        if has_order_loaded {
            self.sort_children(&inner, false);
        } else {
            self.write_state().ordered = false;
        }
    }

    /// Persist the fields in `patch` and apply the store's updated record.
    pub(crate) async fn save(self: &Arc<Self>, patch: NodeAttrs) -> Result<()> {
        let updated = self.store.update_node(&self.id, &patch).await?;
        self.apply_record(updated, false);
        Ok(())
    }

    fn emit(&self, event: NotebookEvent) {
        self.events.emit(event);
    }

    // ------------------------------------------------------------------
    // File tree
    // ------------------------------------------------------------------

    /// The memoized `File` for a relative path. The empty path is the root
    /// directory of the node's file tree.
    pub fn get_file(self: &Arc<Self>, path: &str) -> Arc<File> {
        let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
        if let Some(file) = files.get(path) {
            return Arc::clone(file);
        }
        let file = File::new(Arc::downgrade(self), path);
        files.insert(path.to_string(), Arc::clone(&file));
        file
    }

    /// Root directory of this node's file tree.
    pub fn root_file(self: &Arc<Self>) -> Arc<File> {
        self.get_file("")
    }

    /// Relative path of the node's payload file, if any.
    pub fn payload_path(&self) -> Option<String> {
        self.payload_filename()
    }

    pub async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        if is_dir_path(path) {
            return Err(NotebookError::NotAFile(path.to_string()));
        }
        Ok(self.store.read_file(&self.id, path).await?)
    }

    pub async fn write_file(&self, path: &str, content: &[u8]) -> Result<()> {
        if is_dir_path(path) {
            return Err(NotebookError::NotAFile(path.to_string()));
        }
        Ok(self.store.write_file(&self.id, path, content).await?)
    }

    /// Existence check. Transport failures read as "not there".
    pub async fn has_file(&self, path: &str) -> bool {
        self.store.has_file(&self.id, path).await.unwrap_or(false)
    }

    pub async fn delete_file(&self, path: &str) -> Result<()> {
        self.store.delete_file(&self.id, path).await?;
        self.emit(NotebookEvent::FileChanged {
            node_id: self.id.clone(),
            path: path.to_string(),
        });
        Ok(())
    }
}
