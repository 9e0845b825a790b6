//! notebook: client-side cache and tree-mutation engine for a remote
//! notebook of hierarchical documents.
//!
//! This crate provides the core functionality for:
//! - Identity-mapped node caching (same id, same object)
//! - Lazy/partial fetch with a per-node fetch-state machine
//! - Ordering-preserving create/move/reorder across parents
//! - Per-node file trees with lazy directory listings
//! - The `NodeStore` and `IconResolver` trait abstractions
//!
//! The remote store is the single authority for ids and sibling order;
//! structural mutations run as sequential chains of dependent store calls,
//! while per-level child fetches fan out and wait for all.

pub mod attrs;
pub mod events;
pub mod file;
pub mod icons;
pub mod node;
pub mod notebook;
pub mod store;

pub use attrs::{NodeAttrs, NodeId};
pub use events::{EventBus, NotebookEvent, Subscription};
pub use file::File;
pub use icons::{IconResolver, IconState};
pub use node::{FetchState, Node, EXPAND_ATTR, PAGE_CONTENT_TYPE, PAGE_FILE};
pub use notebook::{MoveRequest, Notebook, NotebookError, Relation};
pub use store::{InMemoryStore, NodeStore, StoreError};
