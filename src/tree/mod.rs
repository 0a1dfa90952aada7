//! Lazily fetched remote folder hierarchy
//!
//! A tree starts from one root listing. Children of a node are fetched on
//! first access and cached for the lifetime of the tree; only an explicit
//! `refresh_children` fetches them again.

pub mod columns;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::api::SessionClient;
use crate::error::{Result, UploaderError};

pub use columns::{CellData, ColumnCache, ColumnSnapshot, Theme};

/// Parent id of the top-level nodes
pub const ROOT_ID: &str = "root";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Folder that holds galleries and other collections
    Collection,
    /// Leaf that holds images
    Gallery,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Collection => "collection",
            NodeKind::Gallery => "gallery",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    pub id: String,
    pub parent_id: String,
    pub kind: NodeKind,
    /// Name as sent by the server, still HTML-escaped
    pub name: String,
    pub display_name: String,
    pub listed: bool,
    pub visibility: String,
    pub description: String,
}

impl TreeNode {
    pub fn is_collection(&self) -> bool {
        self.kind == NodeKind::Collection
    }
}

pub(crate) fn sort_nodes(nodes: &mut [TreeNode]) {
    nodes.sort_by_cached_key(|n| n.display_name.to_lowercase());
}

/// Anything that can list the children of a node
pub trait ChildSource {
    fn fetch_children(&mut self, node_id: &str) -> Result<Vec<TreeNode>>;
}

impl ChildSource for SessionClient {
    fn fetch_children(&mut self, node_id: &str) -> Result<Vec<TreeNode>> {
        self.query_children(node_id)
    }
}

/// Client shared between the reconciler worker and the UI thread
pub type SharedSession = Arc<Mutex<SessionClient>>;

impl ChildSource for SharedSession {
    fn fetch_children(&mut self, node_id: &str) -> Result<Vec<TreeNode>> {
        let mut client = self
            .lock()
            .map_err(|_| UploaderError::Other("session lock poisoned".to_string()))?;
        client.query_children(node_id)
    }
}

/// One tree per reconciled organization, shared with the UI so lazily
/// fetched children stay cached across polls
pub type SharedTree = Arc<Mutex<CollectionTree>>;

/// Where uploads go, derived from the selected node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadTarget {
    pub collection_id: String,
    pub gallery_id: String,
}

/// Opaque cache state exchanged with the host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TreeSnapshot {
    pub nodes: Vec<TreeNode>,
    pub children: HashMap<String, Vec<String>>,
    pub selected: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CollectionTree {
    by_id: HashMap<String, TreeNode>,
    children: HashMap<String, Vec<String>>,
    top_listed: Vec<String>,
    top_unlisted: Vec<String>,
    selected: Option<String>,
}

impl CollectionTree {
    /// Build from the root listing.
    pub fn from_root(mut nodes: Vec<TreeNode>) -> Self {
        sort_nodes(&mut nodes);
        let mut tree = Self::default();
        tree.insert_children(ROOT_ID, nodes);
        tree.partition_top_level();
        tree
    }

    /// A tree with no folders, for contexts that cannot query them.
    pub fn empty() -> Self {
        Self::from_root(Vec::new())
    }

    fn insert_children(&mut self, parent_id: &str, nodes: Vec<TreeNode>) {
        let ids = nodes.iter().map(|n| n.id.clone()).collect();
        for node in nodes {
            self.by_id.insert(node.id.clone(), node);
        }
        self.children.insert(parent_id.to_string(), ids);
    }

    fn partition_top_level(&mut self) {
        let (listed, unlisted): (Vec<String>, Vec<String>) = self
            .children
            .get(ROOT_ID)
            .map(|ids| ids.as_slice())
            .unwrap_or_default()
            .iter()
            .cloned()
            .partition(|id| self.is_listed(id));
        self.top_listed = listed;
        self.top_unlisted = unlisted;
    }

    fn resolve(&self, ids: &[String]) -> Vec<TreeNode> {
        ids.iter().filter_map(|id| self.by_id.get(id)).cloned().collect()
    }

    /// Top-level nodes listed (or not) on the website. Never fetches.
    pub fn top_level(&self, listed: bool) -> Vec<TreeNode> {
        if listed {
            self.resolve(&self.top_listed)
        } else {
            self.resolve(&self.top_unlisted)
        }
    }

    /// Children of `node_id`, fetched from `source` on first access.
    pub fn children(&mut self, node_id: &str, source: &mut dyn ChildSource) -> Result<Vec<TreeNode>> {
        if let Some(ids) = self.children.get(node_id) {
            return Ok(self.resolve(ids));
        }
        self.fetch_into(node_id, source)
    }

    pub fn cached_children(&self, node_id: &str) -> Option<Vec<TreeNode>> {
        self.children.get(node_id).map(|ids| self.resolve(ids))
    }

    /// Drop the cached children of one node and fetch them again.
    pub fn refresh_children(&mut self, node_id: &str, source: &mut dyn ChildSource) -> Result<Vec<TreeNode>> {
        self.children.remove(node_id);
        let nodes = self.fetch_into(node_id, source)?;
        if node_id == ROOT_ID {
            self.partition_top_level();
        }
        Ok(nodes)
    }

    fn fetch_into(&mut self, node_id: &str, source: &mut dyn ChildSource) -> Result<Vec<TreeNode>> {
        let mut nodes = source.fetch_children(node_id)?;
        sort_nodes(&mut nodes);
        debug!(node_id = %node_id, count = nodes.len(), "Cached children");
        self.insert_children(node_id, nodes.clone());
        Ok(nodes)
    }

    pub fn get(&self, id: &str) -> Option<&TreeNode> {
        self.by_id.get(id)
    }

    pub fn is_listed(&self, id: &str) -> bool {
        self.by_id.get(id).map(|n| n.listed).unwrap_or(false)
    }

    /// Visibility mode of a node; unknown nodes are visible to everyone.
    pub fn visibility(&self, id: &str) -> &str {
        self.by_id
            .get(id)
            .map(|n| n.visibility.as_str())
            .unwrap_or("everyone")
    }

    fn top_level_names(&self, kind: NodeKind) -> Vec<String> {
        self.children
            .get(ROOT_ID)
            .map(|ids| self.resolve(ids))
            .unwrap_or_default()
            .into_iter()
            .filter(|n| n.kind == kind)
            .map(|n| n.display_name)
            .collect()
    }

    pub fn top_level_collection_names(&self) -> Vec<String> {
        self.top_level_names(NodeKind::Collection)
    }

    pub fn top_level_gallery_names(&self) -> Vec<String> {
        self.top_level_names(NodeKind::Gallery)
    }

    /// Mark a node as the current drill-down target. Unknown ids are ignored.
    pub fn select(&mut self, id: &str) -> bool {
        if self.by_id.contains_key(id) {
            self.selected = Some(id.to_string());
            true
        } else {
            false
        }
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    pub fn selected(&self) -> Option<&TreeNode> {
        self.selected.as_deref().and_then(|id| self.by_id.get(id))
    }

    /// A selected collection receives uploads itself (through its uploader
    /// gallery); a selected gallery receives them directly.
    pub fn upload_target(&self) -> UploadTarget {
        match self.selected() {
            Some(node) => match node.kind {
                NodeKind::Collection => UploadTarget {
                    collection_id: node.id.clone(),
                    gallery_id: String::new(),
                },
                NodeKind::Gallery => UploadTarget {
                    collection_id: String::new(),
                    gallery_id: node.id.clone(),
                },
            },
            None => UploadTarget::default(),
        }
    }

    pub fn export(&self) -> TreeSnapshot {
        let mut nodes: Vec<TreeNode> = self.by_id.values().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        TreeSnapshot {
            nodes,
            children: self.children.clone(),
            selected: self.selected.clone(),
        }
    }

    /// Rebuild from a snapshot. Node ids are trusted, not checked for staleness.
    pub fn import(snapshot: TreeSnapshot) -> Self {
        let mut tree = Self {
            children: snapshot.children,
            ..Self::default()
        };
        for node in snapshot.nodes {
            tree.by_id.insert(node.id.clone(), node);
        }
        tree.partition_top_level();
        if let Some(id) = snapshot.selected {
            tree.select(&id);
        }
        tree
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
