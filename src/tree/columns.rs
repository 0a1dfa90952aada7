//! Column-indexed view over a `CollectionTree`
//!
//! Column 0 lists the top-level nodes; column n lists the children of the
//! node selected in column n-1. `path_cache` maps the path of a column
//! ("/", "/Alpha/", "/Alpha/Weddings/") to its row names. Changing a column
//! discards every column below it, in both `items` and `path_cache`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Result, UploaderError};

use super::{ChildSource, CollectionTree, NodeKind, TreeNode, TreeSnapshot, ROOT_ID};

pub const ROOT_PATH: &str = "/";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    fn color(&self, kind: NodeKind) -> u32 {
        match (self, kind) {
            (Theme::Light, NodeKind::Gallery) => 0x000000,
            (Theme::Light, NodeKind::Collection) => 0x333333,
            (Theme::Dark, NodeKind::Gallery) => 0xbbbbbb,
            (Theme::Dark, NodeKind::Collection) => 0xffffff,
        }
    }
}

/// How the browser widget should draw one row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CellData {
    pub text: String,
    pub is_leaf: bool,
    pub is_bold: bool,
    pub text_color: u32,
}

/// Saved browsing state, handed to the host as an opaque blob
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnSnapshot {
    pub columns: Vec<Vec<TreeNode>>,
    pub full_selpath: Vec<usize>,
    pub last_selected: Option<(usize, usize)>,
    pub listed: bool,
    pub tree: TreeSnapshot,
}

impl ColumnSnapshot {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ColumnCache {
    items: BTreeMap<usize, Vec<TreeNode>>,
    path_cache: BTreeMap<String, Vec<String>>,
    full_selpath: Vec<usize>,
    last_selected: Option<(usize, usize)>,
    listed: bool,
    theme: Theme,
}

fn path_segment(name: &str) -> String {
    name.replace('/', "%2F")
}

fn path_depth(path: &str) -> usize {
    path.matches('/').count().saturating_sub(1)
}

impl ColumnCache {
    pub fn new(listed: bool, theme: Theme) -> Self {
        Self {
            listed,
            theme,
            ..Self::default()
        }
    }

    pub fn listed(&self) -> bool {
        self.listed
    }

    pub fn set_theme(&mut self, theme: Theme) {
        self.theme = theme;
    }

    /// Forget every column.
    pub fn reset(&mut self) {
        self.items.clear();
        self.path_cache.clear();
        self.full_selpath.clear();
        self.last_selected = None;
    }

    /// Start over at column 0 with the tree's top-level nodes.
    pub fn load_root(&mut self, tree: &CollectionTree) {
        self.reset();
        self.setup_column(0, tree.top_level(self.listed), &[]);
    }

    /// Switch between website-listed and unlisted top-level nodes.
    pub fn set_listed(&mut self, listed: bool, tree: &CollectionTree) {
        self.listed = listed;
        self.load_root(tree);
    }

    /// Populate `column` with the children of the node `selpath` points at.
    /// Returns the number of rows.
    pub fn open(
        &mut self,
        column: usize,
        selpath: &[usize],
        tree: &mut CollectionTree,
        source: &mut dyn ChildSource,
    ) -> Result<usize> {
        if column == 0 {
            self.setup_column(0, tree.top_level(self.listed), &[]);
            return Ok(self.num_rows(0));
        }
        let row = *selpath.get(column - 1).ok_or_else(|| {
            UploaderError::NotFound(format!("no selection for column {}", column - 1))
        })?;
        let parent = self.node_at(column - 1, row)?.clone();
        let nodes = if parent.is_collection() {
            tree.children(&parent.id, source)?
        } else {
            Vec::new()
        };
        self.setup_column(column, nodes, &selpath[..column]);
        Ok(self.num_rows(column))
    }

    /// Select a row; a collection opens the next column.
    pub fn select(
        &mut self,
        column: usize,
        row: usize,
        tree: &mut CollectionTree,
        source: &mut dyn ChildSource,
    ) -> Result<()> {
        let node = self.node_at(column, row)?.clone();
        self.mark_selected(column, row, &node, tree);

        if node.is_collection() {
            let selpath = self.full_selpath.clone();
            self.open(column + 1, &selpath, tree, source)?;
        }
        Ok(())
    }

    fn mark_selected(&mut self, column: usize, row: usize, node: &TreeNode, tree: &mut CollectionTree) {
        self.full_selpath.truncate(column);
        self.full_selpath.push(row);
        self.last_selected = Some((column, row));
        self.drop_columns_from(column + 1);
        tree.select(&node.id);
    }

    /// After creating `new_id` under the node selected in `column - 1`,
    /// refetch that level and select the new row. Returns the row.
    pub fn splice_created(
        &mut self,
        column: usize,
        new_id: &str,
        tree: &mut CollectionTree,
        source: &mut dyn ChildSource,
    ) -> Result<usize> {
        let selpath: Vec<usize> = self.full_selpath.iter().copied().take(column).collect();
        if column == 0 {
            tree.refresh_children(ROOT_ID, source)?;
            self.setup_column(0, tree.top_level(self.listed), &[]);
        } else {
            let row = *selpath.get(column - 1).ok_or_else(|| {
                UploaderError::NotFound(format!("no selection for column {}", column - 1))
            })?;
            let parent = self.node_at(column - 1, row)?.clone();
            let nodes = tree.refresh_children(&parent.id, source)?;
            self.setup_column(column, nodes, &selpath);
        }

        let rows = self.rows(column);
        let new_row = rows.iter().position(|n| n.id == new_id).unwrap_or(0);
        if let Some(node) = rows.get(new_row).cloned() {
            self.full_selpath = selpath;
            self.mark_selected(column, new_row, &node, tree);
        }
        Ok(new_row)
    }

    fn setup_column(&mut self, column: usize, nodes: Vec<TreeNode>, selpath: &[usize]) {
        self.drop_columns_from(column);
        let path = self.path_of(&selpath[..column.min(selpath.len())]);
        let names = nodes.iter().map(|n| n.display_name.clone()).collect();
        self.path_cache.insert(path, names);
        self.items.insert(column, nodes);
        self.full_selpath.truncate(column);
    }

    fn drop_columns_from(&mut self, column: usize) {
        self.items.split_off(&column);
        self.path_cache.retain(|path, _| path_depth(path) < column);
    }

    fn node_at(&self, column: usize, row: usize) -> Result<&TreeNode> {
        self.items
            .get(&column)
            .and_then(|rows| rows.get(row))
            .ok_or_else(|| UploaderError::NotFound(format!("no row {} in column {}", row, column)))
    }

    /// Path string for a row-index path, built from cached names.
    fn path_of(&self, selpath: &[usize]) -> String {
        let mut path = ROOT_PATH.to_string();
        for &row in selpath {
            let name = self
                .path_cache
                .get(&path)
                .and_then(|names| names.get(row))
                .map(|n| path_segment(n))
                .unwrap_or_else(|| "?".to_string());
            path.push_str(&name);
            path.push('/');
        }
        path
    }

    /// Path of `column` under the current selection.
    pub fn path_for(&self, column: usize) -> Option<String> {
        if column > self.full_selpath.len() {
            return None;
        }
        Some(self.path_of(&self.full_selpath[..column]))
    }

    pub fn num_rows(&self, column: usize) -> usize {
        self.path_for(column)
            .and_then(|path| self.path_cache.get(&path))
            .map(|names| names.len())
            .unwrap_or(0)
    }

    pub fn rows(&self, column: usize) -> &[TreeNode] {
        self.items.get(&column).map(|rows| rows.as_slice()).unwrap_or(&[])
    }

    pub fn num_columns(&self) -> usize {
        self.items.len()
    }

    pub fn cell(&self, column: usize, row: usize) -> Option<CellData> {
        let node = self.items.get(&column)?.get(row)?;
        let collection = node.is_collection();
        Some(CellData {
            text: node.display_name.clone(),
            is_leaf: !collection,
            is_bold: collection,
            text_color: self.theme.color(node.kind),
        })
    }

    pub fn full_selpath(&self) -> &[usize] {
        &self.full_selpath
    }

    pub fn last_selected(&self) -> Option<(usize, usize)> {
        self.last_selected
    }

    pub fn export(&self, tree: &CollectionTree) -> ColumnSnapshot {
        ColumnSnapshot {
            columns: self.items.values().cloned().collect(),
            full_selpath: self.full_selpath.clone(),
            last_selected: self.last_selected,
            listed: self.listed,
            tree: tree.export(),
        }
    }

    /// Rebuild columns from a snapshot without touching the network and
    /// return the restored tree. Each column is replayed from the tree's
    /// cached children, falling back to the saved rows.
    pub fn restore(&mut self, snapshot: ColumnSnapshot) -> CollectionTree {
        let mut tree = CollectionTree::import(snapshot.tree);
        self.reset();
        self.listed = snapshot.listed;

        let saved = snapshot.columns;
        self.setup_column(0, tree.top_level(self.listed), &[]);
        for (column, &row) in snapshot.full_selpath.iter().enumerate() {
            let Ok(node) = self.node_at(column, row).cloned() else {
                break;
            };
            self.mark_selected(column, row, &node, &mut tree);
            if !node.is_collection() {
                break;
            }
            let children = tree
                .cached_children(&node.id)
                .or_else(|| saved.get(column + 1).cloned());
            match children {
                Some(nodes) => {
                    let selpath = self.full_selpath.clone();
                    self.setup_column(column + 1, nodes, &selpath);
                    self.full_selpath = selpath;
                }
                None => break,
            }
        }

        let reselect = snapshot
            .last_selected
            .filter(|&(column, row)| self.node_at(column, row).is_ok());
        match reselect {
            Some((column, row)) => {
                self.last_selected = Some((column, row));
                if let Ok(node) = self.node_at(column, row) {
                    let id = node.id.clone();
                    tree.select(&id);
                }
            }
            None => {
                if let Ok(node) = self.node_at(0, 0).cloned() {
                    self.mark_selected(0, 0, &node, &mut tree);
                    if let Some(children) = tree.cached_children(&node.id).filter(|_| node.is_collection()) {
                        self.setup_column(1, children, &[0]);
                        self.full_selpath = vec![0];
                    }
                }
            }
        }
        tree
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{node, ScriptedSource};

    fn fixture() -> (CollectionTree, ScriptedSource) {
        let tree = CollectionTree::from_root(vec![
            node("C1", ROOT_ID, NodeKind::Collection, "Alpha", true),
            node("G1", ROOT_ID, NodeKind::Gallery, "Beta", true),
            node("G0", ROOT_ID, NodeKind::Gallery, "Hidden", false),
        ]);
        let mut source = ScriptedSource::default();
        source.set(
            "C1",
            vec![
                node("C2", "C1", NodeKind::Collection, "Events", true),
                node("G2", "C1", NodeKind::Gallery, "Archive", true),
            ],
        );
        source.set(
            "C2",
            vec![
                node("G3", "C2", NodeKind::Gallery, "Wedding", true),
                node("G4", "C2", NodeKind::Gallery, "Birthday", true),
            ],
        );
        (tree, source)
    }

    fn ids(rows: &[TreeNode]) -> Vec<String> {
        rows.iter().map(|n| n.id.clone()).collect()
    }

    #[test]
    fn test_column_zero_follows_listed_flag() {
        let (tree, _) = fixture();
        let mut cache = ColumnCache::new(true, Theme::Light);
        cache.load_root(&tree);
        assert_eq!(ids(cache.rows(0)), vec!["C1", "G1"]);
        assert_eq!(cache.num_rows(0), 2);

        cache.set_listed(false, &tree);
        assert_eq!(ids(cache.rows(0)), vec!["G0"]);
        assert_eq!(cache.num_columns(), 1);
    }

    #[test]
    fn test_select_collection_opens_next_column() {
        let (mut tree, mut source) = fixture();
        let mut cache = ColumnCache::new(true, Theme::Light);
        cache.load_root(&tree);

        cache.select(0, 0, &mut tree, &mut source).unwrap();
        assert_eq!(ids(cache.rows(1)), vec!["G2", "C2"]);
        assert_eq!(cache.path_for(1).as_deref(), Some("/Alpha/"));
        assert_eq!(cache.num_rows(1), 2);

        cache.select(1, 1, &mut tree, &mut source).unwrap();
        assert_eq!(ids(cache.rows(2)), vec!["G4", "G3"]);
        assert_eq!(cache.full_selpath(), &[0, 1]);
        assert_eq!(cache.path_for(2).as_deref(), Some("/Alpha/Events/"));
        assert_eq!(tree.selected().unwrap().id, "C2");
    }

    #[test]
    fn test_reselecting_shallower_column_drops_deeper_ones() {
        let (mut tree, mut source) = fixture();
        let mut cache = ColumnCache::new(true, Theme::Light);
        cache.load_root(&tree);
        cache.select(0, 0, &mut tree, &mut source).unwrap();
        cache.select(1, 1, &mut tree, &mut source).unwrap();

        cache.select(0, 1, &mut tree, &mut source).unwrap();
        assert_eq!(cache.num_columns(), 1);
        assert_eq!(cache.num_rows(1), 0);
        assert_eq!(cache.full_selpath(), &[1]);
        assert_eq!(cache.last_selected(), Some((0, 1)));
        assert_eq!(tree.upload_target().gallery_id, "G1");
    }

    #[test]
    fn test_cells_use_theme_colors() {
        let (tree, _) = fixture();
        let mut cache = ColumnCache::new(true, Theme::Dark);
        cache.load_root(&tree);

        let collection = cache.cell(0, 0).unwrap();
        assert_eq!(collection.text, "Alpha");
        assert!(collection.is_bold);
        assert!(!collection.is_leaf);
        assert_eq!(collection.text_color, 0xffffff);

        let gallery = cache.cell(0, 1).unwrap();
        assert!(gallery.is_leaf);
        assert_eq!(gallery.text_color, 0xbbbbbb);
        assert!(cache.cell(0, 9).is_none());
    }

    #[test]
    fn test_snapshot_round_trip_without_network() {
        let (mut tree, mut source) = fixture();
        let mut cache = ColumnCache::new(true, Theme::Light);
        cache.load_root(&tree);
        cache.select(0, 0, &mut tree, &mut source).unwrap();
        cache.select(1, 1, &mut tree, &mut source).unwrap();
        cache.select(2, 0, &mut tree, &mut source).unwrap();
        let calls_before = source.calls.len();

        let json = cache.export(&tree).to_json().unwrap();
        let mut restored = ColumnCache::new(false, Theme::Light);
        let mut restored_tree = restored.restore(ColumnSnapshot::from_json(&json).unwrap());

        for column in 0..3 {
            assert_eq!(ids(restored.rows(column)), ids(cache.rows(column)));
            assert_eq!(restored.path_for(column), cache.path_for(column));
        }
        assert_eq!(restored.last_selected(), Some((2, 0)));
        assert_eq!(restored_tree.selected().unwrap().id, "G4");

        let mut offline = ScriptedSource::default();
        restored.select(2, 0, &mut restored_tree, &mut offline).unwrap();
        assert_eq!(ids(restored.rows(2)), ids(cache.rows(2)));
        assert!(offline.calls.is_empty());
        assert_eq!(source.calls.len(), calls_before);
    }

    #[test]
    fn test_restore_falls_back_to_first_row() {
        let (tree, _) = fixture();
        let mut snapshot = ColumnSnapshot {
            listed: true,
            tree: tree.export(),
            ..ColumnSnapshot::default()
        };
        snapshot.last_selected = Some((4, 2));

        let mut cache = ColumnCache::new(true, Theme::Light);
        let restored_tree = cache.restore(snapshot);

        assert_eq!(cache.last_selected(), Some((0, 0)));
        assert_eq!(restored_tree.selected().unwrap().id, "C1");
    }

    #[test]
    fn test_splice_created_selects_new_node() {
        let (mut tree, mut source) = fixture();
        let mut cache = ColumnCache::new(true, Theme::Light);
        cache.load_root(&tree);
        cache.select(0, 0, &mut tree, &mut source).unwrap();

        source.set(
            "C1",
            vec![
                node("C2", "C1", NodeKind::Collection, "Events", true),
                node("G2", "C1", NodeKind::Gallery, "Archive", true),
                node("G9", "C1", NodeKind::Gallery, "Brand New", true),
            ],
        );
        let row = cache.splice_created(1, "G9", &mut tree, &mut source).unwrap();

        assert_eq!(row, 1);
        assert_eq!(ids(cache.rows(1)), vec!["G2", "G9", "C2"]);
        assert_eq!(cache.last_selected(), Some((1, 1)));
        assert_eq!(cache.full_selpath(), &[0, 1]);
        assert_eq!(tree.selected().unwrap().id, "G9");
    }

    #[test]
    fn test_open_requires_parent_row() {
        let (mut tree, mut source) = fixture();
        let mut cache = ColumnCache::new(true, Theme::Light);
        cache.load_root(&tree);
        assert!(cache.open(1, &[7], &mut tree, &mut source).is_err());
    }
}
