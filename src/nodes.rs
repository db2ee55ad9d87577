//! Known-node directory used to resolve display names for position reports.

use crate::events::NodeId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Read-only name lookup consumed by the position handler.
pub trait NodeDirectory {
    /// Configured long name of `node`, or `None` when the node is unknown or has no name.
    fn long_name(&self, node: NodeId) -> Option<String>;
}

impl NodeDirectory for HashMap<NodeId, String> {
    fn long_name(&self, node: NodeId) -> Option<String> {
        self.get(&node)
            .map(|n| n.trim())
            .filter(|n| !n.is_empty())
            .map(str::to_string)
    }
}

/// Shared long-name table: written by the radio link, read by the handler.
#[derive(Debug, Clone, Default)]
pub struct NodeTable {
    inner: Arc<Mutex<HashMap<NodeId, String>>>,
}

impl NodeTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<NodeId, String>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or refresh a node. A blank name never overwrites one we already know.
    pub fn update(&self, node: NodeId, long_name: &str) {
        let mut nodes = self.lock();
        let entry = nodes.entry(node).or_default();
        let long_name = long_name.trim();
        if !long_name.is_empty() {
            *entry = long_name.to_string();
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl NodeDirectory for NodeTable {
    fn long_name(&self, node: NodeId) -> Option<String> {
        self.lock().long_name(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_names_do_not_clobber_known_names() {
        let table = NodeTable::new();
        table.update(0x1234, "Base Camp");
        table.update(0x1234, "  ");
        assert_eq!(table.len(), 1);
        assert_eq!(table.long_name(0x1234).as_deref(), Some("Base Camp"));
    }

    #[test]
    fn node_without_long_name_resolves_to_none() {
        let table = NodeTable::new();
        table.update(7, "");
        assert_eq!(table.len(), 1);
        assert_eq!(table.long_name(7), None);
        assert_eq!(table.long_name(8), None);
    }

    #[test]
    fn clones_share_the_same_table() {
        let table = NodeTable::new();
        let reader = table.clone();
        table.update(42, "Hilltop");
        assert_eq!(reader.long_name(42).as_deref(), Some("Hilltop"));
        assert!(!reader.is_empty());
    }

    #[test]
    fn hashmap_directory_trims_names() {
        let mut map = HashMap::new();
        map.insert(1u32, " Relay ".to_string());
        map.insert(2u32, "   ".to_string());
        assert_eq!(map.long_name(1).as_deref(), Some("Relay"));
        assert_eq!(map.long_name(2), None);
    }
}
