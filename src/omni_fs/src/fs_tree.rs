use omni_store::{DirEntry, EntryType};

pub type NodeId = usize;

/// One directory-tree node. Children are owned by the arena; `parent` is a
/// non-owning index used for ascent during removal.
#[derive(Debug)]
pub struct FsNode {
    pub entry: DirEntry,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

/// N-ary tree over directory entries, backed by an arena of slots so parent
/// links stay plain indices. Inodes are assigned from a tree-wide counter
/// starting at 1; the root keeps whatever inode its entry carries.
pub struct FsTree {
    nodes: Vec<Option<FsNode>>,
    free: Vec<NodeId>,
    root: NodeId,
    next_inode: u32,
}

impl FsTree {
    pub fn new(root_entry: DirEntry) -> Self {
        let root_node = FsNode {
            entry: root_entry,
            parent: None,
            children: Vec::new(),
        };
        Self {
            nodes: vec![Some(root_node)],
            free: Vec::new(),
            root: 0,
            next_inode: 1,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&FsNode> {
        self.nodes.get(id).and_then(|slot| slot.as_ref())
    }

    pub fn entry(&self, id: NodeId) -> Option<&DirEntry> {
        self.node(id).map(|n| &n.entry)
    }

    pub fn find_child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        let parent = self.node(parent)?;
        parent
            .children
            .iter()
            .copied()
            .find(|&id| self.node(id).map(|n| n.entry.name == name).unwrap_or(false))
    }

    /// Walk `path` from the root, splitting on `/` and skipping empty
    /// segments; `/`, the empty path, and repeated slashes all land on the
    /// nearest real node.
    pub fn resolve(&self, path: &str) -> Option<NodeId> {
        let mut current = self.root;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = self.find_child(current, segment)?;
        }
        Some(current)
    }

    /// Link `entry` as a child of `parent`, assigning a fresh inode and the
    /// parent's inode as `parent_inode`. Returns `None` when a sibling of
    /// the same name exists.
    pub fn add_child(&mut self, parent: NodeId, mut entry: DirEntry) -> Option<NodeId> {
        self.node(parent)?;
        if self.find_child(parent, &entry.name).is_some() {
            return None;
        }

        entry.inode = self.next_inode;
        self.next_inode += 1;
        entry.parent_inode = self
            .node(parent)
            .map(|n| n.entry.inode)
            .unwrap_or_default();

        let node = FsNode {
            entry,
            parent: Some(parent),
            children: Vec::new(),
        };
        let id = match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(node);
                slot
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        };
        if let Some(Some(parent_node)) = self.nodes.get_mut(parent) {
            parent_node.children.push(id);
        }
        Some(id)
    }

    /// Detach and drop the named child. Refuses directories that still have
    /// children and names that do not exist.
    pub fn remove_child(&mut self, parent: NodeId, name: &str) -> bool {
        let Some(child) = self.find_child(parent, name) else {
            return false;
        };
        let child_node = match self.node(child) {
            Some(n) => n,
            None => return false,
        };
        if child_node.entry.is_dir() && !child_node.children.is_empty() {
            return false;
        }

        if let Some(Some(parent_node)) = self.nodes.get_mut(parent) {
            parent_node.children.retain(|&id| id != child);
        }
        self.nodes[child] = None;
        self.free.push(child);
        true
    }

    /// Child entries of the directory at `path`; empty when the path is
    /// missing or not a directory.
    pub fn list(&self, path: &str) -> Vec<DirEntry> {
        let Some(id) = self.resolve(path) else {
            return Vec::new();
        };
        let Some(node) = self.node(id) else {
            return Vec::new();
        };
        if !node.entry.is_dir() {
            return Vec::new();
        }
        node.children
            .iter()
            .filter_map(|&child| self.entry(child).cloned())
            .collect()
    }

    /// Count of files and directories in the whole tree. The root itself is
    /// not counted as a directory.
    pub fn count_entries(&self) -> (u64, u64) {
        let mut files = 0u64;
        let mut dirs = 0u64;
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            let Some(node) = self.node(id) else {
                continue;
            };
            if id != self.root {
                match node.entry.entry_type {
                    EntryType::Directory => dirs += 1,
                    EntryType::File => files += 1,
                }
            }
            stack.extend_from_slice(&node.children);
        }
        (files, dirs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root_entry() -> DirEntry {
        let mut entry = DirEntry::new("/", EntryType::Directory, 0, 0o755, "admin");
        entry.start_block = 2;
        entry
    }

    fn dir(name: &str) -> DirEntry {
        DirEntry::new(name, EntryType::Directory, 0, 0o755, "admin")
    }

    fn file(name: &str, size: u64) -> DirEntry {
        DirEntry::new(name, EntryType::File, size, 0o600, "admin")
    }

    fn sample_tree() -> FsTree {
        let mut tree = FsTree::new(root_entry());
        let home = tree.add_child(tree.root(), dir("home")).unwrap();
        let alice = tree.add_child(home, dir("alice")).unwrap();
        tree.add_child(alice, file("note.txt", 5)).unwrap();
        tree
    }

    #[test]
    fn test_resolve_walks_segments() {
        let tree = sample_tree();

        assert_eq!(tree.resolve("/"), Some(tree.root()));
        assert_eq!(tree.resolve(""), Some(tree.root()));

        let alice = tree.resolve("/home/alice").unwrap();
        assert_eq!(tree.entry(alice).unwrap().name, "alice");

        // Repeated and trailing slashes collapse.
        assert_eq!(tree.resolve("//home//alice/"), Some(alice));
        assert!(tree.resolve("/home/bob").is_none());
        assert!(tree.resolve("/home/alice/note.txt/deeper").is_none());
    }

    #[test]
    fn test_add_child_assigns_inodes() {
        let mut tree = FsTree::new(root_entry());
        let home = tree.add_child(tree.root(), dir("home")).unwrap();
        let docs = tree.add_child(home, dir("docs")).unwrap();

        assert_eq!(tree.entry(home).unwrap().inode, 1);
        assert_eq!(tree.entry(docs).unwrap().inode, 2);
        assert_eq!(
            tree.entry(docs).unwrap().parent_inode,
            tree.entry(home).unwrap().inode
        );
    }

    #[test]
    fn test_add_child_rejects_duplicate_name() {
        let mut tree = FsTree::new(root_entry());
        let home = tree.add_child(tree.root(), dir("home")).unwrap();
        assert!(tree.add_child(home, file("x", 0)).is_some());
        assert!(tree.add_child(home, file("x", 0)).is_none());
        assert_eq!(tree.list("/home").len(), 1);
    }

    #[test]
    fn test_remove_child_refuses_non_empty_directory() {
        let mut tree = sample_tree();
        let home = tree.resolve("/home").unwrap();

        assert!(!tree.remove_child(tree.root(), "home"));
        assert!(tree.remove_child(tree.resolve("/home/alice").unwrap(), "note.txt"));
        assert!(tree.remove_child(home, "alice"));
        assert!(tree.resolve("/home/alice").is_none());
    }

    #[test]
    fn test_removed_slots_are_reused_with_fresh_inodes() {
        let mut tree = sample_tree();
        let alice = tree.resolve("/home/alice").unwrap();
        assert!(tree.remove_child(alice, "note.txt"));

        let readme = tree.add_child(alice, file("readme", 1)).unwrap();
        // The arena slot is recycled but the inode is not.
        assert_eq!(tree.entry(readme).unwrap().inode, 4);
        assert_eq!(tree.resolve("/home/alice/readme"), Some(readme));
    }

    #[test]
    fn test_list_and_counts() {
        let tree = sample_tree();

        let names: Vec<String> = tree.list("/").iter().map(|e| e.name.clone()).collect();
        assert_eq!(names, vec!["home"]);
        assert!(tree.list("/home/alice/note.txt").is_empty());
        assert!(tree.list("/nope").is_empty());

        let (files, dirs) = tree.count_entries();
        assert_eq!(files, 1);
        assert_eq!(dirs, 2);
    }
}
