use std::cmp::Ordering;

use omni_store::UserRecord;

struct AvlNode {
    user: UserRecord,
    height: i32,
    left: Option<Box<AvlNode>>,
    right: Option<Box<AvlNode>>,
}

impl AvlNode {
    fn new(user: UserRecord) -> Self {
        Self {
            user,
            height: 1,
            left: None,
            right: None,
        }
    }
}

fn height(node: &Option<Box<AvlNode>>) -> i32 {
    node.as_ref().map_or(0, |n| n.height)
}

fn update_height(node: &mut AvlNode) {
    node.height = 1 + height(&node.left).max(height(&node.right));
}

fn balance_factor(node: &AvlNode) -> i32 {
    height(&node.left) - height(&node.right)
}

fn rotate_right(mut y: Box<AvlNode>) -> Box<AvlNode> {
    let mut x = y.left.take().expect("left-heavy node has a left child");
    y.left = x.right.take();
    update_height(&mut y);
    x.right = Some(y);
    update_height(&mut x);
    x
}

fn rotate_left(mut x: Box<AvlNode>) -> Box<AvlNode> {
    let mut y = x.right.take().expect("right-heavy node has a right child");
    x.right = y.left.take();
    update_height(&mut x);
    y.left = Some(x);
    update_height(&mut y);
    y
}

fn rebalance(mut node: Box<AvlNode>) -> Box<AvlNode> {
    update_height(&mut node);
    let bf = balance_factor(&node);
    if bf > 1 {
        if balance_factor(node.left.as_ref().expect("bf > 1 implies left child")) < 0 {
            let left = node.left.take().expect("bf > 1 implies left child");
            node.left = Some(rotate_left(left));
        }
        return rotate_right(node);
    }
    if bf < -1 {
        if balance_factor(node.right.as_ref().expect("bf < -1 implies right child")) > 0 {
            let right = node.right.take().expect("bf < -1 implies right child");
            node.right = Some(rotate_right(right));
        }
        return rotate_left(node);
    }
    node
}

fn insert_node(node: Option<Box<AvlNode>>, user: UserRecord, inserted: &mut bool) -> Box<AvlNode> {
    match node {
        None => {
            *inserted = true;
            Box::new(AvlNode::new(user))
        }
        Some(mut n) => {
            match user.username.cmp(&n.user.username) {
                Ordering::Less => n.left = Some(insert_node(n.left.take(), user, inserted)),
                Ordering::Greater => n.right = Some(insert_node(n.right.take(), user, inserted)),
                // Duplicate usernames keep the existing record.
                Ordering::Equal => return n,
            }
            rebalance(n)
        }
    }
}

/// Ordered map of users keyed by username. Lookup and insert are
/// logarithmic; enumeration is lexicographic. Deleting a user elsewhere only
/// flips its active flag, the node stays in the index.
#[derive(Default)]
pub struct UserIndex {
    root: Option<Box<AvlNode>>,
    len: usize,
}

impl UserIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns false when the username is already present (no overwrite).
    pub fn insert(&mut self, user: UserRecord) -> bool {
        let mut inserted = false;
        self.root = Some(insert_node(self.root.take(), user, &mut inserted));
        if inserted {
            self.len += 1;
        }
        inserted
    }

    pub fn get(&self, username: &str) -> Option<&UserRecord> {
        let mut node = self.root.as_deref();
        while let Some(n) = node {
            match username.cmp(n.user.username.as_str()) {
                Ordering::Less => node = n.left.as_deref(),
                Ordering::Greater => node = n.right.as_deref(),
                Ordering::Equal => return Some(&n.user),
            }
        }
        None
    }

    pub fn get_mut(&mut self, username: &str) -> Option<&mut UserRecord> {
        let mut node = self.root.as_deref_mut();
        while let Some(n) = node {
            match username.cmp(n.user.username.as_str()) {
                Ordering::Less => node = n.left.as_deref_mut(),
                Ordering::Greater => node = n.right.as_deref_mut(),
                Ordering::Equal => return Some(&mut n.user),
            }
        }
        None
    }

    /// In-order walk: users in lexicographic username order.
    pub fn users_in_order(&self) -> Vec<&UserRecord> {
        fn walk<'a>(node: &'a Option<Box<AvlNode>>, out: &mut Vec<&'a UserRecord>) {
            if let Some(n) = node {
                walk(&n.left, out);
                out.push(&n.user);
                walk(&n.right, out);
            }
        }
        let mut out = Vec::with_capacity(self.len);
        walk(&self.root, &mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omni_store::UserRole;

    fn user(name: &str) -> UserRecord {
        UserRecord::new(name, "hash", UserRole::Normal, 0)
    }

    #[test]
    fn test_insert_and_get() {
        let mut index = UserIndex::new();
        assert!(index.insert(user("carol")));
        assert!(index.insert(user("alice")));
        assert!(index.insert(user("bob")));

        assert_eq!(index.len(), 3);
        assert_eq!(index.get("alice").unwrap().username, "alice");
        assert!(index.get("dave").is_none());
    }

    #[test]
    fn test_duplicate_insert_keeps_existing_record() {
        let mut index = UserIndex::new();
        let mut original = user("alice");
        original.password_hash = "first".to_string();
        assert!(index.insert(original));

        let mut replacement = user("alice");
        replacement.password_hash = "second".to_string();
        assert!(!index.insert(replacement));

        assert_eq!(index.len(), 1);
        assert_eq!(index.get("alice").unwrap().password_hash, "first");
    }

    #[test]
    fn test_enumeration_is_lexicographic() {
        let mut index = UserIndex::new();
        for name in ["mallory", "admin", "zed", "bob", "alice"] {
            index.insert(user(name));
        }
        let names: Vec<&str> = index
            .users_in_order()
            .iter()
            .map(|u| u.username.as_str())
            .collect();
        assert_eq!(names, vec!["admin", "alice", "bob", "mallory", "zed"]);
    }

    #[test]
    fn test_sequential_inserts_stay_balanced() {
        // Ascending insertions degenerate a plain BST; the AVL keeps height
        // logarithmic, which we observe via the root height.
        let mut index = UserIndex::new();
        for i in 0..128 {
            index.insert(user(&format!("user{:03}", i)));
        }
        assert_eq!(index.len(), 128);
        assert!(index.root.as_ref().unwrap().height <= 9);

        for i in 0..128 {
            let name = format!("user{:03}", i);
            assert_eq!(index.get(&name).unwrap().username, name);
        }
    }

    #[test]
    fn test_get_mut_flips_active_flag() {
        let mut index = UserIndex::new();
        index.insert(user("alice"));

        index.get_mut("alice").unwrap().is_active = false;
        assert!(!index.get("alice").unwrap().is_active);
        assert_eq!(index.len(), 1);
    }
}
