use thiserror::Error;

use crate::error;

use super::btree::{BTree, ROOT_PAGE};
use super::node::{Node, OrderError};
use super::pager::{PageId, PageStore};

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("page {page}: key {index} is out of order")]
    KeyOutOfOrder { page: PageId, index: usize },

    #[error("page {page}: key outside the bounds set by its parent")]
    KeyOutOfBounds { page: PageId },

    #[error("page {page}: {keys} keys, need at least {min}")]
    Underflow { page: PageId, keys: usize, min: usize },

    #[error("page {page}: {keys} keys, at most {max} allowed")]
    Overflow { page: PageId, keys: usize, max: usize },

    #[error("page {page}: {children} children for {keys} keys")]
    ChildCount {
        page: PageId,
        keys: usize,
        children: usize,
    },

    #[error("page {page}: key without values")]
    DeadKey { page: PageId },

    #[error("page {page} is stored under id {stored}")]
    WrongId { page: PageId, stored: PageId },

    #[error("leaves at different depths")]
    Imbalance,

    #[error(transparent)]
    Storage(#[from] error::Error),
}

struct Bounds<'a> {
    lower: Option<&'a [u8]>,
    upper: Option<&'a [u8]>,
}

impl Bounds<'_> {
    fn contains(&self, k: &[u8]) -> bool {
        self.lower.map_or(true, |lower| lower < k) && self.upper.map_or(true, |upper| k < upper)
    }
}

fn verify_node<S: PageStore>(
    tree: &BTree<S>,
    page_idx: PageId,
    bounds: Bounds<'_>,
) -> Result<usize, VerifyError> {
    let node: Node = tree.load(page_idx)?;
    let page = page_idx;
    let t = tree.order();

    if node.id != page_idx {
        return Err(VerifyError::WrongId {
            page,
            stored: node.id,
        });
    }

    node.verify_key_ordering().map_err(|e| match e {
        OrderError::KeyOutOfOrder(index) => VerifyError::KeyOutOfOrder { page, index },
    })?;

    let keys = node.num_keys();
    if keys > 2 * t - 1 {
        return Err(VerifyError::Overflow {
            page,
            keys,
            max: 2 * t - 1,
        });
    }
    if page_idx != ROOT_PAGE && keys < t - 1 {
        return Err(VerifyError::Underflow {
            page,
            keys,
            min: t - 1,
        });
    }

    for key in &node.keys {
        if key.is_dead() {
            return Err(VerifyError::DeadKey { page });
        }
        if !bounds.contains(&key.k) {
            return Err(VerifyError::KeyOutOfBounds { page });
        }
    }

    if node.leaf {
        if !node.children.is_empty() {
            return Err(VerifyError::ChildCount {
                page,
                keys,
                children: node.children.len(),
            });
        }
        return Ok(0);
    }

    if node.children.len() != keys + 1 {
        return Err(VerifyError::ChildCount {
            page,
            keys,
            children: node.children.len(),
        });
    }

    // each child sits between the keys either side of its edge
    let mut levels = vec![];
    for (edge, &child) in node.children.iter().enumerate() {
        let lower = match edge {
            0 => bounds.lower,
            _ => Some(node.keys[edge - 1].k.as_slice()),
        };
        let upper = match node.keys.get(edge) {
            Some(key) => Some(key.k.as_slice()),
            None => bounds.upper,
        };
        levels.push(verify_node(tree, child, Bounds { lower, upper })?);
    }

    let first_level = levels[0];
    if levels.iter().any(|&level| level != first_level) {
        // found at least one edge with a different level to the first edge
        return Err(VerifyError::Imbalance);
    }

    Ok(first_level + 1)
}

/// Walk the whole tree from the root checking the btree invariants. Returns nothing on success
/// and the first problem found otherwise.
pub fn verify<S: PageStore>(tree: &BTree<S>) -> Result<(), VerifyError> {
    verify_node(
        tree,
        ROOT_PAGE,
        Bounds {
            lower: None,
            upper: None,
        },
    )?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::VerifyError;
    use crate::storage::node::{Key, Node};
    use crate::storage::{BTree, MemoryPager, PageStore};

    fn tree_with_root(root: Node, children: Vec<Node>) -> BTree<MemoryPager> {
        let mut store = MemoryPager::new();
        store.write_to(0, &root.encode().unwrap()).unwrap();
        for child in children {
            store.write_to(child.id, &child.encode().unwrap()).unwrap();
        }
        BTree::with_store(store, 2).unwrap()
    }

    fn leaf(id: u64, keys: &[&str]) -> Node {
        let mut node = Node::new_leaf(id);
        node.keys = keys.iter().map(|k| Key::new(k.as_bytes(), b"v")).collect();
        node
    }

    fn interior(keys: &[&str], children: Vec<u64>) -> Node {
        let mut node = leaf(0, keys);
        node.leaf = false;
        node.children = children;
        node
    }

    #[test]
    fn accepts_valid_tree() {
        let tree = tree_with_root(
            interior(&["m"], vec![1, 2]),
            vec![leaf(1, &["a", "b"]), leaf(2, &["n", "z"])],
        );
        tree.verify().unwrap();
    }

    #[test]
    fn rejects_key_on_wrong_side() {
        let tree = tree_with_root(
            interior(&["m"], vec![1, 2]),
            vec![leaf(1, &["a", "q"]), leaf(2, &["n", "z"])],
        );
        assert!(matches!(
            tree.verify(),
            Err(VerifyError::KeyOutOfBounds { page: 1 })
        ));
    }

    #[test]
    fn rejects_missing_child() {
        let tree = tree_with_root(interior(&["m"], vec![1]), vec![leaf(1, &["a"])]);
        assert!(matches!(
            tree.verify(),
            Err(VerifyError::ChildCount { page: 0, .. })
        ));
    }

    #[test]
    fn rejects_underflow_and_overflow() {
        let tree = tree_with_root(
            interior(&["m"], vec![1, 2]),
            vec![leaf(1, &[]), leaf(2, &["n"])],
        );
        assert!(matches!(
            tree.verify(),
            Err(VerifyError::Underflow { page: 1, .. })
        ));

        let tree = tree_with_root(leaf(0, &["a", "b", "c", "d"]), vec![]);
        assert!(matches!(
            tree.verify(),
            Err(VerifyError::Overflow { page: 0, .. })
        ));
    }

    #[test]
    fn rejects_imbalance() {
        let tree = tree_with_root(
            interior(&["m"], vec![1, 2]),
            vec![
                leaf(1, &["a"]),
                Node {
                    id: 2,
                    keys: vec![Key::new(b"p", b"v")],
                    children: vec![3, 4],
                    leaf: false,
                },
                leaf(3, &["n"]),
                leaf(4, &["q"]),
            ],
        );
        assert!(matches!(tree.verify(), Err(VerifyError::Imbalance)));
    }
}
