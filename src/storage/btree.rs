use std::cmp::Ordering;
use std::fmt::Display;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::error::{Error, Result};

use super::btree_verify::{self, VerifyError};
use super::node::{Key, Node, SearchResult};
use super::pager::{PageId, PageStore, Pager, PagerOptions};
use super::btree_graph;

/// The root node never moves off this page
pub const ROOT_PAGE: PageId = 0;

/// A btree handle that several threads can share. All access goes through the one lock, which
/// is what makes multi page mutations (splits, merges) safe to run concurrently.
pub type SharedTree<S = Pager> = Arc<Mutex<BTree<S>>>;

/// Multiway search tree of order `t` whose nodes live on pages of a [`PageStore`].
///
/// Every node holds at most `2t - 1` keys and every node but the root at least `t - 1`. Keys
/// compare as raw bytes and each carries an ordered list of values. Each mutation rewrites the
/// nodes it touches straight away; nothing is cached between calls, and nothing makes a
/// multi page change atomic.
#[derive(Debug)]
pub struct BTree<S = Pager> {
    store: S,
    order: usize,
}

impl BTree<Pager> {
    pub fn open(path: impl AsRef<Path>, options: &PagerOptions, order: usize) -> Result<Self> {
        let pager = Pager::open(path, options)?;
        BTree::with_store(pager, order)
    }

    pub fn close(self) -> Result<()> {
        self.store.close()
    }
}

impl<S: PageStore> BTree<S> {
    pub fn with_store(mut store: S, order: usize) -> Result<Self> {
        if order < 2 {
            return Err(Error::InvalidOrder(order));
        }

        if store.count()? == 0 {
            let root = Node::new_leaf(ROOT_PAGE);
            store.write_to(ROOT_PAGE, &root.encode()?)?;
            debug!("initialised empty tree of order {order}");
        }

        Ok(BTree { store, order })
    }

    pub fn into_shared(self) -> SharedTree<S> {
        Arc::new(Mutex::new(self))
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    fn max_keys(&self) -> usize {
        2 * self.order - 1
    }

    pub(crate) fn load(&self, page_idx: PageId) -> Result<Node> {
        Node::decode(&self.store.get_page(page_idx)?)
    }

    fn save(&mut self, node: &Node) -> Result<()> {
        self.store.write_to(node.id, &node.encode()?)
    }

    /// Write a brand new node to a fresh page
    fn allocate(&mut self, keys: Vec<Key>, children: Vec<PageId>, leaf: bool) -> Result<Node> {
        let id = self.store.write(&[])?;
        let node = Node {
            id,
            keys,
            children,
            leaf,
        };
        self.save(&node)?;
        Ok(node)
    }

    /// Look up a key and every value stored under it
    pub fn get(&self, key: &[u8]) -> Result<Option<Key>> {
        let mut page_idx = ROOT_PAGE;

        loop {
            let mut node = self.load(page_idx)?;
            match node.search(key) {
                SearchResult::Found(index) => {
                    let found = node.keys.swap_remove(index);
                    return Ok(Some(found).filter(|k| !k.is_dead()));
                }
                SearchResult::NotPresent(_) => return Ok(None),
                SearchResult::GoDown(child_index) => page_idx = node.children[child_index],
            }
        }
    }

    /// Add `value` under `key`. A key that already exists gets the value appended to its list.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut root = self.load(ROOT_PAGE)?;

        if root.num_keys() == self.max_keys() {
            // The root has to stay on page zero: move its content to a fresh page and make
            // page zero the parent of that page before splitting it.
            let old_root = self.allocate(root.keys, root.children, root.leaf)?;
            root = Node {
                id: ROOT_PAGE,
                keys: vec![],
                children: vec![old_root.id],
                leaf: false,
            };
            self.split_child(&mut root, 0, old_root)?;
            debug!("root split, tree grew a level");
        }

        self.insert_nonfull(root, key, value)
    }

    /// Split the full `child` found at `child_index` of `parent`, promoting its median into
    /// `parent`. All three nodes are written out.
    fn split_child(&mut self, parent: &mut Node, child_index: usize, mut child: Node) -> Result<()> {
        let (median, right_keys, right_children) = child.split(self.order);
        let sibling = self.allocate(right_keys, right_children, child.leaf)?;

        debug!(
            "split page {} at child {} of {}, new sibling {}",
            child.id, child_index, parent.id, sibling.id
        );

        parent.keys.insert(child_index, median);
        parent.children.insert(child_index + 1, sibling.id);

        self.save(&child)?;
        self.save(parent)
    }

    fn insert_nonfull(&mut self, mut node: Node, key: &[u8], value: &[u8]) -> Result<()> {
        loop {
            match node.search(key) {
                SearchResult::Found(index) => {
                    node.keys[index].v.push(value.to_vec());
                    return self.save(&node);
                }
                SearchResult::NotPresent(index) => {
                    node.keys.insert(index, Key::new(key, value));
                    return self.save(&node);
                }
                SearchResult::GoDown(mut child_index) => {
                    let child = self.load(node.children[child_index])?;

                    if child.num_keys() == self.max_keys() {
                        self.split_child(&mut node, child_index, child)?;

                        // the promoted median decides which half to continue in
                        match key.cmp(node.keys[child_index].k.as_slice()) {
                            Ordering::Equal => {
                                node.keys[child_index].v.push(value.to_vec());
                                return self.save(&node);
                            }
                            Ordering::Greater => child_index += 1,
                            Ordering::Less => {}
                        }
                    }

                    node = self.load(node.children[child_index])?;
                }
            }
        }
    }

    /// Remove one value from a key. The key disappears with its last value.
    ///
    /// Fails with [`Error::KeyNotFound`] if the key is not in the tree or does not carry
    /// `value`.
    pub fn remove(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut page_idx = ROOT_PAGE;

        loop {
            let mut node = self.load(page_idx)?;
            match node.search(key) {
                SearchResult::Found(index) => {
                    let values = &mut node.keys[index].v;
                    let Some(position) = values.iter().position(|v| v == value) else {
                        return Err(Error::KeyNotFound);
                    };
                    values.remove(position);

                    if values.is_empty() {
                        return self.delete(key);
                    }
                    return self.save(&node);
                }
                SearchResult::NotPresent(_) => return Err(Error::KeyNotFound),
                SearchResult::GoDown(child_index) => page_idx = node.children[child_index],
            }
        }
    }

    /// Whether `key` sits in some node, whatever its values
    fn contains(&self, key: &[u8]) -> Result<bool> {
        let mut page_idx = ROOT_PAGE;

        loop {
            let node = self.load(page_idx)?;
            match node.search(key) {
                SearchResult::Found(_) => return Ok(true),
                SearchResult::NotPresent(_) => return Ok(false),
                SearchResult::GoDown(child_index) => page_idx = node.children[child_index],
            }
        }
    }

    /// Remove a key and all of its values. Deleting a key that is not there is a no-op.
    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        // the descent below rebalances as it goes, so only start it for a key that is there
        if !self.contains(key)? {
            return Ok(());
        }

        let root = self.load(ROOT_PAGE)?;
        self.delete_from(root, key)?;

        // A root left without keys hands page zero over to its only child
        let root = self.load(ROOT_PAGE)?;
        if root.num_keys() == 0 && !root.leaf {
            let child_idx = root.children[0];
            let mut child = self.load(child_idx)?;
            child.id = ROOT_PAGE;
            self.save(&child)?;
            self.store.delete_page(child_idx)?;
            debug!("root emptied, tree shrank a level");
        }

        Ok(())
    }

    /// Delete `key` from the subtree rooted at `node`. Every node descended into holds at
    /// least `t` keys, so removing one never leaves it short.
    fn delete_from(&mut self, mut node: Node, key: &[u8]) -> Result<()> {
        let t = self.order;

        match node.search(key) {
            SearchResult::Found(index) if node.leaf => {
                node.keys.remove(index);
                self.save(&node)
            }
            SearchResult::NotPresent(_) => Ok(()),
            SearchResult::Found(index) => {
                let left = self.load(node.children[index])?;
                if left.num_keys() >= t {
                    let predecessor = self.last_key(left.clone())?;
                    let predecessor_key = predecessor.k.clone();
                    node.keys[index] = predecessor;
                    self.save(&node)?;
                    return self.delete_from(left, &predecessor_key);
                }

                let right = self.load(node.children[index + 1])?;
                if right.num_keys() >= t {
                    let successor = self.first_key(right.clone())?;
                    let successor_key = successor.k.clone();
                    node.keys[index] = successor;
                    self.save(&node)?;
                    return self.delete_from(right, &successor_key);
                }

                let merged = self.merge_children(&mut node, index, left, right)?;
                self.delete_from(merged, key)
            }
            SearchResult::GoDown(child_index) => {
                let child = self.load(node.children[child_index])?;
                let child = if child.num_keys() < t {
                    self.fill_child(&mut node, child_index, child)?
                } else {
                    child
                };
                self.delete_from(child, key)
            }
        }
    }

    /// Bring the child at `child_index` up to `t` keys before descending into it: borrow
    /// through the parent from a sibling that can spare a key, otherwise merge with one.
    /// Returns the node to continue the descent in.
    fn fill_child(&mut self, parent: &mut Node, child_index: usize, mut child: Node) -> Result<Node> {
        let t = self.order;
        let last_child = parent.children.len() - 1;

        if child_index > 0 {
            let mut left = self.load(parent.children[child_index - 1])?;
            if left.num_keys() >= t {
                let borrowed = left.keys.remove(left.keys.len() - 1);
                let separator = std::mem::replace(&mut parent.keys[child_index - 1], borrowed);
                child.keys.insert(0, separator);
                if !left.leaf {
                    let edge = left.children.remove(left.children.len() - 1);
                    child.children.insert(0, edge);
                }

                self.save(&left)?;
                self.save(&child)?;
                self.save(parent)?;
                return Ok(child);
            }

            if child_index == last_child {
                return self.merge_children(parent, child_index - 1, left, child);
            }
        }

        let mut right = self.load(parent.children[child_index + 1])?;
        if right.num_keys() >= t {
            let borrowed = right.keys.remove(0);
            let separator = std::mem::replace(&mut parent.keys[child_index], borrowed);
            child.keys.push(separator);
            if !right.leaf {
                child.children.push(right.children.remove(0));
            }

            self.save(&right)?;
            self.save(&child)?;
            self.save(parent)?;
            return Ok(child);
        }

        self.merge_children(parent, child_index, child, right)
    }

    /// Fold the child at `index + 1` into the child at `index`, pulling their separator down
    /// from `parent`. The right page is given back to the store.
    fn merge_children(
        &mut self,
        parent: &mut Node,
        index: usize,
        mut left: Node,
        right: Node,
    ) -> Result<Node> {
        let separator = parent.keys.remove(index);
        parent.children.remove(index + 1);

        left.keys.push(separator);
        left.keys.extend(right.keys);
        left.children.extend(right.children);

        self.save(&left)?;
        self.save(parent)?;
        self.store.delete_page(right.id)?;

        debug!("merged page {} into {}", right.id, left.id);

        Ok(left)
    }

    /// Rightmost key of the subtree rooted at `node`
    fn last_key(&self, mut node: Node) -> Result<Key> {
        while !node.leaf {
            node = self.load(node.children[node.children.len() - 1])?;
        }
        Ok(node.keys.swap_remove(node.keys.len() - 1))
    }

    /// Leftmost key of the subtree rooted at `node`
    fn first_key(&self, mut node: Node) -> Result<Key> {
        while !node.leaf {
            node = self.load(node.children[0])?;
        }
        Ok(node.keys.swap_remove(0))
    }

    /// Every key `k` with `start <= k <= end`, in ascending order
    pub fn range(&self, start: &[u8], end: &[u8]) -> Result<Vec<Key>> {
        let mut found = vec![];
        if start <= end {
            self.range_from(ROOT_PAGE, start, end, &mut found)?;
        }
        Ok(found)
    }

    fn range_from(&self, page_idx: PageId, start: &[u8], end: &[u8], found: &mut Vec<Key>) -> Result<()> {
        let node = self.load(page_idx)?;

        for (index, key) in node.keys.iter().enumerate() {
            let k = key.k.as_slice();

            // the child left of `k` only holds keys below it
            if !node.leaf && k > start {
                self.range_from(node.children[index], start, end, found)?;
            }
            if k > end {
                return Ok(());
            }
            if k >= start && !key.is_dead() {
                found.push(key.clone());
            }
        }

        if !node.leaf {
            if let Some(last) = node.children.last() {
                self.range_from(*last, start, end, found)?;
            }
        }

        Ok(())
    }

    /// Check the structure of the whole tree
    pub fn verify(&self) -> std::result::Result<(), VerifyError> {
        btree_verify::verify(self)
    }

    /// Write the tree out as a graphviz dot file
    pub fn dump_to_file(&self, output_path: &Path) -> Result<()> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(output_path)?;
        let mut writer = std::io::BufWriter::new(file);

        let mut graph = String::new();
        btree_graph::dump(&mut graph, self).map_err(|e| std::io::Error::other(e.to_string()))?;
        writer.write_all(graph.as_bytes())?;
        writer.flush()?;

        Ok(())
    }
}

impl<S: PageStore> Display for BTree<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        btree_graph::dump(f, self)
    }
}
