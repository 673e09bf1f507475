use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::pager::PageId;

/// A key and every value stored under it, in insertion order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    pub k: Vec<u8>,
    pub v: Vec<Vec<u8>>,
}

impl Key {
    pub fn new(k: &[u8], value: &[u8]) -> Key {
        Key {
            k: k.to_vec(),
            v: vec![value.to_vec()],
        }
    }

    /// A key without values is logically gone
    pub fn is_dead(&self) -> bool {
        self.v.is_empty()
    }
}

/// One btree node, stored as the payload of the page it is named after
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: PageId,
    pub keys: Vec<Key>,
    /// child page ids, one more than `keys` on interior nodes, empty on leaves
    pub children: Vec<PageId>,
    pub leaf: bool,
}

#[derive(Debug, PartialEq, Eq)]
pub enum SearchResult {
    /// The key lives at this index of the node
    Found(usize),
    /// The key is not present in the leaf node, but if it were it should be at this index
    NotPresent(usize),
    /// The key is not in this interior node; if it is anywhere it is below the child at this index
    GoDown(usize),
}

#[derive(Debug, PartialEq, Eq)]
pub enum OrderError {
    KeyOutOfOrder(usize),
}

impl Node {
    pub fn new_leaf(id: PageId) -> Node {
        Node {
            id,
            keys: vec![],
            children: vec![],
            leaf: true,
        }
    }

    pub fn search(&self, search_key: &[u8]) -> SearchResult {
        match self
            .keys
            .binary_search_by(|key| key.k.as_slice().cmp(search_key))
        {
            Ok(index) => SearchResult::Found(index),
            Err(index) if self.leaf => SearchResult::NotPresent(index),
            Err(index) => SearchResult::GoDown(index),
        }
    }

    pub fn num_keys(&self) -> usize {
        self.keys.len()
    }

    pub fn smallest_key(&self) -> Option<&[u8]> {
        self.keys.first().map(|key| key.k.as_slice())
    }

    pub fn largest_key(&self) -> Option<&[u8]> {
        self.keys.last().map(|key| key.k.as_slice())
    }

    /// Keys must be strictly increasing
    pub fn verify_key_ordering(&self) -> std::result::Result<(), OrderError> {
        for (index, pair) in self.keys.windows(2).enumerate() {
            if pair[0].k >= pair[1].k {
                return Err(OrderError::KeyOutOfOrder(index + 1));
            }
        }

        Ok(())
    }

    /// Cut a full node of `2t - 1` keys around its median.
    ///
    /// `self` keeps the lower `t - 1` keys (and `t` children), the median is returned together
    /// with the upper half, which still needs a page of its own.
    pub fn split(&mut self, t: usize) -> (Key, Vec<Key>, Vec<PageId>) {
        debug_assert_eq!(self.keys.len(), 2 * t - 1);

        let right_keys = self.keys.split_off(t);
        let median = self.keys.remove(t - 1);
        let right_children = if self.leaf {
            vec![]
        } else {
            self.children.split_off(t)
        };

        (median, right_keys, right_children)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode a node from a page payload. Page padding after the node is ignored.
    pub fn decode(bytes: &[u8]) -> Result<Node> {
        Ok(bincode::deserialize(bytes)?)
    }
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;

    use proptest::prelude::*;

    use super::{Key, Node, OrderError, SearchResult};

    fn leaf_with(keys: &[&str]) -> Node {
        let mut node = Node::new_leaf(7);
        for k in keys {
            node.keys.push(Key::new(k.as_bytes(), k.as_bytes()));
        }
        node
    }

    #[test]
    fn test_search() {
        let node = leaf_with(&["b", "d", "f"]);

        assert_eq!(SearchResult::Found(0), node.search(b"b"));
        assert_eq!(SearchResult::Found(2), node.search(b"f"));
        assert_eq!(SearchResult::NotPresent(0), node.search(b"a"));
        assert_eq!(SearchResult::NotPresent(2), node.search(b"e"));
        assert_eq!(SearchResult::NotPresent(3), node.search(b"g"));

        let mut interior = node.clone();
        interior.leaf = false;
        interior.children = vec![1, 2, 3, 4];
        assert_eq!(SearchResult::GoDown(1), interior.search(b"c"));
        assert_eq!(SearchResult::Found(1), interior.search(b"d"));
    }

    #[test]
    fn test_byte_ordering() {
        // unsigned byte comparison, shorter prefix first
        let node = leaf_with(&["10", "9", "9\u{7f}"]);
        node.verify_key_ordering().unwrap();

        let mut bytes = leaf_with(&[]);
        bytes.keys.push(Key::new(&[0x01], b""));
        bytes.keys.push(Key::new(&[0x80], b""));
        bytes.keys.push(Key::new(&[0xff, 0x00], b""));
        bytes.verify_key_ordering().unwrap();

        let unordered = leaf_with(&["a", "c", "b"]);
        assert_eq!(
            Err(OrderError::KeyOutOfOrder(2)),
            unordered.verify_key_ordering()
        );

        let duplicated = leaf_with(&["a", "a"]);
        assert!(duplicated.verify_key_ordering().is_err());
    }

    #[test]
    fn test_split_interior() {
        let mut node = leaf_with(&["a", "b", "c", "d", "e"]);
        node.leaf = false;
        node.children = vec![10, 11, 12, 13, 14, 15];

        let (median, right_keys, right_children) = node.split(3);

        assert_eq!(b"c".to_vec(), median.k);
        assert_eq!(2, node.num_keys());
        assert_eq!(vec![10, 11, 12], node.children);
        assert_eq!(2, right_keys.len());
        assert_eq!(vec![13, 14, 15], right_children);
    }

    #[test]
    fn test_encoding_ignores_padding() {
        let mut node = leaf_with(&["apple", "pear"]);
        node.keys[1].v.push(b"second".to_vec());

        let mut bytes = node.encode().unwrap();
        bytes.resize(1024, 0);

        assert_eq!(node, Node::decode(&bytes).unwrap());
    }

    #[test]
    fn test_decode_garbage() {
        assert!(Node::decode(&[0xff; 3]).is_err());
    }

    proptest! {
        #[test]
        fn test_split(insertions in prop::collection::btree_set("[a-z]{1,4}", 5..6usize)) {
            let reference: BTreeMap<_, _> = insertions.iter().map(|k| (k.clone(), ())).collect();

            let mut node = Node::new_leaf(1);
            for k in &insertions {
                match node.search(k.as_bytes()) {
                    SearchResult::NotPresent(idx) => node.keys.insert(idx, Key::new(k.as_bytes(), b"")),
                    other => panic!("unexpected {other:?}"),
                }
                node.verify_key_ordering().unwrap();
            }

            let (median, right, _) = node.split(3);

            // No keys were lost in the making of these parts
            assert_eq!(node.num_keys() + right.len() + 1, reference.len());
            assert!(node.largest_key().unwrap() < median.k.as_slice());
            assert!(median.k < right[0].k);
        }
    }
}
