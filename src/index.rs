//! Typed column values and the secondary index built on top of a [`BTree`].
//!
//! Values are turned into keys whose byte order matches the value order, so range scans over
//! integers, decimals and dates come back sorted the way a reader expects. Each index entry maps
//! an encoded value to the row ids holding it.

use std::fmt::Display;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::storage::{BTree, PageStore, Pager, PagerOptions};

const TAG_INTEGER: u8 = 0x01;
const TAG_TEXT: u8 = 0x02;
const TAG_BOOL: u8 = 0x03;
const TAG_DECIMAL: u8 = 0x04;
const TAG_DATE: u8 = 0x05;

const SIGN_64: u64 = 1 << 63;
const SIGN_32: u32 = 1 << 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Integer,
    Text,
    Bool,
    Decimal,
    Date,
}

impl Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ColumnType::Integer => "integer",
            ColumnType::Text => "text",
            ColumnType::Bool => "bool",
            ColumnType::Decimal => "decimal",
            ColumnType::Date => "date",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Integer(i64),
    Text(String),
    Bool(bool),
    Decimal(f64),
    /// days since 1970-01-01
    Date(i32),
}

impl Value {
    pub fn column_type(&self) -> ColumnType {
        match self {
            Value::Integer(_) => ColumnType::Integer,
            Value::Text(_) => ColumnType::Text,
            Value::Bool(_) => ColumnType::Bool,
            Value::Decimal(_) => ColumnType::Decimal,
            Value::Date(_) => ColumnType::Date,
        }
    }

    pub fn check(&self, expected: ColumnType) -> Result<()> {
        let actual = self.column_type();
        if actual != expected {
            return Err(Error::TypeMismatch { expected, actual });
        }
        Ok(())
    }

    /// Key bytes that sort the same way the values do
    pub fn encode_key(&self) -> Vec<u8> {
        match self {
            Value::Integer(i) => {
                let mut key = vec![TAG_INTEGER];
                key.extend_from_slice(&((*i as u64) ^ SIGN_64).to_be_bytes());
                key
            }
            Value::Text(s) => {
                let mut key = vec![TAG_TEXT];
                key.extend_from_slice(s.as_bytes());
                key
            }
            Value::Bool(b) => vec![TAG_BOOL, u8::from(*b)],
            Value::Decimal(d) => {
                // negative numbers get every bit flipped, positive ones just the sign
                let bits = d.to_bits();
                let ordered = if bits & SIGN_64 != 0 {
                    !bits
                } else {
                    bits | SIGN_64
                };
                let mut key = vec![TAG_DECIMAL];
                key.extend_from_slice(&ordered.to_be_bytes());
                key
            }
            Value::Date(days) => {
                let mut key = vec![TAG_DATE];
                key.extend_from_slice(&((*days as u32) ^ SIGN_32).to_be_bytes());
                key
            }
        }
    }

    pub fn decode_key(key: &[u8]) -> Result<Value> {
        let Some((&tag, body)) = key.split_first() else {
            return Err(malformed("empty index key"));
        };

        let value = match tag {
            TAG_INTEGER => Value::Integer((u64::from_be_bytes(fixed(body)?) ^ SIGN_64) as i64),
            TAG_TEXT => Value::Text(
                String::from_utf8(body.to_vec()).map_err(|e| malformed(&e.to_string()))?,
            ),
            TAG_BOOL => match body {
                [0] => Value::Bool(false),
                [1] => Value::Bool(true),
                _ => return Err(malformed("bad bool key")),
            },
            TAG_DECIMAL => {
                let ordered = u64::from_be_bytes(fixed(body)?);
                let bits = if ordered & SIGN_64 != 0 {
                    ordered ^ SIGN_64
                } else {
                    !ordered
                };
                Value::Decimal(f64::from_bits(bits))
            }
            TAG_DATE => Value::Date((u32::from_be_bytes(fixed(body)?) ^ SIGN_32) as i32),
            other => return Err(malformed(&format!("unknown key tag {other:#04x}"))),
        };

        Ok(value)
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Integer(i) => write!(f, "{i}"),
            Value::Text(s) => write!(f, "{s:?}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Decimal(d) => write!(f, "{d}"),
            Value::Date(days) => write!(f, "date({days})"),
        }
    }
}

fn malformed(message: &str) -> Error {
    Error::Decode(Box::new(bincode::ErrorKind::Custom(message.to_string())))
}

fn fixed<const N: usize>(body: &[u8]) -> Result<[u8; N]> {
    body.try_into()
        .map_err(|_| malformed(&format!("expected {N} key bytes, got {}", body.len())))
}

/// Secondary index over one column: encoded value -> row ids
#[derive(Debug)]
pub struct Index<S = Pager> {
    tree: BTree<S>,
    column_type: ColumnType,
    unique: bool,
}

impl Index<Pager> {
    pub fn open(
        path: impl AsRef<Path>,
        options: &PagerOptions,
        order: usize,
        column_type: ColumnType,
        unique: bool,
    ) -> Result<Self> {
        let tree = BTree::open(path, options, order)?;
        Ok(Index::new(tree, column_type, unique))
    }

    pub fn close(self) -> Result<()> {
        self.tree.close()
    }
}

impl<S: PageStore> Index<S> {
    pub fn new(tree: BTree<S>, column_type: ColumnType, unique: bool) -> Self {
        Index {
            tree,
            column_type,
            unique,
        }
    }

    pub fn column_type(&self) -> ColumnType {
        self.column_type
    }

    pub fn insert(&mut self, value: &Value, row_id: u64) -> Result<()> {
        value.check(self.column_type)?;
        let key = value.encode_key();

        if self.unique && self.tree.get(&key)?.is_some() {
            return Err(Error::UniqueViolation);
        }

        self.tree.put(&key, &row_id.to_be_bytes())
    }

    /// Row ids holding `value`, in insertion order
    pub fn lookup(&self, value: &Value) -> Result<Vec<u64>> {
        value.check(self.column_type)?;

        match self.tree.get(&value.encode_key())? {
            Some(key) => row_ids(&key.v),
            None => Ok(vec![]),
        }
    }

    pub fn remove(&mut self, value: &Value, row_id: u64) -> Result<()> {
        value.check(self.column_type)?;
        self.tree.remove(&value.encode_key(), &row_id.to_be_bytes())
    }

    /// Values between `low` and `high` inclusive, each with its row ids
    pub fn range(&self, low: &Value, high: &Value) -> Result<Vec<(Value, Vec<u64>)>> {
        low.check(self.column_type)?;
        high.check(self.column_type)?;

        self.tree
            .range(&low.encode_key(), &high.encode_key())?
            .into_iter()
            .map(|key| Ok((Value::decode_key(&key.k)?, row_ids(&key.v)?)))
            .collect()
    }

    pub fn into_tree(self) -> BTree<S> {
        self.tree
    }
}

fn row_ids(values: &[Vec<u8>]) -> Result<Vec<u64>> {
    values
        .iter()
        .map(|v| fixed(v).map(u64::from_be_bytes))
        .collect()
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;
    use tempfile::TempDir;

    use super::{ColumnType, Index, Value};
    use crate::error::Error;
    use crate::storage::{BTree, MemoryPager, PagerOptions};

    fn memory_index(column_type: ColumnType, unique: bool) -> Index<MemoryPager> {
        let tree = BTree::with_store(MemoryPager::new(), 3).unwrap();
        Index::new(tree, column_type, unique)
    }

    #[test]
    fn key_round_trip() {
        for value in [
            Value::Integer(-5),
            Value::Integer(i64::MAX),
            Value::Text("hello".to_string()),
            Value::Bool(true),
            Value::Decimal(-0.25),
            Value::Date(-365),
        ] {
            assert_eq!(value, Value::decode_key(&value.encode_key()).unwrap());
        }

        assert!(Value::decode_key(&[]).is_err());
        assert!(Value::decode_key(&[0x01, 1, 2]).is_err());
        assert!(Value::decode_key(&[0x7f]).is_err());
    }

    #[test]
    fn numeric_order_survives_encoding() {
        // naive formatting would put "10" before "9" and "-1" after "-2"
        let ints = [-1000, -2, -1, 0, 1, 9, 10, 1000];
        for pair in ints.windows(2) {
            assert!(Value::Integer(pair[0]).encode_key() < Value::Integer(pair[1]).encode_key());
        }

        let decimals = [f64::NEG_INFINITY, -2.5, -0.1, 0.0, 0.1, 9.99, 10.0, f64::INFINITY];
        for pair in decimals.windows(2) {
            assert!(Value::Decimal(pair[0]).encode_key() < Value::Decimal(pair[1]).encode_key());
        }
    }

    #[test]
    fn type_checked() {
        let mut index = memory_index(ColumnType::Integer, false);
        let err = index.insert(&Value::Text("7".to_string()), 1).unwrap_err();
        assert!(matches!(
            err,
            Error::TypeMismatch {
                expected: ColumnType::Integer,
                actual: ColumnType::Text
            }
        ));
    }

    #[test]
    fn non_unique_postings() {
        let mut index = memory_index(ColumnType::Text, false);
        let red = Value::Text("red".to_string());

        index.insert(&red, 3).unwrap();
        index.insert(&red, 1).unwrap();
        index.insert(&Value::Text("blue".to_string()), 2).unwrap();

        assert_eq!(vec![3, 1], index.lookup(&red).unwrap());

        index.remove(&red, 3).unwrap();
        assert_eq!(vec![1], index.lookup(&red).unwrap());

        index.remove(&red, 1).unwrap();
        assert!(index.lookup(&red).unwrap().is_empty());
    }

    #[test]
    fn unique_rejects_second_row() {
        let mut index = memory_index(ColumnType::Integer, true);
        index.insert(&Value::Integer(7), 1).unwrap();

        assert!(matches!(
            index.insert(&Value::Integer(7), 2),
            Err(Error::UniqueViolation)
        ));
        assert_eq!(vec![1], index.lookup(&Value::Integer(7)).unwrap());
    }

    #[test]
    fn range_over_integers() {
        let dir = TempDir::new().unwrap();
        let mut index = Index::open(
            dir.path().join("age.idx"),
            &PagerOptions::default(),
            3,
            ColumnType::Integer,
            false,
        )
        .unwrap();

        for (row_id, age) in [(1, 30), (2, -4), (3, 9), (4, 10), (5, 100), (6, 9)] {
            index.insert(&Value::Integer(age), row_id).unwrap();
        }

        let found = index.range(&Value::Integer(0), &Value::Integer(99)).unwrap();
        assert_eq!(
            vec![
                (Value::Integer(9), vec![3, 6]),
                (Value::Integer(10), vec![4]),
                (Value::Integer(30), vec![1]),
            ],
            found
        );

        index.close().unwrap();
    }

    proptest! {
        #[test]
        fn integer_keys_sort_like_integers(a: i64, b: i64) {
            let (ka, kb) = (Value::Integer(a).encode_key(), Value::Integer(b).encode_key());
            prop_assert_eq!(a.cmp(&b), ka.cmp(&kb));
        }

        #[test]
        fn date_keys_sort_like_dates(a: i32, b: i32) {
            let (ka, kb) = (Value::Date(a).encode_key(), Value::Date(b).encode_key());
            prop_assert_eq!(a.cmp(&b), ka.cmp(&kb));
        }
    }
}
