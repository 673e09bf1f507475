//! Append only statement log kept on its own [`Pager`].
//!
//! Each statement becomes one record written with [`PageStore::write`]. The log never frees
//! pages, so records sit one after another in the file and can be read back by walking the
//! slots in order. Replaying the statements is up to the caller.

use std::path::Path;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage::{PageId, PageStore, Pager, PagerOptions};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalRecord {
    pub seq: u64,
    pub statement: Vec<u8>,
}

#[derive(Debug)]
pub struct Wal {
    pager: Pager,
    /// first page of every record, in append order
    heads: Vec<PageId>,
    next_seq: u64,
}

impl Wal {
    pub fn open(path: impl AsRef<Path>, options: &PagerOptions) -> Result<Wal> {
        let mut pager = Pager::open(path, options)?;
        let slots = pager.count()?;

        let mut heads = vec![];
        let mut next_seq = 0;
        let mut page_idx = 0;

        while page_idx < slots {
            let record = match pager.get_page(page_idx).and_then(|data| decode(&data)) {
                Ok(record) => record,
                Err(e) => {
                    // a torn tail from an interrupted append, everything before it is good
                    warn!("log ends at page {page_idx} of {slots}: {e}");
                    break;
                }
            };

            if record.seq != next_seq {
                warn!("log ends at page {page_idx}: expected record {next_seq}, found {}", record.seq);
                break;
            }

            heads.push(page_idx);
            next_seq = record.seq + 1;

            let chain = pager.chain(page_idx)?;
            page_idx = chain.iter().max().map_or(page_idx, |last| *last) + 1;
        }

        if page_idx < slots {
            // later appends must not land inside the dead chain
            pager.truncate(page_idx)?;
        }

        debug!("opened log with {} records", heads.len());

        Ok(Wal {
            pager,
            heads,
            next_seq,
        })
    }

    /// Append a statement, returning its sequence number
    pub fn append(&mut self, statement: &[u8]) -> Result<u64> {
        let record = WalRecord {
            seq: self.next_seq,
            statement: statement.to_vec(),
        };

        let page_idx = self.pager.write(&bincode::serialize(&record)?)?;
        self.heads.push(page_idx);
        self.next_seq += 1;

        Ok(record.seq)
    }

    /// Every record in the order it was appended
    pub fn records(&self) -> Result<Vec<WalRecord>> {
        self.heads
            .iter()
            .map(|&page_idx| decode(&self.pager.get_page(page_idx)?))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.heads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heads.is_empty()
    }

    pub fn close(self) -> Result<()> {
        self.pager.close()
    }
}

fn decode(data: &[u8]) -> Result<WalRecord> {
    Ok(bincode::deserialize(data)?)
}

#[cfg(test)]
mod test {
    use tempfile::TempDir;

    use super::Wal;
    use crate::storage::{PagerOptions, PAGE_SIZE, SLOT_SIZE};

    #[test]
    fn append_and_read_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wal.db");
        let mut wal = Wal::open(&path, &PagerOptions::default()).unwrap();

        assert!(wal.is_empty());
        assert_eq!(0, wal.append(b"insert into t values (1)").unwrap());
        assert_eq!(1, wal.append(&vec![b'x'; PAGE_SIZE * 3]).unwrap());
        assert_eq!(2, wal.append(b"delete from t").unwrap());

        let records = wal.records().unwrap();
        assert_eq!(3, records.len());
        assert_eq!(b"insert into t values (1)".to_vec(), records[0].statement);
        assert_eq!(PAGE_SIZE * 3, records[1].statement.len());
        assert_eq!(2, records[2].seq);
    }

    #[test]
    fn reopen_continues_sequence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wal.db");

        let mut wal = Wal::open(&path, &PagerOptions::default()).unwrap();
        wal.append(b"one").unwrap();
        wal.append(&vec![b'y'; PAGE_SIZE + 5]).unwrap();
        wal.close().unwrap();

        let mut wal = Wal::open(&path, &PagerOptions::default()).unwrap();
        assert_eq!(2, wal.len());
        assert_eq!(2, wal.append(b"three").unwrap());

        let seqs: Vec<u64> = wal.records().unwrap().iter().map(|r| r.seq).collect();
        assert_eq!(vec![0, 1, 2], seqs);
    }

    #[test]
    fn torn_tail_is_dropped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wal.db");

        let mut wal = Wal::open(&path, &PagerOptions::default()).unwrap();
        wal.append(b"kept").unwrap();
        wal.append(&vec![b'z'; PAGE_SIZE * 2]).unwrap();
        wal.close().unwrap();

        // lose the last slot of the second record
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(2 * SLOT_SIZE as u64).unwrap();

        let wal = Wal::open(&path, &PagerOptions::default()).unwrap();
        assert_eq!(1, wal.len());
        assert_eq!(b"kept".to_vec(), wal.records().unwrap()[0].statement);
    }

    #[test]
    fn append_after_torn_tail_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wal.db");

        let mut wal = Wal::open(&path, &PagerOptions::default()).unwrap();
        wal.append(b"kept").unwrap();
        wal.append(&vec![b'z'; PAGE_SIZE * 2]).unwrap();
        wal.close().unwrap();

        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(2 * SLOT_SIZE as u64).unwrap();

        let mut wal = Wal::open(&path, &PagerOptions::default()).unwrap();
        assert_eq!(SLOT_SIZE as u64, std::fs::metadata(&path).unwrap().len());
        assert_eq!(1, wal.append(b"after crash").unwrap());
        wal.close().unwrap();

        let wal = Wal::open(&path, &PagerOptions::default()).unwrap();
        let records = wal.records().unwrap();
        assert_eq!(2, records.len());
        assert_eq!(b"kept".to_vec(), records[0].statement);
        assert_eq!(b"after crash".to_vec(), records[1].statement);
        assert_eq!(1, records[1].seq);
    }
}
