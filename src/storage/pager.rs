use std::{
    collections::HashMap,
    ffi::OsString,
    fs::{self, File, OpenOptions},
    io::{self, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use log::{debug, trace, warn};
use parking_lot::{Mutex, RwLock};

use crate::error::Result;

pub type PageId = u64;

/// Payload bytes carried by one page slot
pub const PAGE_SIZE: usize = 1024;

/// Bytes in front of every payload holding the next page id as ASCII decimal text
pub const HEADER_SIZE: usize = 256;

pub const SLOT_SIZE: usize = PAGE_SIZE + HEADER_SIZE;

const END_OF_CHAIN: &str = "-1";

/// The primitives the btree is built on. Anything implementing this can stand in for the
/// file backed [`Pager`].
pub trait PageStore {
    /// Store `data` on a newly allocated page (reusing freed pages first) and return its id
    fn write(&mut self, data: &[u8]) -> Result<PageId>;

    /// Store `data` at `page_idx`, replacing whatever was there. Overflow reuses the slots the
    /// record already chains to and takes any extra ones from the allocator, so only a fresh
    /// append is guaranteed to sit in `page_idx, page_idx + 1, ...`.
    fn write_to(&mut self, page_idx: PageId, data: &[u8]) -> Result<()>;

    /// Read back everything stored at `page_idx`, including overflow pages
    fn get_page(&self, page_idx: PageId) -> Result<Vec<u8>>;

    /// Give `page_idx` back to the allocator
    fn delete_page(&mut self, page_idx: PageId) -> Result<()>;

    /// Number of page slots, live and free
    fn count(&self) -> Result<u64>;

    fn flush(&mut self) -> Result<()>;
}

/// How the backing files are opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagerOptions {
    pub create: bool,
    pub truncate: bool,
    /// Permission bits for newly created files (unix only)
    pub mode: u32,
}

impl Default for PagerOptions {
    fn default() -> Self {
        Self {
            create: true,
            truncate: false,
            mode: 0o644,
        }
    }
}

impl PagerOptions {
    fn open_options(&self) -> OpenOptions {
        let mut options = OpenOptions::new();
        options
            .read(true)
            .write(true)
            .create(self.create)
            .truncate(self.truncate);

        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(self.mode);
        }

        options
    }
}

/// Maps a flat file onto fixed size page slots.
///
/// Each slot is `HEADER_SIZE` bytes of header followed by `PAGE_SIZE` bytes of payload. The
/// header names the next slot of an overflow chain, or `-1` on the last slot, so records of
/// any length can be stored. Freed pages are kept in a LIFO list mirrored to `<name>.del`.
pub struct Pager {
    file: File,
    path: PathBuf,
    del_path: PathBuf,

    free_pages: Vec<PageId>,

    /// One lock handle per page, callers above the pager decide whether to use them
    locks: Mutex<HashMap<PageId, Arc<RwLock<()>>>>,
}

impl std::fmt::Debug for Pager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pager")
            .field("path", &self.path)
            .field("free_pages", &self.free_pages)
            .finish()
    }
}

impl Pager {
    pub fn open(path: impl AsRef<Path>, options: &PagerOptions) -> Result<Pager> {
        let path = path.as_ref().to_path_buf();
        let file = options.open_options().open(&path)?;
        let del_path = del_path_for(&path);

        let free_pages = if options.truncate {
            vec![]
        } else {
            match fs::read_to_string(&del_path) {
                Ok(text) => parse_free_list(&text),
                Err(e) if e.kind() == io::ErrorKind::NotFound => vec![],
                Err(e) => return Err(e.into()),
            }
        };

        let mut pager = Pager {
            file,
            path,
            del_path,
            free_pages,
            locks: Mutex::default(),
        };

        let slots = pager.count()?;
        {
            let mut locks = pager.locks.lock();
            for page_idx in 0..slots {
                locks.insert(page_idx, Arc::default());
            }
        }

        if options.truncate || !pager.del_path.exists() {
            pager.write_free_list()?;
        }

        debug!(
            "opened {:?}: {} slots, {} free",
            pager.path,
            slots,
            pager.free_pages.len()
        );

        Ok(pager)
    }

    pub fn free_pages(&self) -> &[PageId] {
        &self.free_pages
    }

    /// Persist the free list and release the file
    pub fn close(mut self) -> Result<()> {
        self.flush()
    }

    /// Cut the file down to its first `slots` slots, dropping free pages past the new end
    pub(crate) fn truncate(&mut self, slots: u64) -> Result<()> {
        self.file.set_len(slots * SLOT_SIZE as u64)?;
        let before = self.free_pages.len();
        self.free_pages.retain(|&page_idx| page_idx < slots);
        if self.free_pages.len() != before {
            self.write_free_list()?;
        }
        debug!("truncated {:?} to {slots} slots", self.path);
        Ok(())
    }

    /// Lock handle for a page, created the first time it is asked for
    pub(crate) fn page_lock(&self, page_idx: PageId) -> Arc<RwLock<()>> {
        self.locks.lock().entry(page_idx).or_default().clone()
    }

    /// Slot ids making up the record currently stored at `page_idx`, in chain order.
    /// Empty when the slot does not exist yet; a link past the end of the file ends the chain.
    pub(crate) fn chain(&self, page_idx: PageId) -> Result<Vec<PageId>> {
        let slots = self.count()?;
        let mut chain = vec![];
        let mut next = Some(page_idx);

        while let Some(idx) = next {
            if chain.contains(&idx) || chain.len() as u64 > slots {
                warn!("page {page_idx} has a cyclic overflow chain at {idx}");
                break;
            }
            match self.read_header(idx) {
                Ok(n) => {
                    chain.push(idx);
                    next = n;
                }
                Err(e) if e.is_eof() => break,
                Err(e) => return Err(e),
            }
        }

        Ok(chain)
    }

    /// Pops a free page, or hands out the slot at `*append_at` and moves it along
    fn allocate(&mut self, append_at: &mut PageId) -> PageId {
        match self.free_pages.pop() {
            Some(page_idx) => {
                debug!("reusing free page {page_idx}");
                page_idx
            }
            None => {
                let page_idx = *append_at;
                *append_at += 1;
                page_idx
            }
        }
    }

    /// Removes `page_idx` from the free list, returning whether it was there
    fn unfree(&mut self, page_idx: PageId) -> bool {
        let before = self.free_pages.len();
        self.free_pages.retain(|&p| p != page_idx);
        before != self.free_pages.len()
    }

    /// Writes `data` as a chain starting at `page_idx`.
    ///
    /// A `fresh` page has just come off the free list or the end of the file; its old header
    /// may name continuation slots that belong to somebody else by now, so it is not followed.
    fn store(
        &mut self,
        page_idx: PageId,
        data: &[u8],
        fresh: bool,
        free_list_changed: bool,
    ) -> Result<()> {
        let mut chain = if fresh { vec![] } else { self.chain(page_idx)? };
        if chain.is_empty() {
            chain.push(page_idx);
        }

        let chunks: Vec<&[u8]> = if data.is_empty() {
            vec![data]
        } else {
            data.chunks(PAGE_SIZE).collect()
        };

        let surplus = if chain.len() > chunks.len() {
            chain.split_off(chunks.len())
        } else {
            vec![]
        };

        let mut append_at = self.count()?.max(page_idx + 1);
        let mut free_list_changed = free_list_changed;
        while chain.len() < chunks.len() {
            free_list_changed |= !self.free_pages.is_empty();
            let next = self.allocate(&mut append_at);
            chain.push(next);
        }

        for (i, chunk) in chunks.iter().enumerate() {
            self.write_slot(chain[i], chain.get(i + 1).copied(), chunk)?;
        }

        if !surplus.is_empty() {
            debug!("page {page_idx} shrank, freeing {surplus:?}");
            self.free_pages.extend(surplus.into_iter().rev());
            free_list_changed = true;
        }

        if free_list_changed {
            self.write_free_list()?;
        }

        Ok(())
    }

    fn write_free_list(&self) -> Result<()> {
        let text = serde_json::to_string(&self.free_pages).map_err(io::Error::from)?;
        fs::write(&self.del_path, text)?;
        Ok(())
    }

    fn seek_to(&self, page_idx: PageId) -> Result<&File> {
        let mut file = &self.file;
        let offset = page_idx * SLOT_SIZE as u64;
        trace!("seeking to {offset} for page {page_idx}");
        file.seek(SeekFrom::Start(offset))?;
        Ok(file)
    }

    fn read_header(&self, page_idx: PageId) -> Result<Option<PageId>> {
        let mut header = [0u8; HEADER_SIZE];
        self.seek_to(page_idx)?.read_exact(&mut header)?;
        Ok(parse_header(&header)?)
    }

    fn read_slot(&self, page_idx: PageId) -> Result<(Option<PageId>, Vec<u8>)> {
        let mut slot = vec![0u8; SLOT_SIZE];
        self.seek_to(page_idx)?.read_exact(&mut slot)?;

        let next = parse_header(&slot[..HEADER_SIZE])?;
        slot.drain(..HEADER_SIZE);

        Ok((next, slot))
    }

    fn write_slot(&mut self, page_idx: PageId, next: Option<PageId>, chunk: &[u8]) -> Result<()> {
        debug_assert!(chunk.len() <= PAGE_SIZE);

        let mut slot = vec![0u8; SLOT_SIZE];
        let header = match next {
            Some(next) => next.to_string(),
            None => END_OF_CHAIN.to_string(),
        };
        slot[..header.len()].copy_from_slice(header.as_bytes());
        slot[HEADER_SIZE..HEADER_SIZE + chunk.len()].copy_from_slice(chunk);

        self.seek_to(page_idx)?.write_all(&slot)?;
        self.locks.lock().entry(page_idx).or_default();

        Ok(())
    }
}

impl PageStore for Pager {
    fn write(&mut self, data: &[u8]) -> Result<PageId> {
        let mut append_at = self.count()?;
        let reused = !self.free_pages.is_empty();
        let page_idx = self.allocate(&mut append_at);
        self.store(page_idx, data, true, reused)?;
        Ok(page_idx)
    }

    fn write_to(&mut self, page_idx: PageId, data: &[u8]) -> Result<()> {
        let was_free = self.unfree(page_idx);
        self.store(page_idx, data, was_free, was_free)
    }

    fn get_page(&self, page_idx: PageId) -> Result<Vec<u8>> {
        let (mut next, mut data) = self.read_slot(page_idx)?;
        let slots = self.count()?;
        let mut followed = 1;

        while let Some(idx) = next {
            if followed > slots {
                warn!("page {page_idx} has a cyclic overflow chain");
                break;
            }
            match self.read_slot(idx) {
                Ok((n, payload)) => {
                    data.extend_from_slice(&payload);
                    next = n;
                    followed += 1;
                }
                Err(e) => {
                    trace!("overflow chain of page {page_idx} stops at {idx}: {e}");
                    break;
                }
            }
        }

        Ok(data)
    }

    fn delete_page(&mut self, page_idx: PageId) -> Result<()> {
        if self.free_pages.contains(&page_idx) {
            debug!("page {page_idx} is already free");
            return Ok(());
        }

        let chain = self.chain(page_idx)?;
        // continuation slots go in first so `page_idx` is the next one handed out
        for &idx in chain.iter().skip(1).rev() {
            self.free_pages.push(idx);
        }
        self.free_pages.push(page_idx);
        debug!("freed page {page_idx} ({} slots)", chain.len().max(1));

        self.write_free_list()
    }

    fn count(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len() / SLOT_SIZE as u64)
    }

    fn flush(&mut self) -> Result<()> {
        self.write_free_list()?;
        self.file.sync_all()?;
        Ok(())
    }
}

fn del_path_for(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".del");
    PathBuf::from(name)
}

/// Parse the header of a slot. A blank header (a hole in the file) ends the chain like `-1`.
fn parse_header(header: &[u8]) -> io::Result<Option<PageId>> {
    let end = header.iter().position(|&b| b == 0).unwrap_or(header.len());
    let text = std::str::from_utf8(&header[..end])
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?
        .trim();

    if text.is_empty() || text == END_OF_CHAIN {
        return Ok(None);
    }

    text.parse::<PageId>()
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("page header {text:?}: {e}")))
}

/// Comma separated page ids, optionally wrapped in brackets. Anything that is not a page id
/// is skipped.
fn parse_free_list(text: &str) -> Vec<PageId> {
    let text = text.trim();
    let text = text.strip_prefix('[').unwrap_or(text);
    let text = text.strip_suffix(']').unwrap_or(text);

    text.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| match entry.parse() {
            Ok(page_idx) => Some(page_idx),
            Err(_) => {
                warn!("skipping malformed free list entry {entry:?}");
                None
            }
        })
        .collect()
}
