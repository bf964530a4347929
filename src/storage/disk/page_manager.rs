use crate::storage::page::PageId;
use anyhow::{Context, Result, bail};
use log::trace;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

pub const PAGE_SIZE: usize = 4096;

/// Byte-level page store backing the buffer pool.
///
/// Page 0 is reserved for the header page mapping index names to root page
/// ids; `allocate_page` hands out monotonically increasing ids starting
/// after it.
pub struct DiskManager {
    file: File,
    next_page_id: u32,
    deallocated: HashSet<PageId>,
}

impl DiskManager {
    /// Create a fresh database file with a zeroed header page.
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("Failed to create file: {:?}", path))?;

        let mut manager = Self {
            file,
            next_page_id: 1,
            deallocated: HashSet::new(),
        };
        manager.write_page(PageId::HEADER, &[0u8; PAGE_SIZE])?;
        Ok(manager)
    }

    /// Open an existing database file.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("Failed to open file: {:?}", path))?;

        let file_size = file.metadata()?.len();
        let num_pages = (file_size / PAGE_SIZE as u64) as u32;
        Ok(Self {
            file,
            next_page_id: num_pages.max(1),
            deallocated: HashSet::new(),
        })
    }

    pub fn read_page(&mut self, page_id: PageId, buf: &mut [u8]) -> Result<()> {
        if buf.len() != PAGE_SIZE {
            bail!(
                "Buffer size must be PAGE_SIZE ({}), got {}",
                PAGE_SIZE,
                buf.len()
            );
        }

        let offset = Self::page_offset(page_id);
        let file_size = self.file.metadata()?.len();

        if offset >= file_size {
            bail!("Page {} does not exist", page_id.0);
        }

        self.file
            .seek(SeekFrom::Start(offset))
            .context("Failed to seek")?;
        self.file.read_exact(buf).context("Failed to read page")?;

        Ok(())
    }

    pub fn write_page(&mut self, page_id: PageId, data: &[u8]) -> Result<()> {
        if data.len() != PAGE_SIZE {
            bail!(
                "Data size must be PAGE_SIZE ({}), got {}",
                PAGE_SIZE,
                data.len()
            );
        }

        let offset = Self::page_offset(page_id);
        let file_size = self.file.metadata()?.len();

        if offset >= file_size {
            let new_size = offset + PAGE_SIZE as u64;
            self.file
                .set_len(new_size)
                .context("Failed to extend file")?;
        }

        self.file
            .seek(SeekFrom::Start(offset))
            .context("Failed to seek")?;
        self.file.write_all(data).context("Failed to write page")?;
        self.file.sync_all().context("Failed to sync")?;

        Ok(())
    }

    /// Allocate the next page id and extend the file to cover it.
    pub fn allocate_page(&mut self) -> Result<PageId> {
        let page_id = PageId(self.next_page_id);
        self.next_page_id += 1;

        let new_size = self.next_page_id as u64 * PAGE_SIZE as u64;
        if new_size > self.file.metadata()?.len() {
            self.file
                .set_len(new_size)
                .context("Failed to extend file")?;
        }
        self.deallocated.remove(&page_id);
        trace!("allocated {}", page_id);

        Ok(page_id)
    }

    /// Give a page id back. Ids are never reissued; the page is merely
    /// marked free so tests can observe the deallocation.
    pub fn deallocate_page(&mut self, page_id: PageId) {
        trace!("deallocated {}", page_id);
        self.deallocated.insert(page_id);
    }

    pub fn is_deallocated(&self, page_id: PageId) -> bool {
        self.deallocated.contains(&page_id)
    }

    pub fn num_pages(&self) -> Result<u32> {
        let file_size = self.file.metadata()?.len();
        Ok((file_size / PAGE_SIZE as u64) as u32)
    }

    fn page_offset(page_id: PageId) -> u64 {
        page_id.0 as u64 * PAGE_SIZE as u64
    }
}
