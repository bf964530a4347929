//! Slotted heap page storing variable-length tuples.
//!
//! Layout (little-endian):
//! - 0..4   page_type (u32)
//! - 4..8   next_page_id (i32, -1 at the end of the table chain)
//! - 8..10  slot_count (u16)
//! - 10..12 free_space_offset (u16), lower edge of the tuple area
//! - 12..   slot directory entries: offset (u16), length (u16), flags (u16)
//!
//! Tuple bytes grow downward from the end of the page; the slot directory
//! grows upward. Deleted tuples keep their slot with the tombstone flag set
//! so record ids stay stable.

use crate::storage::page::{HEAP_PAGE_TYPE, PageId};
use crate::storage::PAGE_SIZE;

const HEAP_HEADER_SIZE: usize = 12;
const SLOT_SIZE: usize = 6;
const TOMBSTONE: u16 = 1;

pub struct HeapPage {
    data: Box<[u8; PAGE_SIZE]>,
}

impl HeapPage {
    pub fn new() -> Self {
        let mut page = Self {
            data: Box::new([0u8; PAGE_SIZE]),
        };
        page.data[0..4].copy_from_slice(&HEAP_PAGE_TYPE.to_le_bytes());
        page.set_next_page_id(None);
        page.set_slot_count(0);
        page.set_free_space_offset(PAGE_SIZE as u16);
        page
    }

    pub fn from_data(data: &[u8; PAGE_SIZE]) -> Self {
        debug_assert_eq!(
            u32::from_le_bytes(data[0..4].try_into().unwrap()),
            HEAP_PAGE_TYPE
        );
        Self {
            data: Box::new(*data),
        }
    }

    pub fn data(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    pub fn next_page_id(&self) -> Option<PageId> {
        PageId::decode(i32::from_le_bytes(self.data[4..8].try_into().unwrap()))
    }

    pub fn set_next_page_id(&mut self, next: Option<PageId>) {
        self.data[4..8].copy_from_slice(&PageId::encode(next).to_le_bytes());
    }

    pub fn slot_count(&self) -> u32 {
        u16::from_le_bytes(self.data[8..10].try_into().unwrap()) as u32
    }

    fn set_slot_count(&mut self, count: u32) {
        self.data[8..10].copy_from_slice(&(count as u16).to_le_bytes());
    }

    fn free_space_offset(&self) -> usize {
        u16::from_le_bytes(self.data[10..12].try_into().unwrap()) as usize
    }

    fn set_free_space_offset(&mut self, offset: u16) {
        self.data[10..12].copy_from_slice(&offset.to_le_bytes());
    }

    fn slot(&self, slot_id: u32) -> Option<(usize, usize, u16)> {
        if slot_id >= self.slot_count() {
            return None;
        }
        let base = HEAP_HEADER_SIZE + slot_id as usize * SLOT_SIZE;
        let offset = u16::from_le_bytes(self.data[base..base + 2].try_into().unwrap()) as usize;
        let length = u16::from_le_bytes(self.data[base + 2..base + 4].try_into().unwrap()) as usize;
        let flags = u16::from_le_bytes(self.data[base + 4..base + 6].try_into().unwrap());
        Some((offset, length, flags))
    }

    fn set_slot_flags(&mut self, slot_id: u32, flags: u16) {
        let base = HEAP_HEADER_SIZE + slot_id as usize * SLOT_SIZE;
        self.data[base + 4..base + 6].copy_from_slice(&flags.to_le_bytes());
    }

    pub fn free_space(&self) -> usize {
        let directory_end = HEAP_HEADER_SIZE + self.slot_count() as usize * SLOT_SIZE;
        self.free_space_offset().saturating_sub(directory_end)
    }

    /// Bytes needed for a tuple of `len` bytes (payload plus a slot).
    pub fn required_space_for(len: usize) -> usize {
        len + SLOT_SIZE
    }

    /// Largest tuple an empty page can hold.
    pub const fn max_tuple_size() -> usize {
        PAGE_SIZE - HEAP_HEADER_SIZE - SLOT_SIZE
    }

    /// Store a tuple; returns its slot id, or None when the page is full.
    pub fn insert_tuple(&mut self, tuple: &[u8]) -> Option<u32> {
        if Self::required_space_for(tuple.len()) > self.free_space() {
            return None;
        }
        let slot_id = self.slot_count();
        let offset = self.free_space_offset() - tuple.len();
        self.data[offset..offset + tuple.len()].copy_from_slice(tuple);

        let base = HEAP_HEADER_SIZE + slot_id as usize * SLOT_SIZE;
        self.data[base..base + 2].copy_from_slice(&(offset as u16).to_le_bytes());
        self.data[base + 2..base + 4].copy_from_slice(&(tuple.len() as u16).to_le_bytes());
        self.data[base + 4..base + 6].copy_from_slice(&0u16.to_le_bytes());

        self.set_free_space_offset(offset as u16);
        self.set_slot_count(slot_id + 1);
        Some(slot_id)
    }

    /// Read a live tuple; None for out-of-range slots and tombstones.
    pub fn tuple_at(&self, slot_id: u32) -> Option<&[u8]> {
        let (offset, length, flags) = self.slot(slot_id)?;
        if flags & TOMBSTONE != 0 {
            return None;
        }
        Some(&self.data[offset..offset + length])
    }

    pub fn is_deleted(&self, slot_id: u32) -> Option<bool> {
        self.slot(slot_id).map(|(_, _, flags)| flags & TOMBSTONE != 0)
    }

    /// Set the tombstone flag. Returns false for unknown or already-deleted
    /// slots.
    pub fn mark_deleted(&mut self, slot_id: u32) -> bool {
        match self.slot(slot_id) {
            Some((_, _, flags)) if flags & TOMBSTONE == 0 => {
                self.set_slot_flags(slot_id, flags | TOMBSTONE);
                true
            }
            _ => false,
        }
    }

    /// Clear the tombstone flag (abort rollback path).
    pub fn clear_deleted(&mut self, slot_id: u32) -> bool {
        match self.slot(slot_id) {
            Some((_, _, flags)) if flags & TOMBSTONE != 0 => {
                self.set_slot_flags(slot_id, flags & !TOMBSTONE);
                true
            }
            _ => false,
        }
    }
}

impl Default for HeapPage {
    fn default() -> Self {
        Self::new()
    }
}
