//! On-disk layout of a record store region.
//!
//! ```text
//! +----------------+---------------------------+----------------------+
//! | header (64 B)  | slots (max_entries * 96B) | data area (capacity) |
//! +----------------+---------------------------+----------------------+
//! ```
//!
//! Slots form an open-addressed hash table keyed by identifier (FNV-1a,
//! linear probing, tombstones on delete). A slot's `state` byte is written
//! last when publishing and first when deleting, so a reader never sees a
//! live slot whose payload is incomplete.
//!
//! Payloads are appended at the data cursor. Once the cursor reaches the end
//! of the data area, space left behind by deleted records is reused: the
//! first gap between live payloads that fits the new one is taken.

use std::path::Path;
use std::sync::atomic::{Ordering, fence};

use crate::protocol::error::StoreError;
use crate::protocol::message::RecordKind;

pub(crate) const MAGIC: &[u8; 8] = b"SCELLST1";
pub(crate) const VERSION: u32 = 1;

pub(crate) const HEADER_SIZE: usize = 64;
pub(crate) const SLOT_SIZE: usize = 96;
pub const MAX_KEY_LEN: usize = 64;

// Header offsets.
const H_MAGIC: usize = 0;
const H_VERSION: usize = 8;
const H_MAX_ENTRIES: usize = 12;
const H_CAPACITY: usize = 16;
const H_CURSOR: usize = 24;
const H_LIVE: usize = 32;
const H_CLOSED: usize = 36;

// Slot offsets.
const S_STATE: usize = 0;
const S_KIND: usize = 1;
const S_KEY_LEN: usize = 2;
const S_OFFSET: usize = 8;
const S_LEN: usize = 16;
const S_KEY: usize = 32;

pub(crate) const SLOT_EMPTY: u8 = 0;
pub(crate) const SLOT_LIVE: u8 = 1;
pub(crate) const SLOT_TOMBSTONE: u8 = 2;

/// A record read out of a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub kind: RecordKind,
    pub payload: Vec<u8>,
}

/// Header fields of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    pub max_entries: u32,
    pub live_entries: u32,
    pub data_capacity: u64,
    /// High-water mark of the data area.
    pub data_used: u64,
    /// Bytes held by live records.
    pub live_bytes: u64,
    pub closed: bool,
}

pub(crate) fn region_len(max_entries: u32, capacity: u64) -> u64 {
    HEADER_SIZE as u64 + u64::from(max_entries) * SLOT_SIZE as u64 + capacity
}

pub(crate) fn slot_hash(key: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in key {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(bytes)
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}

/// Read-only view over a mapped region.
pub(crate) struct RegionView<'a> {
    buf: &'a [u8],
}

impl<'a> RegionView<'a> {
    /// Validates the header and slot table bounds.
    pub(crate) fn new(buf: &'a [u8], path: &Path) -> Result<Self, StoreError> {
        if buf.len() < HEADER_SIZE || &buf[H_MAGIC..H_MAGIC + 8] != MAGIC {
            return Err(StoreError::corrupt(path, "bad magic"));
        }
        let version = read_u32(buf, H_VERSION);
        if version != VERSION {
            return Err(StoreError::corrupt(path, format!("unsupported version {version}")));
        }
        let view = Self { buf };
        let expected = region_len(view.max_entries(), view.data_capacity());
        if (buf.len() as u64) < expected {
            return Err(StoreError::corrupt(
                path,
                format!("region is {} bytes, header describes {expected}", buf.len()),
            ));
        }
        Ok(view)
    }

    pub(crate) fn max_entries(&self) -> u32 {
        read_u32(self.buf, H_MAX_ENTRIES)
    }

    pub(crate) fn data_capacity(&self) -> u64 {
        read_u64(self.buf, H_CAPACITY)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.buf[H_CLOSED] != 0
    }

    pub(crate) fn stats(&self) -> StoreStats {
        StoreStats {
            max_entries: self.max_entries(),
            live_entries: read_u32(self.buf, H_LIVE),
            data_capacity: self.data_capacity(),
            data_used: self.cursor(),
            live_bytes: self.live_extents().iter().map(|(_, len)| len).sum(),
            closed: self.is_closed(),
        }
    }

    fn cursor(&self) -> u64 {
        read_u64(self.buf, H_CURSOR)
    }

    fn live_entries(&self) -> u32 {
        read_u32(self.buf, H_LIVE)
    }

    /// `(offset, len)` of every live payload, sorted by offset.
    fn live_extents(&self) -> Vec<(u64, u64)> {
        let mut extents: Vec<(u64, u64)> = (0..self.max_entries() as usize)
            .filter(|&index| self.slot_state(index) == SLOT_LIVE)
            .map(|index| {
                let slot = self.slot(index);
                (read_u64(slot, S_OFFSET), read_u64(slot, S_LEN))
            })
            .collect();
        extents.sort_unstable();
        extents
    }

    fn data_start(&self) -> usize {
        HEADER_SIZE + self.max_entries() as usize * SLOT_SIZE
    }

    fn slot(&self, index: usize) -> &'a [u8] {
        let start = HEADER_SIZE + index * SLOT_SIZE;
        &self.buf[start..start + SLOT_SIZE]
    }

    pub(crate) fn slot_state(&self, index: usize) -> u8 {
        let state = self.slot(index)[S_STATE];
        fence(Ordering::Acquire);
        state
    }

    fn slot_key(&self, index: usize) -> &'a [u8] {
        let slot = self.slot(index);
        let len = (read_u16(slot, S_KEY_LEN) as usize).min(MAX_KEY_LEN);
        &slot[S_KEY..S_KEY + len]
    }

    /// Finds the live slot holding `key`.
    pub(crate) fn find(&self, key: &[u8]) -> Option<usize> {
        let slots = self.max_entries() as usize;
        if slots == 0 {
            return None;
        }
        let start = (slot_hash(key) % slots as u64) as usize;
        for probe in 0..slots {
            let index = (start + probe) % slots;
            match self.slot_state(index) {
                SLOT_EMPTY => return None,
                SLOT_LIVE if self.slot_key(index) == key => return Some(index),
                _ => {}
            }
        }
        None
    }

    /// Copies the record held by a live slot.
    pub(crate) fn record(&self, index: usize, path: &Path) -> Result<Record, StoreError> {
        let slot = self.slot(index);
        let kind = RecordKind::from_byte(slot[S_KIND])
            .ok_or_else(|| StoreError::corrupt(path, format!("slot {index} has unknown kind")))?;
        let offset = read_u64(slot, S_OFFSET);
        let len = read_u64(slot, S_LEN);
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= self.data_capacity())
            .ok_or_else(|| StoreError::corrupt(path, format!("slot {index} points outside the data area")))?;
        let start = self.data_start() + offset as usize;
        let payload = self.buf[start..self.data_start() + end as usize].to_vec();
        Ok(Record { kind, payload })
    }
}

/// Mutable access to a mapped region, used by the writer only.
pub(crate) struct RegionMut<'a> {
    buf: &'a mut [u8],
}

impl<'a> RegionMut<'a> {
    pub(crate) fn new(buf: &'a mut [u8]) -> Self {
        Self { buf }
    }

    pub(crate) fn view(&self) -> RegionView<'_> {
        RegionView { buf: &*self.buf }
    }

    /// Writes a fresh header and clears the slot table.
    pub(crate) fn format(&mut self, max_entries: u32, capacity: u64) {
        let table_end = HEADER_SIZE + max_entries as usize * SLOT_SIZE;
        self.buf[..table_end].fill(0);
        self.buf[H_MAGIC..H_MAGIC + 8].copy_from_slice(MAGIC);
        self.buf[H_VERSION..H_VERSION + 4].copy_from_slice(&VERSION.to_le_bytes());
        self.buf[H_MAX_ENTRIES..H_MAX_ENTRIES + 4].copy_from_slice(&max_entries.to_le_bytes());
        self.buf[H_CAPACITY..H_CAPACITY + 8].copy_from_slice(&capacity.to_le_bytes());
    }

    pub(crate) fn set_closed(&mut self, closed: bool) {
        self.buf[H_CLOSED] = u8::from(closed);
    }

    fn set_cursor(&mut self, cursor: u64) {
        self.buf[H_CURSOR..H_CURSOR + 8].copy_from_slice(&cursor.to_le_bytes());
    }

    fn set_live(&mut self, live: u32) {
        self.buf[H_LIVE..H_LIVE + 4].copy_from_slice(&live.to_le_bytes());
    }

    fn slot_mut(&mut self, index: usize) -> &mut [u8] {
        let start = HEADER_SIZE + index * SLOT_SIZE;
        &mut self.buf[start..start + SLOT_SIZE]
    }

    /// Picks the slot a new key goes into.
    fn vacant_slot(&self, key: &[u8]) -> Result<usize, StoreError> {
        let view = self.view();
        let slots = view.max_entries() as usize;
        if slots == 0 {
            return Err(StoreError::Full("store has no slots".to_string()));
        }
        let start = (slot_hash(key) % slots as u64) as usize;
        let mut reusable = None;
        for probe in 0..slots {
            let index = (start + probe) % slots;
            match view.slot_state(index) {
                SLOT_EMPTY => return Ok(reusable.unwrap_or(index)),
                SLOT_TOMBSTONE => {
                    reusable.get_or_insert(index);
                }
                _ if view.slot_key(index) == key => {
                    return Err(StoreError::DuplicateKey(String::from_utf8_lossy(key).into_owned()));
                }
                _ => {}
            }
        }
        reusable.ok_or_else(|| StoreError::Full(format!("all {slots} slots are in use")))
    }

    /// Finds room for `len` payload bytes. Returns the offset to write at
    /// and the cursor to record afterwards.
    fn allocate(&self, len: u64) -> Result<(u64, u64), StoreError> {
        let view = self.view();
        let capacity = view.data_capacity();
        let cursor = view.cursor();
        if let Some(end) = cursor.checked_add(len).filter(|end| *end <= capacity) {
            return Ok((cursor, end));
        }

        // Deleted payloads are only overwritten once their slot is no longer
        // live, so readers never see a live record change under them.
        let extents = view.live_extents();
        let top = extents
            .iter()
            .map(|(offset, len)| offset.saturating_add(*len))
            .max()
            .unwrap_or(0);
        let mut gap_start = 0;
        for (offset, extent_len) in &extents {
            if offset.saturating_sub(gap_start) >= len {
                return Ok((gap_start, top));
            }
            gap_start = gap_start.max(offset.saturating_add(*extent_len));
        }
        if capacity.saturating_sub(top) >= len {
            return Ok((top, top + len));
        }

        let live: u64 = extents.iter().map(|(_, len)| len).sum();
        Err(StoreError::Full(format!(
            "{len} byte payload does not fit, {live} of {capacity} bytes held by live records"
        )))
    }

    /// Copies the payload into the data area, then publishes the slot.
    pub(crate) fn insert(&mut self, key: &[u8], kind: RecordKind, payload: &[u8]) -> Result<(), StoreError> {
        if key.len() > MAX_KEY_LEN {
            return Err(StoreError::KeyTooLong(key.len(), MAX_KEY_LEN));
        }
        let index = self.vacant_slot(key)?;

        let len = payload.len() as u64;
        let (offset, cursor) = self.allocate(len)?;
        let live = self.view().live_entries();

        let from = self.view().data_start() + offset as usize;
        self.buf[from..from + payload.len()].copy_from_slice(payload);

        let slot = self.slot_mut(index);
        slot[S_KIND] = kind.to_byte();
        slot[S_KEY_LEN..S_KEY_LEN + 2].copy_from_slice(&(key.len() as u16).to_le_bytes());
        slot[S_OFFSET..S_OFFSET + 8].copy_from_slice(&offset.to_le_bytes());
        slot[S_LEN..S_LEN + 8].copy_from_slice(&len.to_le_bytes());
        slot[S_KEY..S_KEY + MAX_KEY_LEN].fill(0);
        slot[S_KEY..S_KEY + key.len()].copy_from_slice(key);
        fence(Ordering::Release);
        slot[S_STATE] = SLOT_LIVE;

        self.set_cursor(cursor);
        self.set_live(live + 1);
        Ok(())
    }

    /// Tombstones the slot holding `key`. Returns the kind it held.
    pub(crate) fn remove(&mut self, key: &[u8]) -> Option<RecordKind> {
        let index = self.view().find(key)?;
        let kind = RecordKind::from_byte(self.view().slot(index)[S_KIND]);
        self.slot_mut(index)[S_STATE] = SLOT_TOMBSTONE;
        fence(Ordering::Release);

        let live = self.view().live_entries().saturating_sub(1);
        self.set_live(live);
        if live == 0 {
            // Nothing references the data area any more: rewind it and drop
            // the tombstones so probe chains start short again.
            let slots = self.view().max_entries() as usize;
            for slot in 0..slots {
                self.slot_mut(slot)[S_STATE] = SLOT_EMPTY;
            }
            self.set_cursor(0);
        }
        kind
    }
}
