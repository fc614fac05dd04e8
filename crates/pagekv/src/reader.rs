//! Point lookups against a built PageKV file.

use tracing::trace;

use crate::format::{
    decode_entry, read_slot, Header, HeapEntry, ReadError, HEADER_BYTES, SLOT_EMPTY,
};
use crate::source::ByteSource;

/// Reads a PageKV file for point lookups.
///
/// On [`open`](PageFileReader::open) the 24-byte header is fetched once,
/// validated, and cached; after that every lookup costs exactly one
/// ranged read for the key's page, plus a second read when the entry is
/// stored externally. The reader never mutates the source and keeps no
/// per-lookup state, so lookups can be issued back to back indefinitely.
#[derive(Debug)]
pub struct PageFileReader<S: ByteSource> {
    source: S,
    header: Header,
}

impl<S: ByteSource> PageFileReader<S> {
    /// Opens a PageKV file backed by `source`.
    ///
    /// # Errors
    ///
    /// [`ReadError::MalformedHeader`] if the source is shorter than a
    /// header or the magic, version, or geometry are invalid.
    pub fn open(mut source: S) -> Result<Self, ReadError> {
        let bytes = source.read_at(0, HEADER_BYTES as u64)?;
        let header = Header::decode(&bytes)?;
        Ok(Self { source, header })
    }

    /// The cached file header.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Looks up `key`, returning its value or `None` if absent.
    ///
    /// # Errors
    ///
    /// Corruption surfaces as [`ReadError::SlotOutOfRange`] or
    /// [`ReadError::MalformedHeapEntry`]; a missing key is `Ok(None)`,
    /// never an error.
    pub fn lookup(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, ReadError> {
        let digest = keyhash::digest(key)?;
        let page_index = digest.page_index(self.header.page_count);
        let page = self.fetch_page(page_index)?;
        let heap_end = self.header.heap_bytes as usize;
        let (heap, table) = page.split_at(heap_end);

        for slot_index in digest.probes(self.header.table_slots) {
            let slot = read_slot(table, slot_index);
            if slot == SLOT_EMPTY {
                return Ok(None);
            }
            self.check_slot(page_index, slot)?;
            match decode_entry(heap, slot as usize)? {
                HeapEntry::Internal { key: found, value } => {
                    if found == key {
                        return Ok(Some(value));
                    }
                    // Mismatch under open addressing: keep probing.
                }
                HeapEntry::External { offset, length } => {
                    if let Some(value) = self.fetch_external(offset, length, key)? {
                        return Ok(Some(value));
                    }
                }
            }
        }
        Ok(None)
    }

    fn fetch_page(&mut self, index: u64) -> Result<Vec<u8>, ReadError> {
        let page_size = self.header.page_size();
        let page = self
            .source
            .read_at(self.header.page_offset(index), page_size)?;
        if (page.len() as u64) < page_size {
            return Err(ReadError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("page {} truncated", index),
            )));
        }
        Ok(page)
    }

    fn check_slot(&self, page_index: u64, slot: u32) -> Result<(), ReadError> {
        if slot >= self.header.heap_bytes {
            return Err(ReadError::SlotOutOfRange(slot));
        }
        // Page 0's heap prefix is the file header.
        if page_index == 0 && (slot as usize) < HEADER_BYTES {
            return Err(ReadError::SlotOutOfRange(slot));
        }
        Ok(())
    }

    fn fetch_external(
        &mut self,
        offset: u64,
        length: u64,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>, ReadError> {
        trace!(offset, length, "following external entry");
        let bytes = self.source.read_at(offset, length)?;
        if (bytes.len() as u64) < length {
            return Err(ReadError::MalformedHeapEntry(
                "truncated external record".to_string(),
            ));
        }
        match decode_entry(&bytes, 0)? {
            HeapEntry::Internal { key: found, value } => {
                if found == key {
                    Ok(Some(value))
                } else {
                    Ok(None)
                }
            }
            HeapEntry::External { .. } => Err(ReadError::MalformedHeapEntry(
                "recursive external reference".to_string(),
            )),
        }
    }
}
