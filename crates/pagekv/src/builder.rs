//! Builds PageKV files from a staged input set.
//!
//! Building runs in two phases. **Sizing** searches for the smallest page
//! count whose geometry satisfies the configured limits: candidate page
//! counts are tried in increasing order, and for each one the keys are
//! distributed by page word, the table is sized for the fullest page at a
//! 0.75 load factor, and entries are greedily packed smallest-first into
//! the per-page heap budget; the first entry that does not fit flips the
//! page to external storage for everything after it. **Placement** then
//! renders the accepted plan into bytes: heap entries packed back to
//! back, external records appended to the tail past the last page, and
//! every key's heap offset stored in the first empty slot of its probe
//! sequence.
//!
//! The schedule sorts entries by payload size with key bytes as the tie
//! break, so a build is a pure function of the input set and the
//! configuration: identical inputs produce byte-identical files.

use std::fs::{rename, OpenOptions};
use std::io::Write;
use std::path::Path;

use thiserror::Error;
use tracing::{debug, info};

use buildset::{BuildSet, DuplicateKey};
use keyhash::KeyDigest;

use crate::format::{
    encode_external_stub, encode_internal, encoded_internal_len, read_slot, write_slot, Header,
    EXTERNAL_STUB_BYTES, HEADER_BYTES, SLOT_BYTES, SLOT_EMPTY,
};

/// Hash-table load factor the sizing phase targets.
const LOAD_FACTOR: f64 = 0.75;

/// Smallest table for a non-empty page; keeps at least one slot free so
/// unsuccessful probes always hit a sentinel.
const MIN_TABLE_SLOTS: u32 = 2;

/// Sizing gives up past this many pages.
const MAX_PAGE_COUNT: u64 = 1 << 24;

/// Placement re-runs sizing with a larger table floor at most this many
/// times before surfacing [`BuildError::PlacementFailed`].
const PLACEMENT_RETRIES: u32 = 3;

/// Errors surfaced while building a file. No partial output is ever
/// emitted: every error fires before the destination file exists.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    DuplicateKey(#[from] DuplicateKey),
    /// No page geometry within bounds satisfies the configured limits;
    /// the caller must loosen the configuration.
    #[error("no page geometry satisfies the configured limits")]
    ConfigurationInfeasible,
    /// Open addressing could not place every key even after growing the
    /// table. Indicates a sizing bug, not bad input.
    #[error("open addressing could not place every key")]
    PlacementFailed,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Build-time tuning knobs. None of these are recorded in the output
/// file; they only steer the sizing search.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    small_change_bytes: u32,
    max_waste_ratio: f64,
    max_external_ratio: f64,
}

impl BuildConfig {
    pub fn new() -> Self {
        Self {
            small_change_bytes: 32 * 1024,
            max_waste_ratio: 1.0,
            max_external_ratio: 0.1,
        }
    }

    /// Upper bound on one page's footprint: the number of bytes a single
    /// ranged read is considered to cost nothing extra for. Pages may
    /// come out smaller when the input does not fill them.
    pub fn small_change_bytes(mut self, value: u32) -> Self {
        self.small_change_bytes = value;
        self
    }

    /// Upper bound on `(emitted bytes - raw payload) / raw payload`.
    pub fn max_waste_ratio(mut self, value: f64) -> Self {
        self.max_waste_ratio = value;
        self
    }

    /// Upper bound on the fraction of keys that need a second ranged
    /// read to resolve.
    pub fn max_external_ratio(mut self, value: f64) -> Self {
        self.max_external_ratio = value;
        self
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self::new()
    }
}

struct Entry {
    key: Vec<u8>,
    value: Vec<u8>,
    digest: KeyDigest,
    encoded_len: u64,
}

#[derive(Default)]
struct PagePlan {
    /// Indices into the schedule, in schedule order; the first
    /// `inline_count` are stored inline, the rest externally.
    entries: Vec<usize>,
    inline_count: usize,
}

struct Plan {
    header: Header,
    pages: Vec<PagePlan>,
    external_count: u64,
    tail_bytes: u64,
}

/// Marker for a table that could not hold its page's keys.
struct TableFull;

/// Writes a [`BuildSet`] as an immutable PageKV file.
///
/// The builder is stateless; all work happens inside the static build
/// methods. [`build_to_path`](PageFileBuilder::build_to_path) is
/// crash-safe: the image is written to a temporary file, fsynced, and
/// atomically renamed into place.
pub struct PageFileBuilder {}

impl PageFileBuilder {
    /// Builds the complete file image in memory.
    pub fn build_to_vec(set: &BuildSet, config: &BuildConfig) -> Result<Vec<u8>, BuildError> {
        let entries = stage(set)?;
        let mut min_slots = 0u32;
        for _ in 0..=PLACEMENT_RETRIES {
            let plan = size(&entries, config, min_slots)?;
            match place(&entries, &plan) {
                Ok(image) => return Ok(image),
                Err(TableFull) => {
                    min_slots = (plan.header.table_slots * 2).max(4);
                    debug!(min_slots, "table full during placement, resizing");
                }
            }
        }
        Err(BuildError::PlacementFailed)
    }

    /// Builds the file at `path`.
    ///
    /// Writes to `<path>.pkv.tmp`, calls `sync_all()`, then atomically
    /// renames. A crash mid-build leaves only the temp file behind.
    pub fn build_to_path(
        path: &Path,
        set: &BuildSet,
        config: &BuildConfig,
    ) -> Result<(), BuildError> {
        let image = Self::build_to_vec(set, config)?;
        let tmp_path = path.with_extension("pkv.tmp");
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(&image)?;
        file.flush()?;
        file.sync_all()?;
        rename(tmp_path, path)?;
        Ok(())
    }
}

/// Hashes every pair and sorts them into the smallest-first schedule.
fn stage(set: &BuildSet) -> Result<Vec<Entry>, BuildError> {
    let mut entries = Vec::with_capacity(set.len());
    for (key, value) in set.iter() {
        entries.push(Entry {
            digest: keyhash::digest(key)?,
            encoded_len: encoded_internal_len(key.len(), value.len()),
            key: key.clone(),
            value: value.clone(),
        });
    }
    entries.sort_by(|a, b| {
        (a.key.len() + a.value.len())
            .cmp(&(b.key.len() + b.value.len()))
            .then_with(|| a.key.cmp(&b.key))
    });
    Ok(entries)
}

/// Table size for a page holding `load` keys: the load factor applied,
/// then rounded up to a power of two so the probe sequence is a full
/// permutation.
fn table_slots_for(load: u32, min_slots: u32) -> u32 {
    let needed = (load as f64 / LOAD_FACTOR).ceil() as u32;
    needed.max(MIN_TABLE_SLOTS).max(min_slots).next_power_of_two()
}

/// Finds the smallest feasible page count and returns its full plan.
fn size(entries: &[Entry], config: &BuildConfig, min_slots: u32) -> Result<Plan, BuildError> {
    if entries.is_empty() {
        return Ok(Plan {
            header: Header {
                page_count: 1,
                heap_bytes: HEADER_BYTES as u32,
                table_slots: 1,
            },
            pages: vec![PagePlan::default()],
            external_count: 0,
            tail_bytes: 0,
        });
    }

    let raw_payload: u64 = entries.iter().map(|e| e.encoded_len).sum();
    let emit_limit = (1.0 + config.max_waste_ratio) * raw_payload as f64;
    let allowed_externals = config.max_external_ratio * entries.len() as f64;

    // An entry larger than the widest heap any page count can offer is
    // external at every candidate, so an over-quota count of them can be
    // rejected without searching.
    let widest_heap = (config.small_change_bytes as u64)
        .saturating_sub((SLOT_BYTES as u32 * MIN_TABLE_SLOTS) as u64);
    let never_inline = entries
        .iter()
        .filter(|e| e.encoded_len > widest_heap)
        .count() as f64;
    if never_inline > allowed_externals {
        debug!(never_inline, "oversized entries exceed the external quota");
        return Err(BuildError::ConfigurationInfeasible);
    }

    for page_count in 1..=MAX_PAGE_COUNT {
        let min_footprint =
            page_count as f64 * (HEADER_BYTES + SLOT_BYTES * MIN_TABLE_SLOTS as usize) as f64;
        if min_footprint > emit_limit {
            debug!(page_count, "page regions alone exceed the waste limit");
            break;
        }
        let (max_load, candidate) = plan_candidate(entries, config, page_count, min_slots);
        let Some(plan) = candidate else {
            debug!(page_count, "page budget exhausted by table and stubs");
            if max_load <= 1 {
                // More pages cannot shrink the per-page load any further.
                break;
            }
            continue;
        };
        let file_size = plan.header.pages_end() + plan.tail_bytes;
        if plan.external_count as f64 > allowed_externals {
            debug!(
                page_count,
                externals = plan.external_count,
                "candidate rejected: too many external entries"
            );
            continue;
        }
        if file_size as f64 > emit_limit {
            debug!(page_count, file_size, "candidate rejected: too much waste");
            continue;
        }
        info!(
            page_count,
            heap_bytes = plan.header.heap_bytes,
            table_slots = plan.header.table_slots,
            externals = plan.external_count,
            file_size,
            "selected page geometry"
        );
        return Ok(plan);
    }
    Err(BuildError::ConfigurationInfeasible)
}

/// Plans one candidate page count; `None` when the table and stubs do
/// not fit the page budget. Also reports the fullest page's key count so
/// the caller can tell whether more pages could still help.
fn plan_candidate(
    entries: &[Entry],
    config: &BuildConfig,
    page_count: u64,
    min_slots: u32,
) -> (u32, Option<Plan>) {
    let mut pages: Vec<PagePlan> = Vec::with_capacity(page_count as usize);
    pages.resize_with(page_count as usize, PagePlan::default);
    for (index, entry) in entries.iter().enumerate() {
        pages[entry.digest.page_index(page_count) as usize]
            .entries
            .push(index);
    }
    let max_load = pages.iter().map(|p| p.entries.len()).max().unwrap_or(0) as u32;

    let table_slots = table_slots_for(max_load, min_slots);
    let table_bytes = (SLOT_BYTES as u64) * table_slots as u64;
    let reserve = HEADER_BYTES as u64;
    let budget = match (config.small_change_bytes as u64).checked_sub(table_bytes) {
        Some(b) if b >= reserve + EXTERNAL_STUB_BYTES as u64 => b,
        _ => return (max_load, None),
    };

    let mut heap_bytes = reserve;
    let mut external_count = 0u64;
    let mut tail_bytes = 0u64;
    for (page_index, page) in pages.iter_mut().enumerate() {
        let mut cursor = if page_index == 0 { reserve } else { 0 };
        let mut inline = true;
        for &index in &page.entries {
            let len = entries[index].encoded_len;
            if inline && cursor + len <= budget {
                cursor += len;
                page.inline_count += 1;
            } else {
                inline = false;
                if cursor + EXTERNAL_STUB_BYTES as u64 > budget {
                    return (max_load, None);
                }
                cursor += EXTERNAL_STUB_BYTES as u64;
                external_count += 1;
                tail_bytes += len;
            }
        }
        heap_bytes = heap_bytes.max(cursor);
    }

    let header = Header {
        page_count,
        heap_bytes: heap_bytes as u32,
        table_slots,
    };
    (
        max_load,
        Some(Plan {
            header,
            pages,
            external_count,
            tail_bytes,
        }),
    )
}

/// Renders an accepted plan into the final byte image.
fn place(entries: &[Entry], plan: &Plan) -> Result<Vec<u8>, TableFull> {
    let header = &plan.header;
    let table_bytes = SLOT_BYTES * header.table_slots as usize;
    let mut image = vec![0u8; header.pages_end() as usize];
    image[..HEADER_BYTES].copy_from_slice(&header.encode());
    for page_index in 0..header.page_count {
        let table_start = (header.page_offset(page_index) + header.heap_bytes as u64) as usize;
        image[table_start..table_start + table_bytes].fill(0xFF);
    }

    let mut tail: Vec<u8> = Vec::with_capacity(plan.tail_bytes as usize);
    for (page_index, page) in plan.pages.iter().enumerate() {
        let page_start = header.page_offset(page_index as u64) as usize;
        let mut cursor = if page_index == 0 { HEADER_BYTES } else { 0 };
        let mut placed: Vec<(usize, u32)> = Vec::with_capacity(page.entries.len());

        for (rank, &index) in page.entries.iter().enumerate() {
            let entry = &entries[index];
            let heap_offset = cursor as u32;
            let mut encoded = Vec::with_capacity(entry.encoded_len as usize);
            if rank < page.inline_count {
                encode_internal(&mut encoded, &entry.key, &entry.value);
            } else {
                let record_offset = header.pages_end() + tail.len() as u64;
                let before = tail.len();
                encode_internal(&mut tail, &entry.key, &entry.value);
                encode_external_stub(&mut encoded, record_offset, (tail.len() - before) as u64);
            }
            image[page_start + cursor..page_start + cursor + encoded.len()]
                .copy_from_slice(&encoded);
            cursor += encoded.len();
            placed.push((index, heap_offset));
        }

        let table_start = page_start + header.heap_bytes as usize;
        let table = &mut image[table_start..table_start + table_bytes];
        for (index, heap_offset) in placed {
            let slot_index = entries[index]
                .digest
                .probes(header.table_slots)
                .find(|&slot| read_slot(table, slot) == SLOT_EMPTY)
                .ok_or(TableFull)?;
            write_slot(table, slot_index, heap_offset);
        }
    }
    image.extend_from_slice(&tail);
    Ok(image)
}
