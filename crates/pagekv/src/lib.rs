//! # PageKV: page-structured immutable key/value files
//!
//! PageKV files are built once from a fully known input set and then only
//! ever read. The layout is tuned for high-latency, byte-range-capable
//! transports (a static object behind HTTP range requests, a file on cold
//! storage): resolving a key costs **one ranged read** of a fixed-size
//! page, or two when the value was too large to inline.
//!
//! ## File layout (v1)
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │ PAGE 0                                           │
//! │ ┌──────────────────────────────────────────────┐ │
//! │ │ HEAP  [0, heap_bytes)                        │ │
//! │ │   bytes [0, 24): file header (reserved)      │ │
//! │ │   entries packed back-to-back:               │ │
//! │ │     internal: vl(klen+1) vl(vlen) key value  │ │
//! │ │     external: vl(0) offset(u64) length(u64)  │ │
//! │ ├──────────────────────────────────────────────┤ │
//! │ │ TABLE [heap_bytes, page_size)                │ │
//! │ │   table_slots × u32 LE heap offsets          │ │
//! │ │   0xFFFFFFFF = empty                         │ │
//! │ └──────────────────────────────────────────────┘ │
//! ├──────────────────────────────────────────────────┤
//! │ PAGE 1 .. PAGE page_count-1 (same shape)         │
//! ├──────────────────────────────────────────────────┤
//! │ TAIL: internal-form records referenced by        │
//! │ external stubs                                   │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian; `vl(x)` is a `lesqlite2` varint. A
//! key's page is `page_word mod page_count` of its 128-bit MurmurHash3
//! digest; within the page an open-addressing probe sequence seeded by
//! the digest's other half locates its slot (see the `keyhash` crate).
//!
//! ## Building and reading
//!
//! ```no_run
//! use buildset::BuildSet;
//! use pagekv::{BuildConfig, PageFileBuilder, PageFileReader};
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut set = BuildSet::new();
//! set.insert(b"hello".to_vec(), b"world".to_vec())?;
//! PageFileBuilder::build_to_path(
//!     "greetings.pkv".as_ref(),
//!     &set,
//!     &BuildConfig::new(),
//! )?;
//!
//! let file = std::fs::File::open("greetings.pkv")?;
//! let mut reader = PageFileReader::open(file)?;
//! assert_eq!(reader.lookup(b"hello")?, Some(b"world".to_vec()));
//! # Ok(())
//! # }
//! ```

mod builder;
mod format;
mod reader;
mod source;
mod varint;

pub use builder::{BuildConfig, BuildError, PageFileBuilder};
pub use format::{
    decode_entry, encode_external_stub, encode_internal, encoded_internal_len, Header, HeapEntry,
    ReadError, EXTERNAL_STUB_BYTES, FORMAT_MAGIC, FORMAT_VERSION, HEADER_BYTES, SLOT_BYTES,
    SLOT_EMPTY,
};
pub use reader::PageFileReader;
pub use source::ByteSource;
pub use varint::{read_varint, varint_len, write_varint, MAX_VARINT_BYTES};
