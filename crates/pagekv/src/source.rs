//! Random-access byte sources for the reader.

use std::io::{self, Read, Seek, SeekFrom};

/// A byte source the reader can issue ranged reads against.
///
/// This is the seam where transports plug in: a local file, an in-memory
/// buffer, or anything that can serve "give me `length` bytes starting at
/// `offset`" (an HTTP range client, say). A read past the end of the
/// source returns a short buffer rather than an error; the codec layer
/// rejects short data where it matters.
pub trait ByteSource {
    fn read_at(&mut self, offset: u64, length: u64) -> io::Result<Vec<u8>>;
}

impl<T: Read + Seek> ByteSource for T {
    fn read_at(&mut self, offset: u64, length: u64) -> io::Result<Vec<u8>> {
        self.seek(SeekFrom::Start(offset))?;
        let mut out = Vec::new();
        self.take(length).read_to_end(&mut out)?;
        Ok(out)
    }
}
