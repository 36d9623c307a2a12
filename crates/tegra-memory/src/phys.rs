//! Guest physical RAM backends.
//!
//! RAM accessors are fallible: they report accesses past the end of RAM instead of truncating
//! them. The infallible engine-facing view lives in [`crate::bus`].

use std::collections::BTreeMap;
use std::ops::Range;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuestMemoryError {
    #[error("access 0x{paddr:x}+{len} is outside guest RAM (size 0x{size:x})")]
    OutOfRange { paddr: u64, len: usize, size: u64 },
    #[error("guest RAM size 0x{size:x} is not addressable on this host")]
    SizeTooLarge { size: u64 },
    #[error("chunk size {chunk_size} must be a non-zero power of two")]
    InvalidChunkSize { chunk_size: usize },
}

pub type GuestMemoryResult<T> = Result<T, GuestMemoryError>;

/// Byte-addressed guest physical RAM.
pub trait GuestMemory {
    fn size(&self) -> u64;

    fn read_into(&self, paddr: u64, dst: &mut [u8]) -> GuestMemoryResult<()>;

    fn write_from(&mut self, paddr: u64, src: &[u8]) -> GuestMemoryResult<()>;

    fn read_u32_le(&self, paddr: u64) -> GuestMemoryResult<u32> {
        let mut word = [0u8; 4];
        self.read_into(paddr, &mut word)?;
        Ok(u32::from_le_bytes(word))
    }

    fn write_u32_le(&mut self, paddr: u64, value: u32) -> GuestMemoryResult<()> {
        self.write_from(paddr, &value.to_le_bytes())
    }
}

impl<T: GuestMemory + ?Sized> GuestMemory for Box<T> {
    fn size(&self) -> u64 {
        (**self).size()
    }

    fn read_into(&self, paddr: u64, dst: &mut [u8]) -> GuestMemoryResult<()> {
        (**self).read_into(paddr, dst)
    }

    fn write_from(&mut self, paddr: u64, src: &[u8]) -> GuestMemoryResult<()> {
        (**self).write_from(paddr, src)
    }
}

/// Validates `paddr..paddr + len` against a RAM of `size` bytes and returns it.
fn span(size: u64, paddr: u64, len: usize) -> GuestMemoryResult<Range<u64>> {
    let out_of_range = GuestMemoryError::OutOfRange { paddr, len, size };
    match paddr.checked_add(len as u64) {
        Some(end) if end <= size => Ok(paddr..end),
        _ => Err(out_of_range),
    }
}

/// RAM held in one contiguous host allocation.
#[derive(Debug, Clone)]
pub struct DenseMemory {
    bytes: Vec<u8>,
}

impl DenseMemory {
    pub fn new(size: u64) -> GuestMemoryResult<Self> {
        let len = usize::try_from(size).map_err(|_| GuestMemoryError::SizeTooLarge { size })?;
        Ok(Self {
            bytes: vec![0; len],
        })
    }

    fn host_range(&self, paddr: u64, len: usize) -> GuestMemoryResult<Range<usize>> {
        // `span` bounds the range by `bytes.len()`, so both ends fit in usize.
        let range = span(self.size(), paddr, len)?;
        Ok(range.start as usize..range.end as usize)
    }
}

impl GuestMemory for DenseMemory {
    fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn read_into(&self, paddr: u64, dst: &mut [u8]) -> GuestMemoryResult<()> {
        let range = self.host_range(paddr, dst.len())?;
        dst.copy_from_slice(&self.bytes[range]);
        Ok(())
    }

    fn write_from(&mut self, paddr: u64, src: &[u8]) -> GuestMemoryResult<()> {
        let range = self.host_range(paddr, src.len())?;
        self.bytes[range].copy_from_slice(src);
        Ok(())
    }
}

/// RAM whose chunks are allocated on first write.
///
/// Large guest address spaces are mostly untouched by a GPU workload; unwritten chunks read back
/// as zero and cost nothing.
#[derive(Debug, Clone)]
pub struct SparseMemory {
    size: u64,
    chunk_shift: u32,
    chunks: BTreeMap<u64, Box<[u8]>>,
}

/// One chunk-local piece of a RAM access.
struct Piece {
    chunk: u64,
    chunk_offset: usize,
    buf_offset: usize,
    len: usize,
}

impl SparseMemory {
    pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

    pub fn new(size: u64) -> GuestMemoryResult<Self> {
        Self::with_chunk_size(size, Self::DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(size: u64, chunk_size: usize) -> GuestMemoryResult<Self> {
        if !chunk_size.is_power_of_two() {
            return Err(GuestMemoryError::InvalidChunkSize { chunk_size });
        }
        Ok(Self {
            size,
            chunk_shift: chunk_size.trailing_zeros(),
            chunks: BTreeMap::new(),
        })
    }

    pub fn chunk_size(&self) -> usize {
        1 << self.chunk_shift
    }

    pub fn allocated_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// Splits a validated range into chunk-local pieces.
    fn pieces(&self, range: Range<u64>) -> impl Iterator<Item = Piece> {
        let shift = self.chunk_shift;
        let mask = (1u64 << shift) - 1;
        let start = range.start;
        let mut cur = range.start;
        std::iter::from_fn(move || {
            if cur >= range.end {
                return None;
            }
            let chunk_end = ((cur >> shift) + 1) << shift;
            let end = chunk_end.min(range.end);
            let piece = Piece {
                chunk: cur >> shift,
                chunk_offset: (cur & mask) as usize,
                buf_offset: (cur - start) as usize,
                len: (end - cur) as usize,
            };
            cur = end;
            Some(piece)
        })
    }
}

impl GuestMemory for SparseMemory {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_into(&self, paddr: u64, dst: &mut [u8]) -> GuestMemoryResult<()> {
        let range = span(self.size, paddr, dst.len())?;
        for piece in self.pieces(range) {
            let out = &mut dst[piece.buf_offset..piece.buf_offset + piece.len];
            match self.chunks.get(&piece.chunk) {
                Some(chunk) => {
                    out.copy_from_slice(&chunk[piece.chunk_offset..piece.chunk_offset + piece.len])
                }
                None => out.fill(0),
            }
        }
        Ok(())
    }

    fn write_from(&mut self, paddr: u64, src: &[u8]) -> GuestMemoryResult<()> {
        let range = span(self.size, paddr, src.len())?;
        let chunk_size = self.chunk_size();
        for piece in self.pieces(range) {
            let chunk = self
                .chunks
                .entry(piece.chunk)
                .or_insert_with(|| vec![0; chunk_size].into_boxed_slice());
            chunk[piece.chunk_offset..piece.chunk_offset + piece.len]
                .copy_from_slice(&src[piece.buf_offset..piece.buf_offset + piece.len]);
        }
        Ok(())
    }
}
