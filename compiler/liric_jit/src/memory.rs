//! RW-then-flip-to-RX code/data regions (spec §4.7): every chunk starts
//! writable so the lowering/patch passes can fill it in, then gets
//! flipped to executable once a begin/end update batch finishes so no
//! half-patched function is ever callable.

use region::Protection;

const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug)]
pub enum MemError {
    Region(region::Error),
    OutOfSpace,
}

impl std::fmt::Display for MemError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemError::Region(e) => write!(f, "region allocation failed: {e}"),
            MemError::OutOfSpace => write!(f, "chunk has no room left for this write"),
        }
    }
}

impl std::error::Error for MemError {}

impl From<region::Error> for MemError {
    fn from(e: region::Error) -> Self {
        MemError::Region(e)
    }
}

struct Chunk {
    alloc: region::Allocation,
    used: usize,
    flipped: bool,
}

impl Chunk {
    fn new(size: usize) -> Result<Self, MemError> {
        let alloc = region::alloc(size, Protection::READ_WRITE)?;
        Ok(Chunk {
            alloc,
            used: 0,
            flipped: false,
        })
    }

    fn remaining(&self) -> usize {
        self.alloc.len() - self.used
    }

    fn base(&self) -> *mut u8 {
        self.alloc.as_ptr::<u8>() as *mut u8
    }
}

/// A growable set of chunks, each independently RW while being filled and
/// flipped to RX once sealed. A function's code never straddles two
/// chunks: [`MemRegion::write`] starts a fresh chunk if the current one
/// has no room, so every [`CompiledFunction`] body lands in one
/// contiguous, independently-protectable allocation.
///
/// [`CompiledFunction`]: liric_codegen_ssa::backend::CompiledFunction
pub struct MemRegion {
    chunks: Vec<Chunk>,
    chunk_size: usize,
}

impl MemRegion {
    pub fn new() -> Self {
        MemRegion {
            chunks: Vec::new(),
            chunk_size: CHUNK_SIZE,
        }
    }

    fn grow(&mut self, min_size: usize) -> Result<(), MemError> {
        let size = min_size.max(self.chunk_size);
        self.chunks.push(Chunk::new(size)?);
        Ok(())
    }

    /// Copies `bytes` into writable space and returns its absolute address.
    /// Fails only if the underlying `mmap` fails; there is no upper bound
    /// on how many chunks accumulate over a process's lifetime, matching
    /// the cache's "never evicts" policy (spec §4.7).
    pub fn write(&mut self, bytes: &[u8]) -> Result<*mut u8, MemError> {
        let needs_fresh_chunk = match self.chunks.last() {
            None => true,
            Some(chunk) => chunk.flipped || chunk.remaining() < bytes.len(),
        };
        if needs_fresh_chunk {
            self.grow(bytes.len())?;
        }
        let chunk = self.chunks.last_mut().unwrap();
        if chunk.flipped {
            return Err(MemError::OutOfSpace);
        }
        let dst = unsafe { chunk.base().add(chunk.used) };
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, bytes.len());
        }
        chunk.used += bytes.len();
        Ok(dst)
    }

    /// Patches `len` bytes at `addr` in place. Only valid before the
    /// owning chunk has been flipped to executable; the JIT never
    /// patches a function after its first call becomes possible, since a
    /// begin/end batch flips only once all intra-batch forward
    /// references are resolved.
    ///
    /// # Safety
    /// `addr` must point `len` bytes into a chunk still owned by this
    /// region and not yet flipped to executable.
    pub unsafe fn patch(&mut self, addr: *mut u8, data: &[u8]) {
        std::ptr::copy_nonoverlapping(data.as_ptr(), addr, data.len());
    }

    /// Flips every not-yet-flipped chunk from RW to RX. Called once per
    /// begin/end update batch (spec §4.7): nothing becomes callable until
    /// every function touched by the batch has had its patches applied.
    pub fn flip_all(&mut self) -> Result<(), MemError> {
        for chunk in &mut self.chunks {
            if chunk.flipped {
                continue;
            }
            unsafe {
                region::protect(chunk.base(), chunk.alloc.len(), Protection::READ_EXECUTE)?;
            }
            chunk.flipped = true;
        }
        Ok(())
    }

    /// Reopens every chunk for writing. Needed when a later batch patches
    /// a GOT-style indirection cell inside an already-flipped chunk
    /// (spec §4.7's "transitive callers" case): the cell itself is data,
    /// not code, but it shares a chunk with executable bytes.
    pub fn unflip_all(&mut self) -> Result<(), MemError> {
        for chunk in &mut self.chunks {
            if !chunk.flipped {
                continue;
            }
            unsafe {
                region::protect(chunk.base(), chunk.alloc.len(), Protection::READ_WRITE)?;
            }
            chunk.flipped = false;
        }
        Ok(())
    }
}

impl Default for MemRegion {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_flip_round_trips_bytes() {
        let mut region = MemRegion::new();
        let code = [0x90u8, 0x90, 0xC3];
        let addr = region.write(&code).unwrap();
        region.flip_all().unwrap();
        let read = unsafe { std::slice::from_raw_parts(addr, code.len()) };
        assert_eq!(read, &code);
    }

    #[test]
    fn write_after_flip_starts_a_fresh_chunk() {
        let mut region = MemRegion::new();
        region.write(&[0x90]).unwrap();
        region.flip_all().unwrap();
        let after = region.write(&[0xC3]).unwrap();
        let read = unsafe { std::slice::from_raw_parts(after, 1) };
        assert_eq!(read, &[0xC3]);
    }

    #[test]
    fn write_spans_fresh_chunk_when_current_is_full() {
        let mut region = MemRegion::new();
        region.chunk_size = 8;
        let first = region.write(&[1, 2, 3, 4]).unwrap();
        let second = region.write(&[5, 6, 7, 8, 9, 10]).unwrap();
        assert_ne!(first, second);
    }
}
