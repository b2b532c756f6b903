use crate::aligned_buf::{AlignedBuf, alloc_aligned};
use crate::error::CopyError;
use crate::request::BufferView;

/// Fixed pool of `n_blocks` aligned, `block_size`-sized buffers, plus a
/// stack of free block indices. `alloc`/`free` are O(1) and never touch
/// the global allocator once constructed. A block is tracked by index,
/// not by pointer, so a foreign or already-free pointer is rejected
/// instead of corrupting the free stack.
///
/// Backing storage is allocated aligned to `block_size` itself (not a fixed
/// constant), so every block the arena hands out is aligned to `block_size`
/// regardless of how large the caller configures it — satisfying an actual
/// device's O_DIRECT alignment (typically 512 or 4096 bytes, but the arena
/// doesn't assume an upper bound) falls out of that directly. The arena
/// only requires `block_size` to be a nonzero power of two; see
/// [`crate::config::RingConfig::validate`] for the additional checks a real
/// direct-I/O caller should apply before construction.
pub struct Arena {
    storage: AlignedBuf,
    block_size: usize,
    n_blocks: usize,
    free: Vec<u32>,
    is_free: Vec<bool>,
}

impl Arena {
    pub fn new(n_blocks: usize, block_size: usize) -> Result<Self, CopyError> {
        if block_size == 0 || !block_size.is_power_of_two() {
            return Err(CopyError::Invalid("block_size must be a nonzero power of two"));
        }
        let storage = alloc_aligned(n_blocks * block_size, block_size);
        Ok(Self {
            storage,
            block_size,
            n_blocks,
            free: (0..n_blocks as u32).collect(),
            is_free: vec![true; n_blocks],
        })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Pop a free block. `Exhausted` if none remain; for a correctly sized
    /// arena (`n_blocks == RQ_CAP + WQ_CAP`) this never happens in practice.
    pub fn alloc(&mut self) -> Result<BufferView, CopyError> {
        let idx = self.free.pop().ok_or(CopyError::Exhausted)?;
        self.is_free[idx as usize] = false;
        let ptr = unsafe { self.storage.as_mut_ptr().add(idx as usize * self.block_size) };
        Ok(BufferView {
            ptr,
            len: self.block_size,
        })
    }

    /// Return a block to the pool. Rejects any pointer that isn't exactly
    /// one of the blocks this arena produced, and rejects a double free.
    pub fn free(&mut self, buf: BufferView) -> Result<(), CopyError> {
        let base = self.storage.as_ptr() as usize;
        let ptr = buf.ptr as usize;
        if ptr < base || (ptr - base) % self.block_size != 0 {
            return Err(CopyError::Invalid("freed buffer is not at an arena block boundary"));
        }
        let idx = (ptr - base) / self.block_size;
        if idx >= self.n_blocks {
            return Err(CopyError::Invalid("freed buffer lies outside the arena"));
        }
        if self.is_free[idx] {
            return Err(CopyError::Invalid("double free of arena block"));
        }
        self.is_free[idx] = true;
        self.free.push(idx as u32);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_and_free_roundtrip() {
        let mut arena = Arena::new(4, 512).unwrap();
        assert_eq!(arena.free_count(), 4);
        let a = arena.alloc().unwrap();
        let b = arena.alloc().unwrap();
        assert_eq!(arena.free_count(), 2);
        arena.free(a).unwrap();
        arena.free(b).unwrap();
        assert_eq!(arena.free_count(), 4);
    }

    #[test]
    fn alloc_exhausted() {
        let mut arena = Arena::new(1, 512).unwrap();
        let buf = arena.alloc().unwrap();
        assert!(matches!(arena.alloc(), Err(CopyError::Exhausted)));
        arena.free(buf).unwrap();
        assert!(arena.alloc().is_ok());
    }

    #[test]
    fn free_rejects_double_free() {
        let mut arena = Arena::new(2, 512).unwrap();
        let buf = arena.alloc().unwrap();
        arena.free(buf).unwrap();
        assert!(matches!(arena.free(buf), Err(CopyError::Invalid(_))));
    }

    #[test]
    fn free_rejects_unaligned_pointer() {
        let mut arena = Arena::new(2, 512).unwrap();
        let mut buf = arena.alloc().unwrap();
        buf.ptr = unsafe { buf.ptr.add(1) };
        assert!(matches!(arena.free(buf), Err(CopyError::Invalid(_))));
    }

    #[test]
    fn free_rejects_foreign_pointer() {
        let mut arena = Arena::new(2, 512).unwrap();
        let mut foreign = vec![0u8; 512];
        let buf = BufferView {
            ptr: foreign.as_mut_ptr(),
            len: 512,
        };
        assert!(matches!(arena.free(buf), Err(CopyError::Invalid(_))));
    }

    #[test]
    fn rejects_bad_block_size() {
        assert!(matches!(Arena::new(2, 300), Err(CopyError::Invalid(_))));
        assert!(matches!(Arena::new(2, 0), Err(CopyError::Invalid(_))));
        assert!(Arena::new(2, 256).is_ok());
    }
}
