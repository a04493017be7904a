//! Device-owned aligned storage buffers
//!
//! On the CPU device a storage buffer is a plain heap block; the byte-level
//! set/copy primitives that would be DMA transfers on other device types are
//! in-process copies here.

use std::alloc::{self, Layout};
use std::fmt;
use std::mem;
use std::ptr::NonNull;
use std::slice;

/// Alignment of every storage buffer, in bytes.
pub const STORAGE_ALIGN: usize = 16;

/// A cache-line aligned byte buffer owned by a compute device.
pub struct StorageBuffer {
    base: NonNull<u8>,
    size: usize,
    alignment: usize,
}

// Workers write disjoint shards of a buffer during a compute phase and the
// pool barrier publishes the writes before anyone reads them back.
unsafe impl Send for StorageBuffer {}
unsafe impl Sync for StorageBuffer {}

impl StorageBuffer {
    /// Allocate a zeroable block of `size` bytes aligned to [`STORAGE_ALIGN`].
    pub(crate) fn alloc(size: usize) -> Self {
        assert!(size > 0, "storage allocation of zero bytes");
        let layout = Layout::from_size_align(size, STORAGE_ALIGN)
            .expect("invalid storage layout");
        let base = unsafe { alloc::alloc(layout) };
        let base = match NonNull::new(base) {
            Some(ptr) => ptr,
            None => alloc::handle_alloc_error(layout),
        };
        StorageBuffer {
            base,
            size,
            alignment: STORAGE_ALIGN,
        }
    }

    /// Base address of the block.
    pub fn base_addr(&self) -> usize {
        self.base.as_ptr() as usize
    }

    /// Size of the block in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Alignment of the block in bytes.
    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// Fill `[offs, size)` with `x`.
    pub fn set(&mut self, offs: usize, x: u8) {
        assert!(offs <= self.size, "storage set out of bounds");
        unsafe {
            self.base.as_ptr().add(offs).write_bytes(x, self.size - offs);
        }
    }

    /// Copy `src` into the buffer starting at byte offset `offs`.
    pub fn copy_in(&mut self, offs: usize, src: &[u8]) {
        assert!(
            offs + src.len() <= self.size,
            "storage copy_in out of bounds"
        );
        unsafe {
            self.base
                .as_ptr()
                .add(offs)
                .copy_from_nonoverlapping(src.as_ptr(), src.len());
        }
    }

    /// Copy `dst.len()` bytes out of the buffer starting at byte offset `offs`.
    pub fn copy_out(&self, offs: usize, dst: &mut [u8]) {
        assert!(
            offs + dst.len() <= self.size,
            "storage copy_out out of bounds"
        );
        unsafe {
            self.base
                .as_ptr()
                .add(offs)
                .copy_to_nonoverlapping(dst.as_mut_ptr(), dst.len());
        }
    }

    /// View the whole buffer as `f32` elements.
    pub fn as_f32(&self) -> &[f32] {
        debug_assert_eq!(self.size % mem::size_of::<f32>(), 0);
        unsafe {
            slice::from_raw_parts(
                self.base.as_ptr().cast::<f32>(),
                self.size / mem::size_of::<f32>(),
            )
        }
    }

    /// Mutable view of `len` `f32` elements starting at element `offset`.
    ///
    /// # Safety
    ///
    /// The caller must guarantee that `[offset, offset + len)` is in bounds
    /// and that no other live reference overlaps the range. Kernels uphold
    /// this by writing only the shard owned by their `thread_idx`.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn f32_shard_mut(&self, offset: usize, len: usize) -> &mut [f32] {
        debug_assert!((offset + len) * mem::size_of::<f32>() <= self.size);
        slice::from_raw_parts_mut(self.base.as_ptr().cast::<f32>().add(offset), len)
    }
}

impl fmt::Debug for StorageBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageBuffer")
            .field("base", &self.base.as_ptr())
            .field("size", &self.size)
            .field("alignment", &self.alignment)
            .finish()
    }
}

impl Drop for StorageBuffer {
    fn drop(&mut self) {
        let layout = Layout::from_size_align(self.size, self.alignment)
            .expect("invalid storage layout");
        unsafe {
            alloc::dealloc(self.base.as_ptr(), layout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_is_aligned() {
        let buf = StorageBuffer::alloc(64);
        assert_eq!(buf.base_addr() % STORAGE_ALIGN, 0);
        assert_eq!(buf.size(), 64);
        assert_eq!(buf.alignment(), STORAGE_ALIGN);
    }

    #[test]
    fn test_set_fills_tail() {
        let mut buf = StorageBuffer::alloc(8);
        buf.set(0, 0);
        buf.set(4, 0xAB);

        let mut bytes = [0u8; 8];
        buf.copy_out(0, &mut bytes);
        assert_eq!(bytes, [0, 0, 0, 0, 0xAB, 0xAB, 0xAB, 0xAB]);
    }

    #[test]
    fn test_copy_roundtrip() {
        let mut buf = StorageBuffer::alloc(16);
        buf.set(0, 0);
        buf.copy_in(4, &[1, 2, 3, 4]);

        let mut out = [0u8; 4];
        buf.copy_out(4, &mut out);
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    #[should_panic(expected = "copy_in out of bounds")]
    fn test_copy_in_out_of_bounds() {
        let mut buf = StorageBuffer::alloc(8);
        buf.copy_in(6, &[1, 2, 3, 4]);
    }

    #[test]
    #[should_panic(expected = "copy_out out of bounds")]
    fn test_copy_out_out_of_bounds() {
        let buf = StorageBuffer::alloc(8);
        let mut dst = [0u8; 16];
        buf.copy_out(0, &mut dst);
    }

    #[test]
    #[should_panic(expected = "zero bytes")]
    fn test_zero_size_alloc_panics() {
        let _ = StorageBuffer::alloc(0);
    }
}
