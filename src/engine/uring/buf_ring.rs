//! Provided buffer ring for multishot receive.
//!
//! A contiguous block of fixed-size buffers plus a descriptor ring the
//! kernel reads to select a buffer per arriving message (kernel 5.19+).
//! Every buffer index is either published in the ring or borrowed by the
//! application between completion and recycle; `recycle` must be called
//! exactly once per completion that selected a buffer.

use io_uring::types::BufRingEntry;
use io_uring::IoUring;
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::io;

const PAGE_SIZE: usize = 4096;

/// A provided buffer ring registered with io_uring under a group id.
#[derive(Debug)]
pub struct BufRing {
    /// Descriptor ring the kernel consumes entries from.
    ring_ptr: *mut BufRingEntry,
    /// Base of the contiguous buffer area.
    bufs_ptr: *mut u8,
    ring_layout: Layout,
    bufs_layout: Layout,
    /// Number of ring entries; must be a power of 2.
    entries: u16,
    buf_size: usize,
    /// Local tail; published to the shared ring header on each advance.
    tail: u16,
    bgid: u16,
}

impl BufRing {
    /// Allocate `entries` buffers of `buf_size` bytes, register the ring
    /// under `bgid`, and publish every buffer to the kernel.
    pub fn new(ring: &IoUring, entries: u16, buf_size: usize, bgid: u16) -> io::Result<Self> {
        if !entries.is_power_of_two() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "ring entries must be a power of 2",
            ));
        }

        let ring_size = std::mem::size_of::<BufRingEntry>() * entries as usize;
        let ring_layout = Layout::from_size_align(ring_size, PAGE_SIZE)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let bufs_size = buf_size * entries as usize;
        let bufs_layout = Layout::from_size_align(bufs_size, PAGE_SIZE)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let ring_ptr = unsafe { alloc_zeroed(ring_layout) as *mut BufRingEntry };
        if ring_ptr.is_null() {
            return Err(io::Error::new(
                io::ErrorKind::OutOfMemory,
                "failed to allocate buffer ring",
            ));
        }

        let bufs_ptr = unsafe { alloc_zeroed(bufs_layout) };
        if bufs_ptr.is_null() {
            unsafe { dealloc(ring_ptr as *mut u8, ring_layout) };
            return Err(io::Error::new(
                io::ErrorKind::OutOfMemory,
                "failed to allocate buffers",
            ));
        }

        let mut buf_ring = Self {
            ring_ptr,
            bufs_ptr,
            ring_layout,
            bufs_layout,
            entries,
            buf_size,
            tail: 0,
            bgid,
        };

        // Publish all buffers, indices 0..entries, in one tail advance.
        for bid in 0..entries {
            buf_ring.write_entry(bid);
        }
        buf_ring.publish();

        // On registration failure Drop releases the allocations.
        unsafe {
            ring.submitter()
                .register_buf_ring_with_flags(ring_ptr as u64, entries, bgid, 0)?;
        }

        Ok(buf_ring)
    }

    pub fn bgid(&self) -> u16 {
        self.bgid
    }

    pub fn buffer_size(&self) -> usize {
        self.buf_size
    }

    /// The buffer the kernel selected for a completion, by index.
    pub fn buffer(&self, bid: u16) -> &[u8] {
        debug_assert!(bid < self.entries, "buffer index out of bounds");
        unsafe {
            std::slice::from_raw_parts(
                self.bufs_ptr.add(bid as usize * self.buf_size),
                self.buf_size,
            )
        }
    }

    /// Return a buffer to the ring once its bytes have been copied out.
    pub fn recycle(&mut self, bid: u16) {
        self.write_entry(bid);
        self.publish();
    }

    fn write_entry(&mut self, bid: u16) {
        let idx = (self.tail & (self.entries - 1)) as usize;
        unsafe {
            let entry = self.ring_ptr.add(idx);
            (*entry).set_addr(self.bufs_ptr.add(bid as usize * self.buf_size) as u64);
            (*entry).set_len(self.buf_size as u32);
            (*entry).set_bid(bid);
        }
        self.tail = self.tail.wrapping_add(1);
    }

    /// Make written entries visible to the kernel via the shared tail.
    fn publish(&mut self) {
        unsafe {
            let tail_ptr = BufRingEntry::tail(self.ring_ptr) as *mut u16;
            std::ptr::write_volatile(tail_ptr, self.tail);
        }
    }

    /// Unregister the ring from the kernel. Must happen before the ring's
    /// memory is released, on every exit path.
    pub fn unregister(&self, ring: &IoUring) -> io::Result<()> {
        ring.submitter().unregister_buf_ring(self.bgid)
    }
}

impl Drop for BufRing {
    fn drop(&mut self) {
        unsafe {
            dealloc(self.bufs_ptr, self.bufs_layout);
            dealloc(self.ring_ptr as *mut u8, self.ring_layout);
        }
    }
}

// The ring is owned by a single engine thread and never shared.
unsafe impl Send for BufRing {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_unregister() {
        // Requires a working io_uring with buffer-ring support.
        let ring = match IoUring::new(8) {
            Ok(r) => r,
            Err(_) => return,
        };
        let mut buf_ring = match BufRing::new(&ring, 8, 512, 7) {
            Ok(b) => b,
            Err(_) => return,
        };

        assert_eq!(buf_ring.bgid(), 7);
        assert_eq!(buf_ring.buffer_size(), 512);
        assert_eq!(buf_ring.buffer(3).len(), 512);

        buf_ring.recycle(3);
        buf_ring.unregister(&ring).unwrap();
    }

    #[test]
    fn test_entries_must_be_power_of_two() {
        let ring = match IoUring::new(8) {
            Ok(r) => r,
            Err(_) => return,
        };
        let err = BufRing::new(&ring, 6, 512, 7).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
