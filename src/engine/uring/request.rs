//! Pending-operation records correlating submissions with completions.
//!
//! Each submitted operation gets a slab slot whose key is the io_uring
//! user_data token. Single-shot submissions free the record at completion;
//! multishot submissions keep it until the terminating completion. Buffers
//! move between records as ownership transfers (read buffer becomes the
//! write buffer of the echo).

use slab::Slab;
use std::os::unix::io::RawFd;

/// An in-flight operation, tagged by kind.
#[derive(Debug)]
pub enum Op {
    /// Accept on the listener socket. Multishot accepts reuse this record
    /// across completions.
    Accept { fd: RawFd },
    /// Receive on a connection. `buf` is `None` when the kernel selects a
    /// buffer from the provided ring instead.
    Read { fd: RawFd, buf: Option<Vec<u8>> },
    /// Send on a connection; `len` bytes of `buf` are in flight.
    Write { fd: RawFd, buf: Vec<u8>, len: usize },
}

/// Slab-backed table of in-flight operations, keyed by user_data token.
pub struct OpTable {
    ops: Slab<Op>,
}

impl OpTable {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ops: Slab::with_capacity(capacity),
        }
    }

    /// Allocate a record, returning its token (the user_data value).
    pub fn alloc(&mut self, op: Op) -> u64 {
        self.ops.insert(op) as u64
    }

    /// Look up a record without freeing it. Returns `None` for tokens the
    /// table does not know, e.g. kernel-generated completions at teardown.
    pub fn get(&self, token: u64) -> Option<&Op> {
        self.ops.get(token as usize)
    }

    /// Free a record, returning it (and ownership of any buffer it holds).
    pub fn free(&mut self, token: u64) -> Option<Op> {
        let idx = token as usize;
        if self.ops.contains(idx) {
            Some(self.ops.remove(idx))
        } else {
            None
        }
    }

    /// Remove and yield every remaining record, for teardown.
    pub fn drain(&mut self) -> impl Iterator<Item = Op> + '_ {
        self.ops.drain()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
