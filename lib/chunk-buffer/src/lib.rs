// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A fixed-capacity accumulation arena for streaming parsers.
//!
//! A stream consumer that processes its input in state-dependent chunks
//! (e.g. "48 bytes of header", then "16 bytes of ciphertext", then "256
//! bytes of signature") declares a single static [`ChunkBuffer<T, N>`] sized
//! for its largest chunk. A session then borrows it as a [`BorrowedChunk`]
//! with a smaller working capacity, fills it a slice at a time, and checks
//! [`BorrowedChunk::is_full`] to learn when the chunk is complete. Moving to
//! a different state retags the borrow with [`BorrowedChunk::reborrow`];
//! growing a partially filled chunk uses [`BorrowedChunk::grow`].
//!
//! Only one borrow can exist at a time. A second `borrow` reports the tag of
//! whoever currently holds the arena.

#![cfg_attr(not(test), no_std)]

use core::{
    mem,
    ops::{Deref, DerefMut},
};
use spin::Mutex;
use spin::MutexGuard;

#[derive(Debug)]
pub struct ChunkBuffer<T, const N: usize> {
    current_owner: Mutex<Option<T>>,
    data: Mutex<[u8; N]>,
}

impl<T, const N: usize> Default for ChunkBuffer<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> ChunkBuffer<T, N> {
    pub const fn new() -> Self {
        Self {
            current_owner: Mutex::new(None),
            data: Mutex::new([0; N]),
        }
    }
}

impl<T: Clone, const N: usize> ChunkBuffer<T, N> {
    /// Borrow this arena with a working chunk capacity of `capacity`.
    ///
    /// On success, records that this arena is owned by `owner` until the
    /// returned chunk is dropped. On failure, returns the current owner.
    ///
    /// # Panics
    ///
    /// Panics if `capacity > N`.
    pub fn borrow(
        &self,
        new_owner: T,
        capacity: usize,
    ) -> Result<BorrowedChunk<'_, T, N>, T> {
        if capacity > N {
            panic!();
        }

        // Lock ordering: owner first, then data. `BorrowedChunk::drop` takes
        // them in the opposite order, which cannot deadlock because we only
        // go on to take `data` when `owner` is `None`, and `owner` stays
        // `Some(_)` until that drop has cleared it.
        let mut owner = self.current_owner.lock();
        if let Some(owner) = owner.as_ref() {
            Err(owner.clone())
        } else {
            let data = self.data.lock();
            *owner = Some(new_owner);
            mem::drop(owner);

            Ok(BorrowedChunk {
                owner: &self.current_owner,
                data,
                len: 0,
                cap: capacity,
            })
        }
    }

    /// Returns the tag of the current borrower, if any.
    pub fn owner(&self) -> Option<T> {
        self.current_owner.lock().clone()
    }
}

#[derive(Debug)]
pub struct BorrowedChunk<'a, T, const N: usize> {
    owner: &'a Mutex<Option<T>>,
    data: MutexGuard<'a, [u8; N]>,
    len: usize,
    cap: usize,
}

impl<T, const N: usize> Drop for BorrowedChunk<'_, T, N> {
    fn drop(&mut self) {
        // We hold `data` and take `owner`; see `ChunkBuffer::borrow` for why
        // the reversed order is fine.
        *self.owner.lock() = None;
    }
}

impl<T, const N: usize> BorrowedChunk<'_, T, N> {
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// True once `len() == capacity()`. A zero-capacity chunk is never full:
    /// it is not accumulating anything.
    pub fn is_full(&self) -> bool {
        self.cap != 0 && self.len == self.cap
    }

    pub fn as_slice(&self) -> &[u8] {
        self
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self
    }

    /// Extend `self` with as much of `data` as fits in the current chunk,
    /// returning any remaining data. If the returned slice is empty, all of
    /// `data` was absorbed.
    pub fn extend_from_slice<'a>(&mut self, data: &'a [u8]) -> &'a [u8] {
        let n = usize::min(data.len(), self.cap.saturating_sub(self.len));
        self.data[self.len..][..n].copy_from_slice(&data[..n]);
        self.len += n;
        &data[n..]
    }

    /// Retag the borrow and start a fresh chunk of `new_capacity` bytes,
    /// without releasing and reacquiring the arena. The bytes of the chunk
    /// being left are zeroed.
    ///
    /// # Panics
    ///
    /// Panics if `new_capacity > N`.
    pub fn reborrow(&mut self, new_owner: T, new_capacity: usize) {
        if new_capacity > N {
            panic!();
        }

        *self.owner.lock() = Some(new_owner);
        self.data[..self.len].fill(0);
        self.len = 0;
        self.cap = new_capacity;
    }

    /// Raise the threshold of the chunk currently being filled, keeping the
    /// bytes gathered so far.
    ///
    /// # Panics
    ///
    /// Panics if `new_capacity > N` or if it would drop buffered bytes.
    pub fn grow(&mut self, new_capacity: usize) {
        if new_capacity > N || new_capacity < self.len {
            panic!();
        }
        self.cap = new_capacity;
    }

    /// Zero the whole arena, not just the current chunk.
    pub fn wipe(&mut self) {
        self.data.fill(0);
        self.len = 0;
    }
}

impl<T, const N: usize> Deref for BorrowedChunk<'_, T, N> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.data[..self.len]
    }
}

impl<T, const N: usize> DerefMut for BorrowedChunk<'_, T, N> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data[..self.len]
    }
}
