// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ring buffer for tracing stateful engines
//!
//! A [`Ringbuf`] is a small, fixed-size record of the most recent events an
//! engine went through, intended to be read from a debugger or from a test.
//! Unlike a log, it never allocates and never blocks, so it is safe to
//! record into from any code path, including failure paths.
//!
//! The ring is an ordinary value: an engine that can have several instances
//! (one per in-flight session, say) embeds one in each instance rather than
//! sharing a global.
//!
//! ## Constraints
//!
//! The payload type must implement both `Copy` and `PartialEq`.
//!
//! ## Recording
//!
//! ```
//! use ringbuf::{ringbuf_entry, Ringbuf};
//!
//! #[derive(Copy, Clone, Debug, PartialEq)]
//! enum Trace {
//!     None,
//!     Start,
//!     Read(u8),
//! }
//!
//! let mut trace = Ringbuf::<Trace, 8>::new(Trace::None);
//! ringbuf_entry!(trace, Trace::Start);
//! for _ in 0..2 {
//!     ringbuf_entry!(trace, Trace::Read(3));
//! }
//! // Same payload, but recorded from a different line.
//! ringbuf_entry!(trace, Trace::Read(3));
//!
//! let counts: Vec<u32> = trace.iter().map(|e| e.count).collect();
//! assert_eq!(counts, [1, 2, 1]);
//! ```
//!
//! When an entry is generated with an identical payload from the same line
//! as the most recent entry, the `count` of that entry is bumped instead of
//! a new slot being consumed.

#![no_std]

/// Inserts data into a ring buffer value.
///
/// `ringbuf_entry!(buf, expr)` records `expr` in `buf`, tagged with the line
/// number of the macro invocation. `buf` is any place expression of type
/// [`Ringbuf`], e.g. `self.trace`.
#[cfg(not(feature = "disabled"))]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        // Evaluate the payload before taking the mutable borrow, so that the
        // payload may read from the same structure that owns the ring.
        let p = $payload;
        $crate::Ringbuf::entry(&mut $buf, line!() as u16, p);
    }};
}

#[cfg(feature = "disabled")]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        let _ = &$buf;
        let _ = &$payload;
    }};
}

///
/// The structure of a single [`Ringbuf`] entry, carrying a payload of arbitrary
/// type.
///
#[derive(Debug, Copy, Clone)]
pub struct RingbufEntry<T: Copy + PartialEq> {
    pub line: u16,
    pub generation: u16,
    pub count: u32,
    pub payload: T,
}

///
/// A ring buffer of parametrized type and size.
///
#[derive(Debug, Clone)]
pub struct Ringbuf<T: Copy + PartialEq, const N: usize> {
    last: Option<usize>,
    buffer: [RingbufEntry<T>; N],
}

impl<T: Copy + PartialEq, const N: usize> Ringbuf<T, { N }> {
    /// Creates an empty ring with every slot initialized to `init`.
    pub const fn new(init: T) -> Self {
        Self {
            last: None,
            buffer: [RingbufEntry {
                line: 0,
                generation: 0,
                count: 0,
                payload: init,
            }; N],
        }
    }

    pub fn entry(&mut self, line: u16, payload: T) {
        // On the first insertion `last` is None; treating it as an
        // out-of-range index makes the lookup below miss and the wrap below
        // land on slot 0.
        let last = self.last.unwrap_or(usize::MAX);

        if let Some(ent) = self.buffer.get_mut(last) {
            if ent.line == line && ent.payload == payload {
                // Only reuse this entry if we don't overflow the count.
                if let Some(new_count) = ent.count.checked_add(1) {
                    ent.count = new_count;
                    return;
                }
            }
        }

        let ndx = {
            let last_plus_1 = last.wrapping_add(1);
            // Deliberately not a remainder: this also turns usize::MAX into 0.
            if last_plus_1 >= self.buffer.len() {
                0
            } else {
                last_plus_1
            }
        };

        let Some(ent) = self.buffer.get_mut(ndx) else {
            // Only reachable for a zero-sized ring.
            return;
        };
        *ent = RingbufEntry {
            line,
            payload,
            count: 1,
            generation: ent.generation.wrapping_add(1),
        };

        self.last = Some(ndx);
    }

    /// The most recently recorded entry.
    pub fn last_entry(&self) -> Option<&RingbufEntry<T>> {
        self.buffer.get(self.last?)
    }

    /// Recorded entries, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &RingbufEntry<T>> + '_ {
        let start = self.last.map_or(0, |l| l + 1);
        let (newer, older) = self.buffer.split_at(start.min(N));
        older
            .iter()
            .chain(newer.iter())
            .filter(|ent| ent.count != 0)
    }

    /// True if any recorded entry carries `payload`.
    pub fn contains(&self, payload: &T) -> bool {
        self.iter().any(|ent| ent.payload == *payload)
    }
}
