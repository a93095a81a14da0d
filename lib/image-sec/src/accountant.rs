// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Byte accounting for the signed and encrypted ranges of an image.
//!
//! Each range is a [`Window`] with two counters that only ever go down:
//! `bytes_in` counts what is still expected off the wire, and `bytes_out`
//! counts what is still to be handed downstream. The two differ when the
//! range is padded out to a cipher block: every padded byte is received,
//! but only the first `bytes_out` of them are real.

use image_sec_api::{SecError, AES_BLOCK_SZ};

/// Largest data chunk the engine gathers before acting on it.
pub const DATA_CHUNK_SZ: usize = AES_BLOCK_SZ;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Window {
    pub bytes_in: u32,
    pub bytes_out: u32,
}

impl Window {
    pub const fn new(bytes_in: u32, bytes_out: u32) -> Self {
        Self {
            bytes_in,
            bytes_out,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.bytes_in == 0
    }

    /// Takes `n` received bytes out of the window, returning how many of
    /// them are to be forwarded.
    fn take(&mut self, n: usize) -> Result<usize, SecError> {
        let n = u32::try_from(n).map_err(|_| SecError::TooMuchData)?;
        if n > self.bytes_in {
            return Err(SecError::TooMuchData);
        }
        self.bytes_in -= n;
        let fwd = n.min(self.bytes_out);
        self.bytes_out -= fwd;
        Ok(fwd as usize)
    }
}

/// Snapshot of a session's accounting. A range the image does not use is
/// `None`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Windows {
    pub signed: Option<Window>,
    pub encrypted: Option<Window>,
}

impl Windows {
    pub fn account_signed(&mut self, n: usize) -> Result<usize, SecError> {
        self.signed.as_mut().ok_or(SecError::InvalidData)?.take(n)
    }

    /// Like [`Windows::account_signed`], but `n` must also be whole cipher
    /// blocks.
    pub fn account_encrypted(&mut self, n: usize) -> Result<usize, SecError> {
        let window = self.encrypted.as_mut().ok_or(SecError::InvalidData)?;
        if n % AES_BLOCK_SZ != 0 {
            return Err(SecError::TooLittleData);
        }
        window.take(n)
    }

    /// Size of the next data chunk: one cipher block, or less if an active
    /// window has fewer bytes than that left to take.
    pub fn data_chunk(&self) -> usize {
        [self.signed, self.encrypted]
            .into_iter()
            .flatten()
            .map(|w| w.bytes_in as usize)
            .fold(DATA_CHUNK_SZ, usize::min)
    }

    /// True once every active window has taken all of its input.
    pub fn all_closed(&self) -> bool {
        [self.signed, self.encrypted]
            .into_iter()
            .flatten()
            .all(|w| w.is_closed())
    }
}
