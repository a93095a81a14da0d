// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Time-sliced RSA public-key operation.
//!
//! Raising a 2048-bit signature to the public exponent is too slow to do in
//! one go on a part that has one execution context and other work to do. A
//! [`PublicOp`] carries its own progress cursor and does at most a caller
//! chosen number of steps per [`PublicOp::poll`], so the caller can return to
//! its scheduler between slices.
//!
//! With `e = 65537 = 2^16 + 1` the operation is one load step, sixteen
//! modular squarings and one modular multiply, for [`PublicOp::TOTAL_STEPS`]
//! in all. The load step always ends its slice, so the first poll of any
//! operation is `Pending`.
//!
//! Integers come in little-endian, the order images carry them in. The
//! recovered message is handed back big-endian at the modulus length, the
//! order PKCS#1 padding is defined in; see [`verify_padding`].

#![cfg_attr(not(test), no_std)]

extern crate alloc;

use alloc::vec;
use alloc::vec::Vec;
use core::mem;
use core::task::Poll;
use num_bigint::BigUint;

pub const PUBLIC_EXPONENT: u32 = 65537;

const SQUARINGS: u16 = 16;

/// Length of the digest carried in a padded message.
pub const HASH_SZ: usize = 32;

/// Minimum run of `0xFF` padding bytes.
const MIN_PAD: usize = 8;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RsaError {
    /// Signature and modulus differ in length, or are empty.
    BadLength,
    /// Modulus is even or has a zero most significant byte.
    BadModulus,
    /// Signature is not less than the modulus.
    SignatureOutOfRange,
    /// `poll` was called again after returning `Ready`.
    Finished,
}

enum Cursor {
    Load {
        signature: Vec<u8>,
        modulus: Vec<u8>,
    },
    Square {
        base: BigUint,
        acc: BigUint,
        modulus: BigUint,
        done: u16,
    },
    Multiply {
        base: BigUint,
        acc: BigUint,
        modulus: BigUint,
    },
    Finished,
}

pub struct PublicOp {
    len: usize,
    steps_done: u16,
    cursor: Cursor,
}

impl PublicOp {
    pub const TOTAL_STEPS: u16 = 1 + SQUARINGS + 1;

    /// Sets up `signature^65537 mod modulus`. Nothing is computed or
    /// validated until the first poll.
    pub fn new(signature_le: &[u8], modulus_le: &[u8]) -> Self {
        Self {
            len: modulus_le.len(),
            steps_done: 0,
            cursor: Cursor::Load {
                signature: signature_le.to_vec(),
                modulus: modulus_le.to_vec(),
            },
        }
    }

    pub fn steps_remaining(&self) -> u16 {
        Self::TOTAL_STEPS - self.steps_done
    }

    /// Runs up to `budget` steps (at least one). Returns the recovered
    /// message once the last step has run.
    pub fn poll(&mut self, budget: u16) -> Poll<Result<Vec<u8>, RsaError>> {
        let mut budget = budget.max(1);

        loop {
            match mem::replace(&mut self.cursor, Cursor::Finished) {
                Cursor::Load { signature, modulus } => {
                    let (base, modulus) = match load(&signature, &modulus) {
                        Ok(v) => v,
                        Err(e) => return Poll::Ready(Err(e)),
                    };
                    self.steps_done += 1;
                    self.cursor = Cursor::Square {
                        acc: base.clone(),
                        base,
                        modulus,
                        done: 0,
                    };
                    return Poll::Pending;
                }
                Cursor::Square {
                    base,
                    acc,
                    modulus,
                    done,
                } => {
                    let acc = (&acc * &acc) % &modulus;
                    let done = done + 1;
                    self.cursor = if done == SQUARINGS {
                        Cursor::Multiply { base, acc, modulus }
                    } else {
                        Cursor::Square {
                            base,
                            acc,
                            modulus,
                            done,
                        }
                    };
                }
                Cursor::Multiply { base, acc, modulus } => {
                    let m = (&acc * &base) % &modulus;
                    self.steps_done += 1;
                    return Poll::Ready(Ok(to_be_padded(&m, self.len)));
                }
                Cursor::Finished => {
                    return Poll::Ready(Err(RsaError::Finished));
                }
            }

            self.steps_done += 1;
            budget -= 1;
            if budget == 0 {
                return Poll::Pending;
            }
        }
    }
}

fn load(
    signature: &[u8],
    modulus: &[u8],
) -> Result<(BigUint, BigUint), RsaError> {
    if modulus.is_empty() || signature.len() != modulus.len() {
        return Err(RsaError::BadLength);
    }
    let odd = modulus.first().is_some_and(|b| b & 1 != 0);
    let full_width = modulus.last().is_some_and(|&b| b != 0);
    if !odd || !full_width {
        return Err(RsaError::BadModulus);
    }

    let base = BigUint::from_bytes_le(signature);
    let modulus = BigUint::from_bytes_le(modulus);
    if base >= modulus {
        return Err(RsaError::SignatureOutOfRange);
    }
    Ok((base, modulus))
}

fn to_be_padded(m: &BigUint, len: usize) -> Vec<u8> {
    let bytes = m.to_bytes_be();
    // m < modulus, so it never needs more than `len` bytes.
    let mut out = vec![0; len.saturating_sub(bytes.len())];
    out.extend_from_slice(&bytes);
    out
}

/// Checks a recovered message for `00 01 FF.. 00 || H` and returns `H`.
pub fn verify_padding(em: &[u8]) -> Option<&[u8]> {
    if em.len() < 3 + MIN_PAD + HASH_SZ {
        return None;
    }
    let (pad, hash) = em.split_at(em.len() - HASH_SZ);
    let (prefix, rest) = pad.split_at(2);
    let (ff, sep) = rest.split_at(rest.len() - 1);

    if prefix != [0x00, 0x01] || sep != [0x00] {
        return None;
    }
    if ff.len() < MIN_PAD || ff.iter().any(|&b| b != 0xff) {
        return None;
    }
    Some(hash)
}
