// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Incremental crypto used by the state machine.
//!
//! The machine runs two hashes at once over different ranges of the stream,
//! decrypts one of those ranges in place, and checks signatures a slice at a
//! time. None of the primitives are implemented here; these are the
//! start/update/finish wrappers the machine drives them through.

use aes::cipher::{BlockDecrypt, KeyInit};
use aes::{Aes256Dec, Block};
use core::mem;
use core::task::Poll;
use image_sec_api::{AesKey, SecError, AES_BLOCK_SZ, SHA256_SZ};
use rsa_pubop::PublicOp;
use sha2::{Digest as _, Sha256};
use zeroize::Zeroize;

pub type Digest = [u8; SHA256_SZ];

pub fn sha256(data: &[u8]) -> Digest {
    Sha256::digest(data).into()
}

enum HashState {
    Idle,
    Running(Sha256),
}

/// A SHA-256 that has to be explicitly started before it accepts data, and
/// goes back to idle when finished.
pub struct RunningHash {
    state: HashState,
}

impl Default for RunningHash {
    fn default() -> Self {
        Self::new()
    }
}

impl RunningHash {
    pub const fn new() -> Self {
        Self {
            state: HashState::Idle,
        }
    }

    pub fn start(&mut self) {
        self.state = HashState::Running(Sha256::new());
    }

    pub fn update(&mut self, data: &[u8]) -> Result<(), SecError> {
        match &mut self.state {
            HashState::Running(h) => {
                h.update(data);
                Ok(())
            }
            HashState::Idle => Err(SecError::InvalidData),
        }
    }

    pub fn finish(&mut self) -> Result<Digest, SecError> {
        match mem::replace(&mut self.state, HashState::Idle) {
            HashState::Running(h) => Ok(h.finalize().into()),
            HashState::Idle => Err(SecError::InvalidData),
        }
    }
}

/// AES-256-CBC decryption, one or more whole blocks at a time.
pub struct CbcDecryptor {
    cipher: Aes256Dec,
    prev: [u8; AES_BLOCK_SZ],
}

impl CbcDecryptor {
    /// Keys the cipher. Our copy of the key is wiped before returning; the
    /// key schedule is wiped when the decryptor is dropped.
    pub fn new(mut key: AesKey, iv: [u8; AES_BLOCK_SZ]) -> Self {
        let cipher = Aes256Dec::new((&key).into());
        key.zeroize();
        Self { cipher, prev: iv }
    }

    pub fn decrypt_in_place(&mut self, data: &mut [u8]) -> Result<(), SecError> {
        if data.len() % AES_BLOCK_SZ != 0 {
            return Err(SecError::TooLittleData);
        }
        for chunk in data.chunks_exact_mut(AES_BLOCK_SZ) {
            let mut ct = [0u8; AES_BLOCK_SZ];
            ct.copy_from_slice(chunk);

            let mut block = Block::from(ct);
            self.cipher.decrypt_block(&mut block);
            for ((p, d), c) in chunk.iter_mut().zip(block.iter()).zip(&self.prev)
            {
                *p = d ^ c;
            }
            self.prev = ct;
        }
        Ok(())
    }
}

/// One signature block being checked: the RSA operation in flight, what
/// the recovered hash has to be, and what the next block must sign if this
/// one checks out.
pub struct SignatureCheck {
    op: PublicOp,
    expected: Digest,
    key_digest: Digest,
}

impl SignatureCheck {
    pub fn new(signature: &[u8], modulus: &[u8], expected: Digest) -> Self {
        Self {
            op: PublicOp::new(signature, modulus),
            expected,
            key_digest: sha256(modulus),
        }
    }

    pub fn steps_remaining(&self) -> u16 {
        self.op.steps_remaining()
    }

    /// Advances the check by up to `budget` steps. On success, yields the
    /// digest of this block's public key.
    pub fn poll(&mut self, budget: u16) -> Poll<Result<Digest, SecError>> {
        let em = match self.op.poll(budget) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Err(_)) => {
                return Poll::Ready(Err(SecError::SigDecodeFail))
            }
            Poll::Ready(Ok(em)) => em,
        };
        let Some(hash) = rsa_pubop::verify_padding(&em) else {
            return Poll::Ready(Err(SecError::SigDecodeFail));
        };
        if hash != self.expected {
            return Poll::Ready(Err(SecError::SigVerifyFail));
        }
        Poll::Ready(Ok(self.key_digest))
    }
}
