// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The verification state machine.
//!
//! The machine never sees the byte stream directly. The session gathers
//! bytes into chunks of [`Machine::chunk_size`] and hands each complete
//! chunk to [`Machine::dispatch`], which does the hashing, decryption and
//! accounting for it and answers with a [`Transition`]: the state to move to
//! and what the session has to do with the chunk before moving there.
//!
//! Any error is fatal. The session reports it through [`Machine::poison`]
//! and the machine stays in [`State::Bad`] for good.

use core::task::Poll;
use heapless::Vec;
use image_sec_api::{
    AesKeyLookup, CommonHeader, PubKeyLookup, SecError, AES_BLOCK_SZ,
    MAX_SIGNATURE_SZ, VERIFY_BLOCK_SZ,
};
use ringbuf::{ringbuf_entry, Ringbuf};

use crate::accountant::{Window, Windows};
use crate::config::{Config, TrustPolicy};
use crate::crypto::{CbcDecryptor, Digest, RunningHash, SignatureCheck};
use crate::header::{self, Headers, Parse, IMAGE_HEADER_SZ};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum State {
    Init,
    ReceivingHeaders,
    ReceivingData,
    VerifyingPlaintext,
    ReceivingSignatureHash,
    ReceivingSignaturePublicKey,
    Done,
    Bad,
}

impl State {
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Done | State::Bad)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Effect {
    None,
    /// Keep what has been gathered and wait until the chunk is this long.
    /// The state does not change.
    NeedBytes(usize),
    /// Deliver the normalized header to the sink.
    Header(CommonHeader),
    /// Deliver the first `n` bytes of the chunk, now plaintext, to the sink.
    Forward(usize),
    /// A signature check has been armed and must be driven to completion
    /// before any more bytes are taken.
    StartRsa,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Transition {
    pub next: State,
    pub effect: Effect,
}

impl Transition {
    fn to(next: State, effect: Effect) -> Self {
        Self { next, effect }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Trace {
    None,
    State(State),
    Header { signed: bool, encrypted: bool },
    KeyLookup { trusted: bool },
    RsaStart,
    RsaSlice { remaining: u16 },
    SignatureOk,
    PlaintextDigest { matched: bool },
    Failed(SecError),
}

pub const TRACE_DEPTH: usize = 16;

pub struct Machine {
    config: Config,
    state: State,
    windows: Windows,
    /// Hash of the signed range: headers, then the body as received.
    signed_hash: RunningHash,
    /// Hash of the forwarded plaintext of the encrypted range.
    plain_hash: RunningHash,
    decryptor: Option<CbcDecryptor>,
    last_digest: Digest,
    signature: Vec<u8, MAX_SIGNATURE_SZ>,
    rsa: Option<SignatureCheck>,
    trusted: bool,
    trace: Ringbuf<Trace, TRACE_DEPTH>,
}

impl Machine {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            state: State::Init,
            windows: Windows::default(),
            signed_hash: RunningHash::new(),
            plain_hash: RunningHash::new(),
            decryptor: None,
            last_digest: [0; 32],
            signature: Vec::new(),
            rsa: None,
            trusted: false,
            trace: Ringbuf::new(Trace::None),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn windows(&self) -> Windows {
        self.windows
    }

    pub fn trace(&self) -> &Ringbuf<Trace, TRACE_DEPTH> {
        &self.trace
    }

    pub fn rsa_in_flight(&self) -> bool {
        self.rsa.is_some()
    }

    pub fn rsa_steps_remaining(&self) -> Option<u16> {
        self.rsa.as_ref().map(SignatureCheck::steps_remaining)
    }

    /// Bytes to gather before the next [`Machine::dispatch`]. Zero means
    /// the machine takes no bytes in its current state.
    pub fn chunk_size(&self) -> usize {
        match self.state {
            State::ReceivingHeaders => IMAGE_HEADER_SZ,
            State::ReceivingData => self.windows.data_chunk(),
            State::VerifyingPlaintext => VERIFY_BLOCK_SZ,
            State::ReceivingSignatureHash => self.config.signature_len(),
            State::ReceivingSignaturePublicKey if self.rsa.is_none() => {
                self.config.signature_len()
            }
            State::ReceivingSignaturePublicKey
            | State::Init
            | State::Done
            | State::Bad => 0,
        }
    }

    pub fn enter(&mut self, next: State) {
        if next != self.state {
            ringbuf_entry!(self.trace, Trace::State(next));
        }
        self.state = next;
    }

    /// Leaves the session's first state once there are bytes to take.
    pub fn begin(&mut self) {
        if self.state == State::Init {
            self.enter(State::ReceivingHeaders);
        }
    }

    /// Drops everything in flight and parks the machine in `Bad`. Returns
    /// `err` for convenience.
    pub fn poison(&mut self, err: SecError) -> SecError {
        ringbuf_entry!(self.trace, Trace::Failed(err));
        self.rsa = None;
        self.decryptor = None;
        self.signature.clear();
        self.enter(State::Bad);
        err
    }

    /// Processes one complete chunk.
    pub fn dispatch(
        &mut self,
        chunk: &mut [u8],
        keys: &dyn PubKeyLookup,
        aes_keys: &dyn AesKeyLookup,
    ) -> Result<Transition, SecError> {
        match self.state {
            State::ReceivingHeaders => self.on_headers(chunk, aes_keys),
            State::ReceivingData => self.on_data(chunk),
            State::VerifyingPlaintext => self.on_plaintext_digest(chunk),
            State::ReceivingSignatureHash => self.on_signature(chunk),
            State::ReceivingSignaturePublicKey if self.rsa.is_none() => {
                self.on_public_key(chunk, keys)
            }
            State::ReceivingSignaturePublicKey
            | State::Init
            | State::Done
            | State::Bad => Err(SecError::Bad),
        }
    }

    fn on_headers(
        &mut self,
        chunk: &[u8],
        aes_keys: &dyn AesKeyLookup,
    ) -> Result<Transition, SecError> {
        let hdrs = match header::parse(chunk)? {
            Parse::NeedMore(n) => {
                return Ok(Transition::to(self.state, Effect::NeedBytes(n)))
            }
            Parse::Parsed(hdrs) => hdrs,
        };
        ringbuf_entry!(
            self.trace,
            Trace::Header {
                signed: hdrs.is_signed(),
                encrypted: hdrs.is_encrypted(),
            }
        );

        if self.config.require_signature && !hdrs.is_signed() {
            return Err(SecError::SigVerifyFail);
        }
        self.open_windows(&hdrs, chunk, aes_keys)?;

        let next = self.after_data()?;
        Ok(Transition::to(next, Effect::Header(hdrs.common_header())))
    }

    fn open_windows(
        &mut self,
        hdrs: &Headers,
        chunk: &[u8],
        aes_keys: &dyn AesKeyLookup,
    ) -> Result<(), SecError> {
        if let Some(sign) = hdrs.sign {
            self.signed_hash.start();
            self.signed_hash.update(chunk)?;
            let len = sign.app_data_len.get();
            self.windows.signed = Some(Window::new(len, len));
        }

        if let Some(encr) = hdrs.encr {
            let key = aes_keys.aes_key(encr.key_id.get())?;
            self.decryptor = Some(CbcDecryptor::new(key, encr.iv));
            self.plain_hash.start();

            let data_len = encr.data_len.get();
            let padded = data_len
                .checked_next_multiple_of(AES_BLOCK_SZ as u32)
                .ok_or(SecError::InvalidData)?;
            self.windows.encrypted = Some(Window::new(padded, data_len));

            if let Some(signed) = self.windows.signed {
                // The signed range is the ciphertext plus the plaintext
                // digest trailer, and nothing else.
                let expected = padded
                    .checked_add(VERIFY_BLOCK_SZ as u32)
                    .ok_or(SecError::InvalidData)?;
                if expected != signed.bytes_out {
                    return Err(SecError::InvalidData);
                }
            }
        }
        Ok(())
    }

    fn on_data(&mut self, chunk: &mut [u8]) -> Result<Transition, SecError> {
        let mut fwd = chunk.len();

        if self.windows.signed.is_some() {
            fwd = self.windows.account_signed(chunk.len())?;
            self.signed_hash.update(chunk)?;
        }
        if let Some(dec) = &mut self.decryptor {
            fwd = self.windows.account_encrypted(chunk.len())?;
            dec.decrypt_in_place(chunk)?;
            self.plain_hash.update(&chunk[..fwd])?;
        }

        let next = self.after_data()?;
        Ok(Transition::to(next, Effect::Forward(fwd)))
    }

    fn on_plaintext_digest(
        &mut self,
        chunk: &[u8],
    ) -> Result<Transition, SecError> {
        if self.windows.signed.is_some() {
            self.windows.account_signed(chunk.len())?;
            self.signed_hash.update(chunk)?;
        }

        let digest = self.plain_hash.finish()?;
        self.decryptor = None;
        let matched = digest[..] == *chunk;
        ringbuf_entry!(self.trace, Trace::PlaintextDigest { matched });
        if !matched && self.config.enforce_plaintext_digest {
            return Err(SecError::VerifyFailed);
        }

        if self.windows.signed.is_none() {
            return Ok(Transition::to(State::Done, Effect::None));
        }
        match self.close_signed()? {
            Some(next) => Ok(Transition::to(next, Effect::None)),
            None => Err(SecError::InvalidData),
        }
    }

    fn on_signature(&mut self, chunk: &[u8]) -> Result<Transition, SecError> {
        self.signature.clear();
        self.signature
            .extend_from_slice(chunk)
            .map_err(|_| SecError::InvalidData)?;
        Ok(Transition::to(
            State::ReceivingSignaturePublicKey,
            Effect::None,
        ))
    }

    fn on_public_key(
        &mut self,
        chunk: &[u8],
        keys: &dyn PubKeyLookup,
    ) -> Result<Transition, SecError> {
        let trusted = keys.is_trusted(chunk)?;
        ringbuf_entry!(self.trace, Trace::KeyLookup { trusted });
        self.trusted = match self.config.trust_policy {
            TrustPolicy::LastKey => trusted,
            TrustPolicy::AnyKey => self.trusted || trusted,
        };

        self.rsa = Some(SignatureCheck::new(
            &self.signature,
            chunk,
            self.last_digest,
        ));
        ringbuf_entry!(self.trace, Trace::RsaStart);
        Ok(Transition::to(
            State::ReceivingSignaturePublicKey,
            Effect::StartRsa,
        ))
    }

    /// Where to go once a header or data chunk has been taken: the
    /// encrypted range closes into its digest check; otherwise the signed
    /// range closes into the signature blocks.
    fn after_data(&mut self) -> Result<State, SecError> {
        if self.windows.encrypted.is_some_and(|w| w.is_closed()) {
            return Ok(State::VerifyingPlaintext);
        }
        Ok(self.close_signed()?.unwrap_or(State::ReceivingData))
    }

    fn close_signed(&mut self) -> Result<Option<State>, SecError> {
        match self.windows.signed {
            Some(w) if w.is_closed() => {
                self.last_digest = self.signed_hash.finish()?;
                Ok(Some(State::ReceivingSignatureHash))
            }
            _ => Ok(None),
        }
    }

    /// Runs one slice of the signature check in flight, if there is one.
    pub fn poll_rsa(&mut self) -> Option<Poll<Result<(), SecError>>> {
        let check = self.rsa.as_mut()?;
        let result = match check.poll(self.config.rsa_steps_per_slice) {
            Poll::Pending => {
                let remaining = check.steps_remaining();
                ringbuf_entry!(self.trace, Trace::RsaSlice { remaining });
                return Some(Poll::Pending);
            }
            Poll::Ready(r) => r,
        };

        self.rsa = None;
        self.signature.clear();
        Some(Poll::Ready(result.map(|key_digest| {
            ringbuf_entry!(self.trace, Trace::SignatureOk);
            // A following block must sign the key we just used.
            self.last_digest = key_digest;
            self.enter(State::ReceivingSignatureHash);
        })))
    }

    /// Decides the end of the stream. `buffered` is the number of bytes
    /// gathered towards a chunk that never completed; on success, returns
    /// how many of them are to be forwarded.
    pub fn finish(&mut self, buffered: usize) -> Result<usize, SecError> {
        match self.state {
            State::ReceivingData if self.windows.all_closed() => {
                // Neither signed nor encrypted: whatever came is the image.
                Ok(buffered)
            }
            State::ReceivingSignatureHash if buffered == 0 => {
                if self.trusted {
                    Ok(0)
                } else {
                    Err(SecError::SigRootUnknown)
                }
            }
            State::Done => Ok(0),
            State::Bad => Err(SecError::Bad),
            _ => Err(SecError::TooLittleData),
        }
    }
}
