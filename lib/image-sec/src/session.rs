// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The entry points a transport calls to push an image through the engine.

use chunk_buffer::{BorrowedChunk, ChunkBuffer};
use core::task::Poll;
use image_sec_api::{
    AesKeyLookup, ImageSink, PubKeyLookup, SecError, MAX_SIGNATURE_SZ,
};
use ringbuf::Ringbuf;
use static_assertions::const_assert;
use zerocopy::IntoBytes;

use crate::accountant::Windows;
use crate::config::Config;
use crate::fsm::{Effect, Machine, State, Trace, TRACE_DEPTH};
use crate::header::HEADER_MAX_SZ;

/// Arena size: the largest chunk any state gathers.
pub const ARENA_SZ: usize = MAX_SIGNATURE_SZ;
const_assert!(HEADER_MAX_SZ <= ARENA_SZ);

/// Backing store for a session's chunks, tagged with the state that is
/// filling it. Declare one `static` per concurrent session the system
/// supports.
pub type Arena = ChunkBuffer<State, ARENA_SZ>;

pub struct Session<'a, S, K, A>
where
    S: ImageSink,
    K: PubKeyLookup,
    A: AesKeyLookup,
{
    chunk: BorrowedChunk<'a, State, ARENA_SZ>,
    machine: Machine,
    sink: S,
    keys: K,
    aes_keys: A,
}

impl<'a, S, K, A> Session<'a, S, K, A>
where
    S: ImageSink,
    K: PubKeyLookup,
    A: AesKeyLookup,
{
    /// Starts verifying a new image. Fails with `BadAlloc` if `arena` is
    /// held by another session or `config` asks for chunks it cannot hold.
    pub fn init(
        arena: &'a Arena,
        sink: S,
        keys: K,
        aes_keys: A,
        config: Config,
    ) -> Result<Self, SecError> {
        config.validate()?;
        let chunk = arena
            .borrow(State::Init, 0)
            .map_err(|_| SecError::BadAlloc)?;
        Ok(Self {
            chunk,
            machine: Machine::new(config),
            sink,
            keys,
            aes_keys,
        })
    }

    /// Ends the session, wiping and releasing the arena. Dropping the
    /// session does the same.
    pub fn deinit(self) {}

    pub fn state(&self) -> State {
        self.machine.state()
    }

    pub fn is_terminal(&self) -> bool {
        self.machine.state().is_terminal()
    }

    pub fn windows(&self) -> Windows {
        self.machine.windows()
    }

    pub fn trace(&self) -> &Ringbuf<Trace, TRACE_DEPTH> {
        self.machine.trace()
    }

    /// Steps left in the signature check in flight, if any.
    pub fn rsa_steps_remaining(&self) -> Option<u16> {
        self.machine.rsa_steps_remaining()
    }

    /// Takes as much of `data` as the engine can right now, and returns
    /// how many bytes were left unconsumed along with the outcome.
    ///
    /// `Pending` means a signature check is waiting to be driven with
    /// [`Session::continue_verification`], even if every byte was taken.
    /// Hand the unconsumed tail back in once it completes.
    pub fn feed_bytes(
        &mut self,
        data: &[u8],
    ) -> (Poll<Result<(), SecError>>, usize) {
        match self.machine.state() {
            State::Bad => return (Poll::Ready(Err(SecError::Bad)), data.len()),
            State::Init if !data.is_empty() => {
                self.machine.begin();
                self.rechunk();
            }
            _ => {}
        }

        let mut rest = data;
        loop {
            if self.machine.rsa_in_flight() {
                return (Poll::Pending, rest.len());
            }
            if rest.is_empty() {
                return (Poll::Ready(Ok(())), 0);
            }
            if self.machine.state() == State::Done {
                return (Poll::Ready(Err(SecError::TooMuchData)), rest.len());
            }
            if self.chunk.capacity() == 0 {
                let err = self.poison(SecError::InvalidData);
                return (Poll::Ready(Err(err)), rest.len());
            }

            rest = self.chunk.extend_from_slice(rest);
            if self.chunk.is_full() {
                if let Err(e) = self.step() {
                    return (Poll::Ready(Err(e)), rest.len());
                }
            }
        }
    }

    /// Signals the end of the image and reports the verdict.
    pub fn feed_end(&mut self) -> Poll<Result<(), SecError>> {
        match self.machine.state() {
            State::Done => return Poll::Ready(Ok(())),
            State::Bad => return Poll::Ready(Err(SecError::Bad)),
            _ => {}
        }
        if self.machine.rsa_in_flight() {
            return Poll::Pending;
        }

        let result = self.machine.finish(self.chunk.len()).and_then(|n| {
            if n == 0 {
                return Ok(());
            }
            self.sink.write(&self.chunk[..n])
        });
        match result {
            Ok(()) => {
                self.machine.enter(State::Done);
                self.chunk.wipe();
                self.rechunk();
                Poll::Ready(Ok(()))
            }
            Err(e) => Poll::Ready(Err(self.poison(e))),
        }
    }

    /// Runs one slice of the signature check in flight.
    ///
    /// Calling this with no check in flight is a protocol error and
    /// poisons a live session.
    pub fn continue_verification(&mut self) -> Poll<Result<(), SecError>> {
        if self.machine.state().is_terminal() {
            return Poll::Ready(Err(SecError::Bad));
        }
        match self.machine.poll_rsa() {
            None => Poll::Ready(Err(self.poison(SecError::Bad))),
            Some(Poll::Pending) => Poll::Pending,
            Some(Poll::Ready(Ok(()))) => {
                self.rechunk();
                Poll::Ready(Ok(()))
            }
            Some(Poll::Ready(Err(e))) => Poll::Ready(Err(self.poison(e))),
        }
    }

    /// Hands the full chunk to the machine and carries out its answer.
    fn step(&mut self) -> Result<(), SecError> {
        let transition = match self.machine.dispatch(
            self.chunk.as_mut_slice(),
            &self.keys,
            &self.aes_keys,
        ) {
            Ok(t) => t,
            Err(e) => return Err(self.poison(e)),
        };

        let delivered = match transition.effect {
            Effect::NeedBytes(n) => {
                if n > ARENA_SZ || n <= self.chunk.len() {
                    return Err(self.poison(SecError::HeaderError));
                }
                self.chunk.grow(n);
                return Ok(());
            }
            Effect::Header(hdr) => self.sink.write(hdr.as_bytes()),
            Effect::Forward(0) | Effect::None | Effect::StartRsa => Ok(()),
            Effect::Forward(n) => self.sink.write(&self.chunk[..n]),
        };
        if let Err(e) = delivered {
            return Err(self.poison(e));
        }

        self.machine.enter(transition.next);
        self.rechunk();
        Ok(())
    }

    /// Starts a fresh chunk sized for the machine's current state. The bytes
    /// of the chunk just handled, public key included, are scrubbed.
    fn rechunk(&mut self) {
        let state = self.machine.state();
        let size = self.machine.chunk_size();
        self.chunk.reborrow(state, size);
    }

    fn poison(&mut self, err: SecError) -> SecError {
        let err = self.machine.poison(err);
        self.chunk.wipe();
        self.rechunk();
        err
    }
}

impl<S, K, A> Drop for Session<'_, S, K, A>
where
    S: ImageSink,
    K: PubKeyLookup,
    A: AesKeyLookup,
{
    fn drop(&mut self) {
        self.chunk.wipe();
    }
}
