// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Streaming verification and decryption of application images.
//!
//! An image arrives as a byte stream in pieces of whatever size the
//! transport likes: a header, a body that may be signed, encrypted or both,
//! and a chain of RSA signature blocks. A [`Session`] takes the stream a
//! piece at a time, hands the verified plaintext to an
//! [`ImageSink`](image_sec_api::ImageSink) as it goes, and gives its verdict
//! at the end.
//!
//! Checking a signature is slow, so it is not done inside
//! [`Session::feed_bytes`]. When a signature block has been read the
//! session answers `Poll::Pending`, and the caller drives the check with
//! [`Session::continue_verification`] until it completes, running its other
//! work in between.
//!
//! ```ignore
//! static ARENA: Arena = Arena::new();
//!
//! let mut session = Session::init(&ARENA, sink, keys, aes_keys, Config::new())?;
//! let mut rest = packet;
//! loop {
//!     match session.feed_bytes(rest) {
//!         (Poll::Ready(r), _) => break r?,
//!         (Poll::Pending, left) => {
//!             while session.continue_verification().is_pending() {
//!                 yield_to_scheduler();
//!             }
//!             rest = &rest[rest.len() - left..];
//!         }
//!     }
//! }
//! ```

#![cfg_attr(not(test), no_std)]

pub mod accountant;
pub mod config;
pub mod crypto;
pub mod fsm;
pub mod header;
pub mod session;

pub use accountant::{Window, Windows};
pub use config::{Config, TrustPolicy};
pub use fsm::{State, Trace};
pub use image_sec_api::SecError;
pub use session::{Arena, Session, ARENA_SZ};
