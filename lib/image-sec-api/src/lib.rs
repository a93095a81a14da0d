// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! API crate for the image verification engine.
//!
//! This holds the pieces that both the engine and the code embedding it need
//! to agree on: the error taxonomy, the collaborator traits the engine calls
//! out to, the framing sizes, and the normalized header the engine hands to
//! its sink ahead of the payload.

#![no_std]

use core::mem::size_of;
use num_derive::FromPrimitive;
use static_assertions::const_assert_eq;
use zerocopy::byteorder::{LittleEndian, U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

pub const SHA256_SZ: usize = 32;
pub const AES_BLOCK_SZ: usize = 16;
pub const AES_KEY_SZ: usize = 32;

/// Size of the plaintext digest trailer that closes an encrypted range.
pub const VERIFY_BLOCK_SZ: usize = SHA256_SZ;

/// Smallest modulus that still fits `00 01 FF{8} 00 || SHA-256`.
pub const MIN_SIGNATURE_SZ: usize = 64;
pub const MAX_SIGNATURE_SZ: usize = 512;
pub const DEFAULT_SIGNATURE_SZ: usize = 256;

pub type AesKey = [u8; AES_KEY_SZ];

/// Errors produced while verifying an image.
///
/// The discriminants are the codes the engine has always reported to its
/// host, and are stable. There is deliberately no "need more time" member:
/// that condition is `Poll::Pending`, not a failure.
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u32)]
pub enum SecError {
    KeyNotFound = 2,
    HeaderError = 3,
    TooMuchData = 4,
    TooLittleData = 5,
    SigVerifyFail = 6,
    SigDecodeFail = 7,
    SigRootUnknown = 8,
    BadAlloc = 9,
    InvalidData = 10,
    VerifyFailed = 11,
    Bad = 127,
}

impl SecError {
    pub fn from_code(code: u32) -> Option<Self> {
        num_traits::FromPrimitive::from_u32(code)
    }
}

impl From<SecError> for u32 {
    fn from(e: SecError) -> Self {
        e as u32
    }
}

/// Receives the verified (and, if applicable, decrypted) image, in order.
///
/// The first write is always a [`CommonHeader`].
pub trait ImageSink {
    fn write(&mut self, data: &[u8]) -> Result<(), SecError>;
}

/// Decides whether a public key modulus (as carried in the image, i.e.
/// little-endian) is a trusted root.
pub trait PubKeyLookup {
    fn is_trusted(&self, modulus: &[u8]) -> Result<bool, SecError>;
}

/// Fetches the AES-256 key an encrypted image names. Implementations return
/// [`SecError::KeyNotFound`] for unknown ids.
pub trait AesKeyLookup {
    fn aes_key(&self, key_id: u64) -> Result<AesKey, SecError>;
}

impl<T: ImageSink + ?Sized> ImageSink for &mut T {
    fn write(&mut self, data: &[u8]) -> Result<(), SecError> {
        (**self).write(data)
    }
}

impl<T: PubKeyLookup + ?Sized> PubKeyLookup for &T {
    fn is_trusted(&self, modulus: &[u8]) -> Result<bool, SecError> {
        (**self).is_trusted(modulus)
    }
}

impl<T: AesKeyLookup + ?Sized> AesKeyLookup for &T {
    fn aes_key(&self, key_id: u64) -> Result<AesKey, SecError> {
        (**self).aes_key(key_id)
    }
}

/// Kind of payload an image carries.
#[derive(Copy, Clone, Debug, Eq, PartialEq, FromPrimitive)]
#[repr(u8)]
pub enum PayloadType {
    App = 1,
    Key = 2,
    Os = 3,
    Data = 4,
}

impl PayloadType {
    pub fn from_u8(v: u8) -> Option<Self> {
        num_traits::FromPrimitive::from_u8(v)
    }
}

pub const COMMON_HDR_MAGIC: [u8; 13] = *b"GoogleNanoApp";
pub const COMMON_HDR_VER_CUR: u8 = 1;

pub mod fw_flags {
    pub const APPLICATION: u16 = 0x0002;
    /// Set by the engine when the image carried a signature.
    pub const SECURE: u16 = 0x0004;
}

/// Vendor-neutral header synthesized from an image's own headers and written
/// to the sink before any payload byte.
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    FromBytes,
    IntoBytes,
    Immutable,
    KnownLayout,
    Unaligned,
)]
#[repr(C)]
pub struct CommonHeader {
    pub magic: [u8; 13],
    pub fw_ver: u8,
    pub fw_flags: U16<LittleEndian>,
    pub app_id: U64<LittleEndian>,
    pub app_ver: U32<LittleEndian>,
    pub pay_info_ver: u8,
    pub pay_info_type: u8,
    pub chre_api_major: u8,
    pub chre_api_minor: u8,
}

pub const COMMON_HDR_SZ: usize = size_of::<CommonHeader>();
const_assert_eq!(COMMON_HDR_SZ, 32);

impl CommonHeader {
    pub fn is_secure(&self) -> bool {
        self.fw_flags.get() & fw_flags::SECURE != 0
    }

    pub fn payload_type(&self) -> Option<PayloadType> {
        PayloadType::from_u8(self.pay_info_type)
    }
}
