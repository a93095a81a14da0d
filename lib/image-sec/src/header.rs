// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Image header wire format.
//!
//! An image starts with a fixed [`ImageHeader`], followed by a
//! [`SignHeader`] if the image is signed and an [`EncrHeader`] if it is
//! encrypted, in that order. The fixed header has to be read before we know
//! how long the whole thing is, so [`parse`] can ask for more bytes.

use core::mem::size_of;
use image_sec_api::{
    fw_flags, CommonHeader, PayloadType, SecError, COMMON_HDR_MAGIC,
    COMMON_HDR_VER_CUR,
};
use static_assertions::const_assert_eq;
use zerocopy::byteorder::{LittleEndian, U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

pub const IMAGE_HEADER_VERSION: u32 = 1;
/// "NANO"
pub const IMAGE_MAGIC: u32 = 0x4f4e414e;
pub const LAYOUT_MAGIC: [u8; 4] = *b"GOOG";
pub const LAYOUT_VERSION: u8 = 1;

pub const FLAG_SIGNED: u32 = 1 << 0;
pub const FLAG_ENCRYPTED: u32 = 1 << 1;

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
pub struct ImageHeader {
    pub header_version: U32<LittleEndian>,
    pub magic: U32<LittleEndian>,
    pub app_id: U64<LittleEndian>,
    pub app_version: U32<LittleEndian>,
    pub flags: U32<LittleEndian>,
    pub hw_hub_type: U64<LittleEndian>,
    pub chre_api_major: u8,
    pub chre_api_minor: u8,
    pub reserved: [u8; 6],
    pub layout_magic: [u8; 4],
    pub layout_version: u8,
    pub payload: u8,
    pub layout_flags: U16<LittleEndian>,
}

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
pub struct SignHeader {
    /// Length of the signed range that follows the headers.
    pub app_data_len: U32<LittleEndian>,
}

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
pub struct EncrHeader {
    pub key_id: U64<LittleEndian>,
    /// Plaintext length; the ciphertext is this rounded up to a block.
    pub data_len: U32<LittleEndian>,
    pub iv: [u8; 16],
}

pub const IMAGE_HEADER_SZ: usize = size_of::<ImageHeader>();
pub const SIGN_HEADER_SZ: usize = size_of::<SignHeader>();
pub const ENCR_HEADER_SZ: usize = size_of::<EncrHeader>();
pub const HEADER_MAX_SZ: usize =
    IMAGE_HEADER_SZ + SIGN_HEADER_SZ + ENCR_HEADER_SZ;

const_assert_eq!(IMAGE_HEADER_SZ, 48);
const_assert_eq!(SIGN_HEADER_SZ, 4);
const_assert_eq!(ENCR_HEADER_SZ, 28);

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Headers {
    pub image: ImageHeader,
    pub sign: Option<SignHeader>,
    pub encr: Option<EncrHeader>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Parse {
    /// The header set is this many bytes long; come back when you have
    /// them all.
    NeedMore(usize),
    Parsed(Headers),
}

impl ImageHeader {
    pub fn is_signed(&self) -> bool {
        self.flags.get() & FLAG_SIGNED != 0
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags.get() & FLAG_ENCRYPTED != 0
    }

    /// Length of the fixed header plus the sub-headers its flags call for.
    pub fn total_len(&self) -> usize {
        let mut len = IMAGE_HEADER_SZ;
        if self.is_signed() {
            len += SIGN_HEADER_SZ;
        }
        if self.is_encrypted() {
            len += ENCR_HEADER_SZ;
        }
        len
    }

    fn check(&self) -> Result<(), SecError> {
        if self.header_version.get() != IMAGE_HEADER_VERSION
            || self.magic.get() != IMAGE_MAGIC
            || self.layout_magic != LAYOUT_MAGIC
            || self.layout_version != LAYOUT_VERSION
        {
            return Err(SecError::HeaderError);
        }
        if PayloadType::from_u8(self.payload).is_none() {
            return Err(SecError::HeaderError);
        }
        Ok(())
    }
}

impl Headers {
    pub fn is_signed(&self) -> bool {
        self.sign.is_some()
    }

    pub fn is_encrypted(&self) -> bool {
        self.encr.is_some()
    }

    /// Normalizes the vendor header into the form the rest of the system
    /// loads images by.
    pub fn common_header(&self) -> CommonHeader {
        let mut flags = self.image.layout_flags.get();
        if self.is_signed() {
            flags |= fw_flags::SECURE;
        }
        CommonHeader {
            magic: COMMON_HDR_MAGIC,
            fw_ver: COMMON_HDR_VER_CUR,
            fw_flags: U16::new(flags),
            app_id: self.image.app_id,
            app_ver: self.image.app_version,
            pay_info_ver: self.image.layout_version,
            pay_info_type: self.image.payload,
            chre_api_major: self.image.chre_api_major,
            chre_api_minor: self.image.chre_api_minor,
        }
    }
}

/// Parses the header set at the front of `bytes`.
pub fn parse(bytes: &[u8]) -> Result<Parse, SecError> {
    let Ok((image, rest)) = ImageHeader::read_from_prefix(bytes) else {
        return Ok(Parse::NeedMore(IMAGE_HEADER_SZ));
    };
    image.check()?;

    let total = image.total_len();
    if bytes.len() < total {
        return Ok(Parse::NeedMore(total));
    }

    let mut rest = rest;
    let mut sign = None;
    if image.is_signed() {
        let (hdr, tail) = SignHeader::read_from_prefix(rest)
            .map_err(|_| SecError::HeaderError)?;
        sign = Some(hdr);
        rest = tail;
    }
    let mut encr = None;
    if image.is_encrypted() {
        let (hdr, _) = EncrHeader::read_from_prefix(rest)
            .map_err(|_| SecError::HeaderError)?;
        encr = Some(hdr);
    }

    Ok(Parse::Parsed(Headers { image, sign, encr }))
}
