// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared fixtures: an image builder that encrypts and signs the way the
//! release tooling does, and in-memory collaborators for a session.

#![allow(dead_code)]

use aes::cipher::{BlockEncrypt, KeyInit};
use aes::{Aes256Enc, Block};
use core::task::Poll;
use image_sec::header::{
    ENCR_HEADER_SZ, FLAG_ENCRYPTED, FLAG_SIGNED, IMAGE_HEADER_VERSION,
    IMAGE_MAGIC, LAYOUT_MAGIC, LAYOUT_VERSION, SIGN_HEADER_SZ,
};
use image_sec::{SecError, Session};
use image_sec_api::{
    fw_flags, AesKey, AesKeyLookup, ImageSink, PayloadType, PubKeyLookup,
    AES_BLOCK_SZ,
};
use num_bigint::BigUint;
use num_traits::Num;
use sha2::{Digest, Sha256};

pub const APP_ID: u64 = 0x476f_6f67_6c00_0123;
pub const APP_VERSION: u32 = 0x0001_0002;
pub const KEY_ID: u64 = 0x476f_6f67_6c00_0001;
pub const AES_KEY: AesKey = [0x42; 32];
pub const IV: [u8; 16] = [
    0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb,
    0xcc, 0xdd, 0xee, 0xff,
];

pub struct TestKey {
    n: BigUint,
    d: BigUint,
    len: usize,
}

impl TestKey {
    fn from_hex(n: &str, d: &str, len: usize) -> Self {
        Self {
            n: BigUint::from_str_radix(n, 16).unwrap(),
            d: BigUint::from_str_radix(d, 16).unwrap(),
            len,
        }
    }

    pub fn root() -> Self {
        Self::from_hex(ROOT_N, ROOT_D, 256)
    }

    pub fn leaf() -> Self {
        Self::from_hex(LEAF_N, LEAF_D, 256)
    }

    pub fn small() -> Self {
        Self::from_hex(SMALL_N, SMALL_D, 128)
    }

    pub fn modulus_len(&self) -> usize {
        self.len
    }

    pub fn modulus_le(&self) -> Vec<u8> {
        let mut v = self.n.to_bytes_le();
        v.resize(self.len, 0);
        v
    }

    /// PKCS#1 v1.5 type 1 signature over a bare SHA-256 digest, rendered
    /// little-endian.
    pub fn sign(&self, hash: &[u8; 32]) -> Vec<u8> {
        let mut em = vec![0x00, 0x01];
        em.resize(self.len - 32 - 1, 0xff);
        em.push(0x00);
        em.extend_from_slice(hash);
        let s = BigUint::from_bytes_be(&em).modpow(&self.d, &self.n);
        let mut v = s.to_bytes_le();
        v.resize(self.len, 0);
        v
    }
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

pub fn cbc_encrypt(key: &AesKey, iv: &[u8; 16], data: &[u8]) -> Vec<u8> {
    let cipher = Aes256Enc::new(key.into());
    let mut out = data.to_vec();
    out.resize(data.len().next_multiple_of(AES_BLOCK_SZ), 0);

    let mut prev = *iv;
    for chunk in out.chunks_exact_mut(AES_BLOCK_SZ) {
        let mut block = Block::default();
        for ((b, p), c) in block.iter_mut().zip(chunk.iter()).zip(prev.iter()) {
            *b = p ^ c;
        }
        cipher.encrypt_block(&mut block);
        chunk.copy_from_slice(&block);
        prev.copy_from_slice(&block);
    }
    out
}

pub struct Image {
    pub bytes: Vec<u8>,
    pub header_len: usize,
    /// Length of everything before the first signature block.
    pub body_end: usize,
    pub payload: Vec<u8>,
}

impl Image {
    pub fn signature_blocks(&self) -> &[u8] {
        &self.bytes[self.body_end..]
    }
}

pub struct ImageBuilder<'k> {
    payload: Vec<u8>,
    signed: bool,
    chain: Vec<&'k TestKey>,
    encrypted: bool,
    bad_trailer: bool,
    app_data_len: Option<u32>,
    layout_flags: u16,
}

impl<'k> ImageBuilder<'k> {
    pub fn new(payload: &[u8]) -> Self {
        Self {
            payload: payload.to_vec(),
            signed: false,
            chain: Vec::new(),
            encrypted: false,
            bad_trailer: false,
            app_data_len: None,
            layout_flags: fw_flags::APPLICATION,
        }
    }

    /// Signs the image with `chain[0]`, which is in turn vouched for by
    /// `chain[1]`, and so on.
    pub fn signed_by(mut self, chain: &[&'k TestKey]) -> Self {
        self.signed = true;
        self.chain = chain.to_vec();
        self
    }

    pub fn encrypted(mut self) -> Self {
        self.encrypted = true;
        self
    }

    pub fn bad_trailer(mut self) -> Self {
        self.bad_trailer = true;
        self
    }

    /// Declares a signed range of `len` no matter what the body is.
    pub fn app_data_len(mut self, len: u32) -> Self {
        self.app_data_len = Some(len);
        self
    }

    pub fn build(self) -> Image {
        let mut body = Vec::new();
        if self.encrypted {
            body.extend(cbc_encrypt(&AES_KEY, &IV, &self.payload));
            let mut trailer = sha256(&self.payload);
            if self.bad_trailer {
                trailer[0] ^= 1;
            }
            body.extend_from_slice(&trailer);
        } else {
            body.extend_from_slice(&self.payload);
        }

        let mut flags = 0;
        if self.signed {
            flags |= FLAG_SIGNED;
        }
        if self.encrypted {
            flags |= FLAG_ENCRYPTED;
        }

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&IMAGE_HEADER_VERSION.to_le_bytes());
        bytes.extend_from_slice(&IMAGE_MAGIC.to_le_bytes());
        bytes.extend_from_slice(&APP_ID.to_le_bytes());
        bytes.extend_from_slice(&APP_VERSION.to_le_bytes());
        bytes.extend_from_slice(&flags.to_le_bytes());
        bytes.extend_from_slice(&0u64.to_le_bytes());
        bytes.extend_from_slice(&[1, 2, 0, 0, 0, 0, 0, 0]);
        bytes.extend_from_slice(&LAYOUT_MAGIC);
        bytes.push(LAYOUT_VERSION);
        bytes.push(PayloadType::App as u8);
        bytes.extend_from_slice(&self.layout_flags.to_le_bytes());
        if self.signed {
            let len = self.app_data_len.unwrap_or(body.len() as u32);
            bytes.extend_from_slice(&len.to_le_bytes());
        }
        if self.encrypted {
            bytes.extend_from_slice(&KEY_ID.to_le_bytes());
            bytes.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
            bytes.extend_from_slice(&IV);
        }
        let header_len = bytes.len();
        assert_eq!(
            header_len,
            48 + usize::from(self.signed) * SIGN_HEADER_SZ
                + usize::from(self.encrypted) * ENCR_HEADER_SZ
        );

        bytes.extend_from_slice(&body);
        let body_end = bytes.len();

        if self.signed {
            let mut hash = sha256(&bytes);
            for key in &self.chain {
                let modulus = key.modulus_le();
                bytes.extend(key.sign(&hash));
                bytes.extend_from_slice(&modulus);
                hash = sha256(&modulus);
            }
        }

        Image {
            bytes,
            header_len,
            body_end,
            payload: self.payload,
        }
    }
}

#[derive(Default)]
pub struct VecSink {
    pub data: Vec<u8>,
    pub writes: Vec<usize>,
    pub fail: bool,
}

impl ImageSink for VecSink {
    fn write(&mut self, data: &[u8]) -> Result<(), SecError> {
        if self.fail {
            return Err(SecError::BadAlloc);
        }
        self.writes.push(data.len());
        self.data.extend_from_slice(data);
        Ok(())
    }
}

/// Trusts exactly the moduli it was built with.
pub struct Trusted(pub Vec<Vec<u8>>);

impl Trusted {
    pub fn keys(keys: &[&TestKey]) -> Self {
        Self(keys.iter().map(|k| k.modulus_le()).collect())
    }

    pub fn nobody() -> Self {
        Self(Vec::new())
    }
}

impl PubKeyLookup for Trusted {
    fn is_trusted(&self, modulus: &[u8]) -> Result<bool, SecError> {
        Ok(self.0.iter().any(|m| m == modulus))
    }
}

pub struct AesKeys(pub Vec<(u64, AesKey)>);

impl AesKeys {
    pub fn standard() -> Self {
        Self(vec![(KEY_ID, AES_KEY)])
    }
}

impl AesKeyLookup for AesKeys {
    fn aes_key(&self, key_id: u64) -> Result<AesKey, SecError> {
        self.0
            .iter()
            .find(|(id, _)| *id == key_id)
            .map(|(_, k)| *k)
            .ok_or(SecError::KeyNotFound)
    }
}

pub type TestSession<'a> =
    Session<'a, &'a mut VecSink, &'a Trusted, &'a AesKeys>;

/// Drives the signature check in flight to completion, returning how many
/// calls it took.
pub fn drive_rsa(session: &mut TestSession<'_>) -> Result<u32, SecError> {
    let mut calls = 0;
    loop {
        calls += 1;
        if let Poll::Ready(r) = session.continue_verification() {
            return r.map(|()| calls);
        }
    }
}

/// Feeds `image` in pieces of `piece` bytes, running signature checks
/// whenever the session asks for time.
pub fn feed(
    session: &mut TestSession<'_>,
    image: &[u8],
    piece: usize,
) -> Result<(), SecError> {
    for part in image.chunks(piece.max(1)) {
        let mut rest = part;
        loop {
            let (poll, left) = session.feed_bytes(rest);
            match poll {
                Poll::Ready(r) => {
                    r?;
                    assert_eq!(left, 0);
                    break;
                }
                Poll::Pending => {
                    drive_rsa(session)?;
                    rest = &rest[rest.len() - left..];
                }
            }
        }
    }
    Ok(())
}

pub fn finish(session: &mut TestSession<'_>) -> Result<(), SecError> {
    loop {
        match session.feed_end() {
            Poll::Ready(r) => return r,
            Poll::Pending => {
                drive_rsa(session)?;
            }
        }
    }
}

const ROOT_N: &str = concat!(
    "c880881b1a0f80ac0e8362d3bfee99336dbda7bdace0770deb5d7360d2ce90d8",
    "f88d0e4f2bbe1e52c32e3e9fdf4e2fe4520decd60634a0d6b8c1961bb5b20d4a",
    "dbb668855e18ce191a19df7d36acc769deb942dc0ee5647797de6b0332535ec1",
    "faa0a2ce92b38b036993c47d66044f03effa93dbe4f6c5d84dbe3bc748c849b2",
    "9eee820b30f933805b3bfb3709aa1c5604aa1ffe5bb3705d933fd28d675f45fb",
    "404b0701521c540360e513da9cb0105c4cad327b42549898bcd598aee7614540",
    "ada69831e1bde56ea170d032b9140d8ed1b072cb03389ae7dd75df905fa0a7e3",
    "43eb17237599a3f54e1d3d7236be4f9fd731c22cfcef7974caf0f021c6f86817",
);
const ROOT_D: &str = concat!(
    "ae1a4e159a8f939fd40a6aaa8ca3570cbd624e61f9d800096a337f98b7f4fefa",
    "28f9f34ef420e69bdf382cd10e4b0a732c7d4306a5e4d5351ec19ae2fce75b7b",
    "8145e784c7acaa6a49abe5d108c50773fb1ecbdbe26376d6125de476a62096cb",
    "c221f2bd85cdba0c8084fbbe17f3edd8f16d992efca6fc2d5374b8dbd76b73f1",
    "c734b367c6d67d7ff62342f0ae8a6486b142753f3d911de7511411ce0cba655f",
    "2f40a9b1343a0865560d0640945f763dc7b77f947c9b25fbe8ed2906b06e861f",
    "2b944217cfb13b7073213c955641eba715df90079e3012350dfe5ca3c5b169d5",
    "d5d8b8aedbea684d0b4a75813cc63ef6e220b015b798ab5f457600fbc70b87c1",
);
const LEAF_N: &str = concat!(
    "df468f024460f001ee94d9d30f196910c5e652d068d9a9894c0190e4f64fc9cb",
    "939f0dc9594f544d0634f194817190f4cb3cc5fbc831cf5f33cc536d336c6501",
    "4150b873249e85c2c874bd8eef24c4a8c94ce6fbaa5c14192d55e62775e513b5",
    "9fdececb52e238a0a63b9df0acfb2f812119a4126cf4156bd31fe996dd72cd20",
    "d0073ff0d29dbd43aa31045fcd48f1c77cdf9c7080882c060e2c2ab843e53da1",
    "31effd62621a7cd9b527bbcc09141da4429eba1cdf948f117026947285b5e2f3",
    "275abf60539eb021663d89c29eff4bd134e37d1998d0e4ddb1feeeb84de1b5fc",
    "a05d42b46d5d0a38932e75f46b1014f749e0a141eb1f0720597a221d62a87427",
);
const LEAF_D: &str = concat!(
    "ddcb2b98a6f05cbaae93b2e61463bb98ebdde67a1d0dcb7a15c4a078b1ad84d9",
    "f3a4d67f2376c8595347188bdb22434ac8f17002b355b797ecce96392e12092b",
    "fc0401966fd40130030ce498ae3aaa18b90ee98d2a2819d700d009b73d47f812",
    "3de3892d3502801a25c7a71743dea9cbee639836ad80b21ed0352d47ae67b217",
    "8082efc1f1d264e5a3a1e01423cf6ef31523104afa5e3ac84b9eb16103cb9973",
    "0a8cb024deabbc606910a03f57668c7d7a1617d8863d5e019642b50505a2e036",
    "aa9d153b16a7af46c2a9a2ffb056e4f05848d532101c47f9b336254dec4724b5",
    "8dd6901c35cab5e76d8d65663f5f4a3f1a44649ed9d7b2964320dcc198b81231",
);
const SMALL_N: &str = concat!(
    "c8e43e5c4abc5a2c2b9f44195a4a7980992af6e8f1283c48a202ce2e2beb659c",
    "10ba836b71c322089c1e5ff0c6219fcab9153b6710688d5f4d9e3422d196e1b4",
    "0827052bf1d4435726946420b385331f8b7c8d0159a293eced88fe2ac5ffac92",
    "79f255454526f4a06eccf0a09694f0bd82fc1bb08a1df80d4fc10917a3d8d6cf",
);
const SMALL_D: &str = concat!(
    "2e4c6c12d9268fa19e6c1645c18968773ad5ac12038242627af42a90798ec6dc",
    "30fecb4af7ed00eafb10050c789d47367171733f4d88cb0c2bd74a2cbc2109e3",
    "0b232cf6cb46e55cb2c32763b271f992bbf6d498382a910c25e18977e3f0aef3",
    "82d17a64990e66f1d2313ca6b3be5f3cfe7958bec9432a2566b24812fb5bf801",
);
