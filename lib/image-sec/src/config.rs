// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-session verification policy.
//!
//! A `Config` is normally written into an application's TOML description and
//! deserialized at build time, but every field has a default so that
//! `Config::default()` is the policy the firmware update path has always
//! used: signatures required, 2048-bit keys, and the last key of a chain
//! must be trusted.

use image_sec_api::{
    SecError, DEFAULT_SIGNATURE_SZ, MAX_SIGNATURE_SZ, MIN_SIGNATURE_SZ,
};
use rsa_pubop::PublicOp;
use serde::Deserialize;

/// Which keys of a signature chain must be known to the caller's
/// [`PubKeyLookup`](image_sec_api::PubKeyLookup) for the image to verify.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TrustPolicy {
    /// Only the key of the most recently verified signature block counts.
    #[default]
    LastKey,
    /// A trusted key anywhere in the chain is enough.
    AnyKey,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct Config {
    /// Reject images whose header does not declare a signature.
    pub require_signature: bool,
    /// Fail the session if the plaintext digest trailer of an encrypted
    /// image does not match. When false a mismatch is only traced.
    pub enforce_plaintext_digest: bool,
    pub trust_policy: TrustPolicy,
    /// RSA modulus (and signature) length in bytes.
    pub signature_len: u16,
    /// Steps of the RSA operation to run per `continue_verification`.
    pub rsa_steps_per_slice: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub const fn new() -> Self {
        Self {
            require_signature: true,
            enforce_plaintext_digest: true,
            trust_policy: TrustPolicy::LastKey,
            signature_len: DEFAULT_SIGNATURE_SZ as u16,
            rsa_steps_per_slice: 1,
        }
    }

    pub fn signature_len(&self) -> usize {
        usize::from(self.signature_len)
    }

    pub fn validate(&self) -> Result<(), SecError> {
        let len = self.signature_len();
        if !(MIN_SIGNATURE_SZ..=MAX_SIGNATURE_SZ).contains(&len) || len % 4 != 0
        {
            return Err(SecError::BadAlloc);
        }
        if self.rsa_steps_per_slice == 0
            || self.rsa_steps_per_slice >= PublicOp::TOTAL_STEPS
        {
            return Err(SecError::InvalidData);
        }
        Ok(())
    }
}
