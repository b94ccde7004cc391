/// Work item codec
///
/// Fixed 112-byte record that miners hash against:
/// work_hash(32) + timestamp(8) + nonce(8) + extra_nonce(32) + public_key(32)
/// Multi-byte integers are big-endian.

use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{ProxyError, Result};

pub const WORK_ITEM_LENGTH: usize = 112;
pub const WORK_BLOB_LENGTH: usize = 96;

const WORK_HASH: std::ops::Range<usize> = 0..32;
const TIMESTAMP: std::ops::Range<usize> = 32..40;
const NONCE: std::ops::Range<usize> = 40..48;
const EXTRA_NONCE: std::ops::Range<usize> = 48..80;
const PUBLIC_KEY: std::ops::Range<usize> = 80..112;

/// Number of trailing extra-nonce bytes randomized per job send
pub const EXTRA_NONCE_RANDOM_BYTES: usize = 4;
const EXTRA_NONCE_PREFIX: usize = 32 - EXTRA_NONCE_RANDOM_BYTES;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkItem([u8; WORK_ITEM_LENGTH]);

impl Default for WorkItem {
    fn default() -> Self {
        Self([0u8; WORK_ITEM_LENGTH])
    }
}

impl WorkItem {
    /// Template-stage item: current timestamp, zero nonce
    pub fn new(work_hash: [u8; 32], extra_nonce: [u8; 32], public_key: [u8; 32]) -> Self {
        let mut item = Self::default();
        item.0[WORK_HASH].copy_from_slice(&work_hash);
        item.set_timestamp(now_millis());
        item.0[EXTRA_NONCE].copy_from_slice(&extra_nonce);
        item.0[PUBLIC_KEY].copy_from_slice(&public_key);
        item
    }

    /// Build from the 96-byte blob (work_hash + extra_nonce + public_key)
    pub fn from_blob(blob: &[u8]) -> Result<Self> {
        if blob.len() != WORK_BLOB_LENGTH {
            return Err(ProxyError::Format(format!(
                "blob length {} != {}",
                blob.len(),
                WORK_BLOB_LENGTH
            )));
        }

        Ok(Self::new(
            fixed(&blob[0..32]),
            fixed(&blob[32..64]),
            fixed(&blob[64..96]),
        ))
    }

    /// Take a complete 112-byte item as-is
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let data: [u8; WORK_ITEM_LENGTH] = bytes.try_into().map_err(|_| {
            ProxyError::Format(format!(
                "work item length {} != {}",
                bytes.len(),
                WORK_ITEM_LENGTH
            ))
        })?;
        Ok(Self(data))
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim())?;
        Self::from_bytes(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; WORK_ITEM_LENGTH] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// work_hash + extra_nonce + public_key; timestamp and nonce are dropped
    pub fn to_blob(&self) -> [u8; WORK_BLOB_LENGTH] {
        let mut blob = [0u8; WORK_BLOB_LENGTH];
        blob[0..32].copy_from_slice(&self.0[WORK_HASH]);
        blob[32..64].copy_from_slice(&self.0[EXTRA_NONCE]);
        blob[64..96].copy_from_slice(&self.0[PUBLIC_KEY]);
        blob
    }

    pub fn work_hash(&self) -> [u8; 32] {
        fixed(&self.0[WORK_HASH])
    }

    pub fn timestamp(&self) -> u64 {
        u64::from_be_bytes(fixed(&self.0[TIMESTAMP]))
    }

    pub fn set_timestamp(&mut self, timestamp: u64) {
        self.0[TIMESTAMP].copy_from_slice(&timestamp.to_be_bytes());
    }

    pub fn nonce(&self) -> u64 {
        u64::from_be_bytes(self.nonce_bytes())
    }

    pub fn nonce_bytes(&self) -> [u8; 8] {
        fixed(&self.0[NONCE])
    }

    pub fn set_nonce(&mut self, nonce: u64) {
        self.set_nonce_bytes(nonce.to_be_bytes());
    }

    pub fn set_nonce_bytes(&mut self, nonce: [u8; 8]) {
        self.0[NONCE].copy_from_slice(&nonce);
    }

    pub fn extra_nonce(&self) -> [u8; 32] {
        fixed(&self.0[EXTRA_NONCE])
    }

    pub fn set_extra_nonce(&mut self, extra_nonce: [u8; 32]) {
        self.0[EXTRA_NONCE].copy_from_slice(&extra_nonce);
    }

    pub fn public_key(&self) -> [u8; 32] {
        fixed(&self.0[PUBLIC_KEY])
    }

    pub fn set_public_key(&mut self, public_key: [u8; 32]) {
        self.0[PUBLIC_KEY].copy_from_slice(&public_key);
    }

    /// Randomize the last 4 bytes of the extra-nonce.
    ///
    /// The leading 28 bytes carry the template identity and stay untouched,
    /// so sessions fed from the same job search disjoint spaces.
    pub fn generate_extra_nonce(&mut self) {
        let mut tail = [0u8; EXTRA_NONCE_RANDOM_BYTES];
        OsRng.fill_bytes(&mut tail);
        self.0[EXTRA_NONCE.start + EXTRA_NONCE_PREFIX..EXTRA_NONCE.end].copy_from_slice(&tail);
    }

    /// BLAKE3 over all 112 bytes
    pub fn digest(&self) -> [u8; 32] {
        *blake3::hash(&self.0).as_bytes()
    }
}

/// True when the non-randomized 28-byte prefixes of two extra-nonces match
pub fn extra_nonce_prefix_matches(a: &[u8; 32], b: &[u8; 32]) -> bool {
    a[..EXTRA_NONCE_PREFIX] == b[..EXTRA_NONCE_PREFIX]
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("work_hash", &hex::encode(self.work_hash()))
            .field("timestamp", &self.timestamp())
            .field("nonce", &self.nonce())
            .field("extra_nonce", &hex::encode(self.extra_nonce()))
            .field("public_key", &hex::encode(self.public_key()))
            .finish()
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

fn fixed<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
