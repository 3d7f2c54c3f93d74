//! Authorities, keys, signatures, and hash locks.
//!
//! An [`Authority`] is a weighted threshold over accounts and keys. The core
//! never verifies signatures against authorities itself; it only decides
//! *which* authorities an operation requires and leaves verification to the
//! host. The one place the core touches cryptography directly is ticket
//! redemption (secp256k1 public-key recovery) and hash-preimage checks.

use crate::errors::AuthorityError;
use ripemd::Ripemd160;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// A compressed secp256k1 public key (SEC1, 33 bytes).
#[serde_as]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PublicKey(#[serde_as(as = "serde_with::Bytes")] pub [u8; 33]);

impl PublicKey {
    pub fn is_null(&self) -> bool {
        self.0 == [0u8; 33]
    }
}

impl Default for PublicKey {
    fn default() -> Self {
        Self([0u8; 33])
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0[..4] {
            write!(f, "{byte:02x}")?;
        }
        write!(f, "…")
    }
}

/// A recoverable ECDSA signature over secp256k1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub r: [u8; 32],
    pub s: [u8; 32],
    /// Recovery id: 0, 1, 27, or 28.
    pub v: u8,
}

/// Recover the compressed public key that produced `signature` over the
/// 32-byte `digest`. Returns `None` for malformed signatures.
pub fn recover_signer(digest: &[u8; 32], signature: &Signature) -> Option<PublicKey> {
    use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, VerifyingKey};

    let recovery_id = match signature.v {
        0 | 27 => RecoveryId::try_from(0u8).ok()?,
        1 | 28 => RecoveryId::try_from(1u8).ok()?,
        _ => return None,
    };

    let mut bytes = [0u8; 64];
    bytes[..32].copy_from_slice(&signature.r);
    bytes[32..].copy_from_slice(&signature.s);
    let sig = EcdsaSignature::from_slice(&bytes).ok()?;

    let key = VerifyingKey::recover_from_prehash(digest, &sig, recovery_id).ok()?;
    let point = key.to_encoded_point(true);
    let mut compressed = [0u8; 33];
    compressed.copy_from_slice(point.as_bytes());
    Some(PublicKey(compressed))
}

// =============================================================================
// AUTHORITY
// =============================================================================

/// A weighted-threshold authority over accounts and keys.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authority {
    pub weight_threshold: u32,
    pub account_auths: BTreeMap<crate::types::AccountId, u16>,
    pub key_auths: BTreeMap<PublicKey, u16>,
}

impl Authority {
    /// The authority satisfied by nobody and nothing; rejected everywhere an
    /// authority is required.
    pub fn null() -> Self {
        Self::default()
    }

    /// Single-account authority with threshold 1.
    pub fn account(account: crate::types::AccountId) -> Self {
        Self {
            weight_threshold: 1,
            account_auths: BTreeMap::from([(account, 1)]),
            key_auths: BTreeMap::new(),
        }
    }

    /// Single-key authority with threshold 1.
    pub fn key(key: PublicKey) -> Self {
        Self {
            weight_threshold: 1,
            account_auths: BTreeMap::new(),
            key_auths: BTreeMap::from([(key, 1)]),
        }
    }

    /// Total weight available if every listed account and key signs.
    pub fn total_weight(&self) -> u64 {
        let accounts: u64 = self.account_auths.values().map(|w| u64::from(*w)).sum();
        let keys: u64 = self.key_auths.values().map(|w| u64::from(*w)).sum();
        accounts + keys
    }

    /// An impossible authority can never be satisfied: its threshold exceeds
    /// the combined weight of all of its members.
    pub fn is_impossible(&self) -> bool {
        self.total_weight() < u64::from(self.weight_threshold)
    }

    pub fn is_null(&self) -> bool {
        *self == Self::null()
    }

    /// Reject null and impossible authorities. `context` names the authority
    /// in error messages ("reviewer", "emergency tap open authority", ...).
    pub fn ensure_usable(&self, context: &str) -> Result<(), AuthorityError> {
        if self.is_null() {
            return Err(AuthorityError::Null { context: context.to_string() });
        }
        if self.is_impossible() {
            return Err(AuthorityError::Impossible { context: context.to_string() });
        }
        Ok(())
    }

    /// Reject authorities with a zero weight threshold, which anyone satisfies.
    pub fn ensure_nontrivial(&self, context: &str) -> Result<(), AuthorityError> {
        if self.weight_threshold == 0 {
            return Err(AuthorityError::Trivial { context: context.to_string() });
        }
        Ok(())
    }
}

// =============================================================================
// HASH LOCKS
// =============================================================================

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&Sha256::digest(data));
    hash
}

pub fn ripemd160(data: &[u8]) -> [u8; 20] {
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&Ripemd160::digest(data));
    hash
}

/// RIPEMD-160 of SHA-256, the Bitcoin-style short hash.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    ripemd160(&sha256(data))
}

/// The hash a preimage must match to satisfy a hash-preimage requirement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashLock {
    Sha256([u8; 32]),
    Ripemd160([u8; 20]),
    Hash160([u8; 20]),
}

impl HashLock {
    /// Hash `preimage` with this lock's algorithm and compare.
    pub fn matches(&self, preimage: &[u8]) -> bool {
        match self {
            HashLock::Sha256(expected) => sha256(preimage) == *expected,
            HashLock::Ripemd160(expected) => ripemd160(preimage) == *expected,
            HashLock::Hash160(expected) => hash160(preimage) == *expected,
        }
    }

    pub fn is_null(&self) -> bool {
        match self {
            HashLock::Sha256(hash) => *hash == [0u8; 32],
            HashLock::Ripemd160(hash) | HashLock::Hash160(hash) => *hash == [0u8; 20],
        }
    }

    pub fn is_hash_of_empty(&self) -> bool {
        match self {
            HashLock::Sha256(hash) => *hash == sha256(&[]),
            HashLock::Ripemd160(hash) => *hash == ripemd160(&[]),
            HashLock::Hash160(hash) => *hash == hash160(&[]),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
