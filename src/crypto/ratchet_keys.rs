//! Ratchet keys (C3): `RootKey`, `ChainKey`, `MessageKeys`.
//!
//! Grounded in the HKDF/HMAC chain-evolution shape of
//! `secure-legion-core/src/crypto/ratchet.rs`'s `kdf_root`/`kdf_chain`, but
//! with the HMAC tag assignment corrected to match the wire protocol this
//! crate targets: `next()` uses tag `0x02`, `message_key_seed()` uses tag
//! `0x01`.

use x25519_dalek::{PublicKey as X25519Public, StaticSecret as X25519Static};
use zeroize::Zeroize;

use super::primitives::{hkdf_sha256, hmac_sha256, x25519_raw_agreement};
use crate::error::{RatchetError, Result};

const ROOT_INFO: &[u8] = b"WhisperRatchet";
const MESSAGE_KEYS_INFO: &[u8] = b"WhisperMessageKeys";

const CHAIN_KEY_NEXT_TAG: [u8; 1] = [0x02];
const CHAIN_KEY_MESSAGE_SEED_TAG: [u8; 1] = [0x01];

/// 32-byte root key feeding the DH ratchet's chain derivation.
#[derive(Clone)]
pub struct RootKey {
    pub key: [u8; 32],
}

impl Drop for RootKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl RootKey {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Derive the next root key and the chain key at index 0 from a fresh
    /// DH ratchet step: `HKDF-SHA256(ikm = X25519(our, their), salt = self.key,
    /// info = "WhisperRatchet", len = 64)`.
    pub fn create_chain(
        &self,
        our_ratchet_private: &X25519Static,
        their_ratchet_public: &[u8; 32],
    ) -> Result<(RootKey, ChainKey)> {
        let dh = x25519_raw_agreement(our_ratchet_private, their_ratchet_public)
            .map_err(|_| RatchetError::InvalidKey("low-order ratchet public key"))?;
        let derived = hkdf_sha256(&dh, Some(&self.key), ROOT_INFO, 64)
            .map_err(|_| RatchetError::InvalidMessage("HKDF expand failed".into()))?;
        let mut new_root = [0u8; 32];
        let mut chain_key = [0u8; 32];
        new_root.copy_from_slice(&derived[0..32]);
        chain_key.copy_from_slice(&derived[32..64]);
        Ok((RootKey::new(new_root), ChainKey::new(chain_key, 0)))
    }
}

/// Symmetric chain key advanced by one HMAC step per message.
#[derive(Clone)]
pub struct ChainKey {
    pub key: [u8; 32],
    pub index: u32,
}

impl Drop for ChainKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl ChainKey {
    pub fn new(key: [u8; 32], index: u32) -> Self {
        Self { key, index }
    }

    /// Advance the chain by one step: `key' = HMAC-SHA256(key, 0x02)`.
    pub fn next(&self) -> ChainKey {
        ChainKey {
            key: hmac_sha256(&self.key, &CHAIN_KEY_NEXT_TAG),
            index: self.index + 1,
        }
    }

    /// Derive the seed fed into `MessageKeys::derive_from` for the
    /// message at this chain index: `HMAC-SHA256(key, 0x01)`.
    pub fn message_key_seed(&self) -> [u8; 32] {
        hmac_sha256(&self.key, &CHAIN_KEY_MESSAGE_SEED_TAG)
    }
}

/// Per-message symmetric keys derived from a chain seed and an optional
/// PQ ratchet salt.
pub struct MessageKeys {
    pub cipher_key: [u8; 32],
    pub mac_key: [u8; 32],
    pub iv: [u8; 16],
    pub counter: u32,
}

impl Drop for MessageKeys {
    fn drop(&mut self) {
        self.cipher_key.zeroize();
        self.mac_key.zeroize();
        self.iv.zeroize();
    }
}

impl MessageKeys {
    /// `derived = HKDF-SHA256(ikm = seed, salt = pq_salt or empty, info =
    /// "WhisperMessageKeys", len = 80)`. Without a PQ salt this is
    /// identical to the classical double ratchet.
    pub fn derive_from(seed: &[u8; 32], counter: u32, pq_salt: Option<&[u8; 32]>) -> Result<Self> {
        let salt = pq_salt.map(|s| s.as_slice());
        let derived = hkdf_sha256(seed, salt, MESSAGE_KEYS_INFO, 80)
            .map_err(|_| RatchetError::InvalidMessage("HKDF expand failed".into()))?;
        let mut cipher_key = [0u8; 32];
        let mut mac_key = [0u8; 32];
        let mut iv = [0u8; 16];
        cipher_key.copy_from_slice(&derived[0..32]);
        mac_key.copy_from_slice(&derived[32..64]);
        iv.copy_from_slice(&derived[64..80]);
        Ok(MessageKeys {
            cipher_key,
            mac_key,
            iv,
            counter,
        })
    }
}

/// Convenience: public key bytes for a ratchet keypair's private half.
pub fn ratchet_public(private: &X25519Static) -> [u8; 32] {
    X25519Public::from(private).to_bytes()
}
