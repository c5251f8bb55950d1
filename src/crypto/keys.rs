//! Key records (C2): identity, one-time prekey, signed-prekey, and Kyber
//! prekey, plus the PQXDH prekey bundle that bundles them for transport.
//!
//! Grounded in `secure-legion-core/src/crypto/key_exchange.rs`'s keypair
//! generation helpers and `shield-protocol/src/crypto/pqc.rs`'s
//! fingerprint/safety-number convention (SPEC_FULL.md §B).

use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret as X25519Static};

use super::primitives::{random_keypair, xeddsa_sign, xeddsa_verify};
use crate::error::{RatchetError, Result};

/// X25519 identity keypair. `public = X25519(private, basepoint)` always
/// holds because `x25519_dalek::PublicKey::from(&StaticSecret)` clamps
/// the scalar before multiplying.
pub struct IdentityKeyPair {
    pub private: X25519Static,
    pub public: [u8; 32],
}

impl IdentityKeyPair {
    pub fn generate() -> Self {
        let private = random_keypair();
        let public = X25519Public::from(&private).to_bytes();
        IdentityKeyPair { private, public }
    }

    /// 33-byte wire encoding: `0x05` DJB type prefix followed by the raw
    /// Montgomery u-coordinate.
    pub fn public_wire_bytes(&self) -> [u8; 33] {
        let mut out = [0u8; 33];
        out[0] = 0x05;
        out[1..].copy_from_slice(&self.public);
        out
    }

    pub fn sign(&self, message: &[u8], random: &[u8; 64]) -> [u8; 64] {
        xeddsa_sign(&self.private, message, random)
    }
}

/// One-time prekey: created offline, removed from the local store after
/// first use.
pub struct PreKeyRecord {
    pub id: u32,
    pub keypair: X25519Static,
}

impl PreKeyRecord {
    pub fn generate(id: u32) -> Self {
        PreKeyRecord {
            id,
            keypair: random_keypair(),
        }
    }

    pub fn public(&self) -> [u8; 32] {
        X25519Public::from(&self.keypair).to_bytes()
    }
}

/// Signed prekey: `signature = XEdDSA-sign(identity_private, 0x05 ||
/// public)`.
pub struct SignedPreKeyRecord {
    pub id: u32,
    pub keypair: X25519Static,
    pub signature: [u8; 64],
    pub timestamp_ms: u64,
}

impl SignedPreKeyRecord {
    pub fn generate(id: u32, identity: &IdentityKeyPair, timestamp_ms: u64, random: &[u8; 64]) -> Self {
        let keypair = random_keypair();
        let public = X25519Public::from(&keypair).to_bytes();
        let mut prefixed = [0u8; 33];
        prefixed[0] = 0x05;
        prefixed[1..].copy_from_slice(&public);
        let signature = identity.sign(&prefixed, random);
        SignedPreKeyRecord {
            id,
            keypair,
            signature,
            timestamp_ms,
        }
    }

    pub fn public(&self) -> [u8; 32] {
        X25519Public::from(&self.keypair).to_bytes()
    }

    pub fn verify(&self, identity_public: &[u8; 32]) -> Result<()> {
        let public = self.public();
        let mut prefixed = [0u8; 33];
        prefixed[0] = 0x05;
        prefixed[1..].copy_from_slice(&public);
        if xeddsa_verify(identity_public, &prefixed, &self.signature) {
            Ok(())
        } else {
            Err(RatchetError::SignatureValidation)
        }
    }
}

/// Kyber (ML-KEM-1024) prekey. The public key is prefixed with `0x08`
/// before signing, matching the identity-key `0x05` wire convention.
pub struct KyberPreKeyRecord {
    pub id: u32,
    pub decap_key: Vec<u8>,
    pub encap_key: Vec<u8>,
    pub signature: [u8; 64],
    pub timestamp_ms: u64,
}

impl KyberPreKeyRecord {
    pub fn generate(id: u32, identity: &IdentityKeyPair, timestamp_ms: u64, random: &[u8; 64]) -> Self {
        let (decap_key, encap_key) = super::primitives::ml_kem_1024_keygen();
        let mut prefixed = Vec::with_capacity(encap_key.len() + 1);
        prefixed.push(0x08);
        prefixed.extend_from_slice(&encap_key);
        let signature = identity.sign(&prefixed, random);
        KyberPreKeyRecord {
            id,
            decap_key,
            encap_key,
            signature,
            timestamp_ms,
        }
    }

    pub fn verify(&self, identity_public: &[u8; 32]) -> Result<()> {
        let mut prefixed = Vec::with_capacity(self.encap_key.len() + 1);
        prefixed.push(0x08);
        prefixed.extend_from_slice(&self.encap_key);
        if xeddsa_verify(identity_public, &prefixed, &self.signature) {
            Ok(())
        } else {
            Err(RatchetError::SignatureValidation)
        }
    }
}

/// PQXDH prekey bundle, as fetched from a directory for asynchronous
/// session establishment. The one-time prekey is optional; the Kyber
/// prekey and its signature are mandatory in v4.
pub struct PreKeyBundle {
    pub registration_id: u32,
    pub device_id: u32,
    pub pre_key_id: Option<u32>,
    pub pre_key_public: Option<[u8; 32]>,
    pub signed_pre_key_id: u32,
    pub signed_pre_key_public: [u8; 32],
    pub signed_pre_key_signature: [u8; 64],
    pub identity_key: [u8; 32],
    pub kyber_pre_key_id: u32,
    pub kyber_pre_key_public: Vec<u8>,
    pub kyber_pre_key_signature: [u8; 64],
}

impl PreKeyBundle {
    pub fn verify_signatures(&self) -> Result<()> {
        let mut spk_prefixed = [0u8; 33];
        spk_prefixed[0] = 0x05;
        spk_prefixed[1..].copy_from_slice(&self.signed_pre_key_public);
        if !xeddsa_verify(&self.identity_key, &spk_prefixed, &self.signed_pre_key_signature) {
            return Err(RatchetError::SignatureValidation);
        }

        let mut kyber_prefixed = Vec::with_capacity(self.kyber_pre_key_public.len() + 1);
        kyber_prefixed.push(0x08);
        kyber_prefixed.extend_from_slice(&self.kyber_pre_key_public);
        if !xeddsa_verify(&self.identity_key, &kyber_prefixed, &self.kyber_pre_key_signature) {
            return Err(RatchetError::SignatureValidation);
        }
        Ok(())
    }
}

/// 12-group-of-5-digit fingerprint used for out-of-band identity
/// verification (safety number comparison). Not part of the ratchet
/// itself; exposed so `IdentityKeyStore::is_trusted` implementations
/// have a concrete comparison primitive to call.
pub fn fingerprint(identity_public: &[u8; 32]) -> String {
    let digest = Sha256::digest(identity_public);
    let mut groups = Vec::with_capacity(12);
    for chunk in digest.chunks(2).take(12) {
        let value = u16::from_be_bytes([chunk[0], *chunk.get(1).unwrap_or(&0)]) % 100000;
        groups.push(format!("{:05}", value));
    }
    groups.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_public_matches_clamped_scalar_mult() {
        let id = IdentityKeyPair::generate();
        assert_eq!(id.public, X25519Public::from(&id.private).to_bytes());
    }

    #[test]
    fn signed_prekey_signature_verifies() {
        let identity = IdentityKeyPair::generate();
        let random = [5u8; 64];
        let spk = SignedPreKeyRecord::generate(1, &identity, 1_700_000_000_000, &random);
        assert!(spk.verify(&identity.public).is_ok());
    }

    #[test]
    fn signed_prekey_signature_rejects_wrong_identity() {
        let identity = IdentityKeyPair::generate();
        let other = IdentityKeyPair::generate();
        let random = [5u8; 64];
        let spk = SignedPreKeyRecord::generate(1, &identity, 1_700_000_000_000, &random);
        assert!(spk.verify(&other.public).is_err());
    }

    #[test]
    fn kyber_prekey_signature_verifies() {
        let identity = IdentityKeyPair::generate();
        let random = [9u8; 64];
        let kpk = KyberPreKeyRecord::generate(7, &identity, 1_700_000_000_000, &random);
        assert!(kpk.verify(&identity.public).is_ok());
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let identity = IdentityKeyPair::generate();
        assert_eq!(fingerprint(&identity.public), fingerprint(&identity.public));
    }
}
