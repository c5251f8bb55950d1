//! X3DH/PQXDH session initialization (C7): Alice- and Bob-side session
//! establishment combining three or four X25519 agreements with one
//! ML-KEM-1024 encapsulation.
//!
//! Grounded in `other_examples/.../signal-x3dh.rs.rs`'s DH1..DH4
//! concatenation-with-`0xFF`-padding convention, extended with the v4
//! Kyber shared secret per spec §4.6. Only v4 (PQXDH) is driven by
//! [`initialize_alice_session`]/[`initialize_bob_session`]; a v3
//! `PreKeySignalMessage` is rejected by the decrypt path with
//! [`RatchetError::X3dhNoLongerSupported`](crate::error::RatchetError::X3dhNoLongerSupported)
//! rather than ever reaching this module.

use std::collections::VecDeque;

use x25519_dalek::{PublicKey as X25519Public, StaticSecret as X25519Static};

use crate::crypto::keys::IdentityKeyPair;
use crate::crypto::primitives::{hkdf_sha256, ml_kem_1024_decap, ml_kem_1024_encap, x25519_raw_agreement};
use crate::error::{RatchetError, Result};
use crate::pqratchet::PqRatchetState;

use super::state::{SenderChain, SessionState};

const PADDING: [u8; 32] = [0xffu8; 32];
const INFO_V3: &[u8] = b"WhisperText";
const INFO_V4: &[u8] = b"WhisperText_X25519_SHA-256_CRYSTALS-KYBER-1024";

pub const SESSION_VERSION_V4: u8 = 4;

struct DerivedSecrets {
    root_key: [u8; 32],
    chain_key: [u8; 32],
    pqr_auth_key: [u8; 32],
}

fn derive_v4(secret_input: &[u8]) -> Result<DerivedSecrets> {
    let derived = hkdf_sha256(secret_input, None, INFO_V4, 96)?;
    let mut root_key = [0u8; 32];
    let mut chain_key = [0u8; 32];
    let mut pqr_auth_key = [0u8; 32];
    root_key.copy_from_slice(&derived[0..32]);
    chain_key.copy_from_slice(&derived[32..64]);
    pqr_auth_key.copy_from_slice(&derived[64..96]);
    Ok(DerivedSecrets {
        root_key,
        chain_key,
        pqr_auth_key,
    })
}

/// Reference-only: the v3 (classical X3DH, no PQ) derivation, kept to
/// document the HKDF info-string/length difference the decrypt path
/// rejects outright.
#[allow(dead_code)]
fn derive_v3(secret_input: &[u8]) -> Result<([u8; 32], [u8; 32])> {
    let derived = hkdf_sha256(secret_input, None, INFO_V3, 64)?;
    let mut root_key = [0u8; 32];
    let mut chain_key = [0u8; 32];
    root_key.copy_from_slice(&derived[0..32]);
    chain_key.copy_from_slice(&derived[32..64]);
    Ok((root_key, chain_key))
}

fn dh_ratchet_bootstrap(
    root_key: [u8; 32],
    their_signed_pre_key_public: &[u8; 32],
) -> Result<(SenderChain, [u8; 32])> {
    let sender_ratchet_private = X25519Static::random_from_rng(rand_core::OsRng);
    let sender_ratchet_public = X25519Public::from(&sender_ratchet_private).to_bytes();
    let rk = crate::crypto::ratchet_keys::RootKey::new(root_key);
    let (new_root, chain) = rk.create_chain(&sender_ratchet_private, their_signed_pre_key_public)?;
    let sender_chain = SenderChain {
        private_key: sender_ratchet_private.to_bytes(),
        public_key: sender_ratchet_public,
        chain_key: chain.key,
        chain_index: chain.index,
    };
    Ok((sender_chain, new_root.key))
}

pub struct AliceSessionInput<'a> {
    pub our_identity: &'a IdentityKeyPair,
    pub our_base_key: &'a X25519Static,
    pub their_identity_public: [u8; 32],
    pub their_signed_pre_key_public: [u8; 32],
    pub their_one_time_pre_key_public: Option<[u8; 32]>,
    pub their_kyber_pre_key_public: Vec<u8>,
    pub local_registration_id: u32,
    pub remote_registration_id: u32,
}

pub struct AliceSessionOutput {
    pub state: SessionState,
    pub pq_ratchet: PqRatchetState,
    pub kyber_ciphertext: Vec<u8>,
}

/// Alice-side PQXDH initialization (v4 only).
pub fn initialize_alice_session(input: AliceSessionInput) -> Result<AliceSessionOutput> {
    let dh1 = x25519_raw_agreement(&input.our_identity.private, &input.their_signed_pre_key_public)
        .map_err(|_| RatchetError::InvalidKey("DH1 agreement failed"))?;
    let dh2 = x25519_raw_agreement(input.our_base_key, &input.their_identity_public)
        .map_err(|_| RatchetError::InvalidKey("DH2 agreement failed"))?;
    let dh3 = x25519_raw_agreement(input.our_base_key, &input.their_signed_pre_key_public)
        .map_err(|_| RatchetError::InvalidKey("DH3 agreement failed"))?;
    let dh4 = match &input.their_one_time_pre_key_public {
        Some(otk) => Some(
            x25519_raw_agreement(input.our_base_key, otk)
                .map_err(|_| RatchetError::InvalidKey("DH4 agreement failed"))?,
        ),
        None => None,
    };
    let (kyber_shared, kyber_ciphertext) = ml_kem_1024_encap(&input.their_kyber_pre_key_public)?;

    let mut secret_input = Vec::with_capacity(32 + 32 * 4 + 32);
    secret_input.extend_from_slice(&PADDING);
    secret_input.extend_from_slice(&dh1);
    secret_input.extend_from_slice(&dh2);
    secret_input.extend_from_slice(&dh3);
    if let Some(dh4) = dh4 {
        secret_input.extend_from_slice(&dh4);
    }
    secret_input.extend_from_slice(&kyber_shared);

    let derived = derive_v4(&secret_input)?;
    let (sender_chain, root_after_ratchet) =
        dh_ratchet_bootstrap(derived.root_key, &input.their_signed_pre_key_public)?;

    let state = SessionState {
        session_version: SESSION_VERSION_V4,
        local_identity_key: input.our_identity.public,
        remote_identity_key: Some(input.their_identity_public),
        root_key: root_after_ratchet,
        alice_base_key: Some(X25519Public::from(input.our_base_key).to_bytes()),
        sender_chain: Some(sender_chain),
        receiver_chains: VecDeque::new(),
        pending_pre_key: None,
        pending_kyber_pre_key: None,
        previous_counter: 0,
        local_registration_id: input.local_registration_id,
        remote_registration_id: input.remote_registration_id,
        pq_ratchet_state_bytes: vec![0u8; 32],
    };

    let pq_ratchet = PqRatchetState::new_alice(&derived.pqr_auth_key)?;

    Ok(AliceSessionOutput {
        state,
        pq_ratchet,
        kyber_ciphertext,
    })
}

pub struct BobSessionInput<'a> {
    pub our_identity: &'a IdentityKeyPair,
    pub our_signed_pre_key: &'a X25519Static,
    pub our_one_time_pre_key: Option<&'a X25519Static>,
    pub our_kyber_decap_key: &'a [u8],
    pub their_identity_public: [u8; 32],
    pub their_base_key_public: [u8; 32],
    pub kyber_ciphertext: &'a [u8],
    pub local_registration_id: u32,
    pub remote_registration_id: u32,
}

pub struct BobSessionOutput {
    pub state: SessionState,
    pub pq_ratchet: PqRatchetState,
}

/// Bob-side PQXDH initialization (v4 only), mirroring Alice's DH
/// computations and running `ML-KEM-1024.decap` to recover the shared PQ
/// secret.
pub fn initialize_bob_session(input: BobSessionInput) -> Result<BobSessionOutput> {
    let dh1 = x25519_raw_agreement(&input.our_signed_pre_key, &input.their_identity_public)
        .map_err(|_| RatchetError::InvalidKey("DH1 agreement failed"))?;
    let dh2 = x25519_raw_agreement(&input.our_identity.private, &input.their_base_key_public)
        .map_err(|_| RatchetError::InvalidKey("DH2 agreement failed"))?;
    let dh3 = x25519_raw_agreement(&input.our_signed_pre_key, &input.their_base_key_public)
        .map_err(|_| RatchetError::InvalidKey("DH3 agreement failed"))?;
    let dh4 = match input.our_one_time_pre_key {
        Some(otk) => Some(
            x25519_raw_agreement(otk, &input.their_base_key_public)
                .map_err(|_| RatchetError::InvalidKey("DH4 agreement failed"))?,
        ),
        None => None,
    };
    let kyber_shared = ml_kem_1024_decap(input.our_kyber_decap_key, input.kyber_ciphertext)?;

    let mut secret_input = Vec::with_capacity(32 + 32 * 4 + 32);
    secret_input.extend_from_slice(&PADDING);
    secret_input.extend_from_slice(&dh1);
    secret_input.extend_from_slice(&dh2);
    secret_input.extend_from_slice(&dh3);
    if let Some(dh4) = dh4 {
        secret_input.extend_from_slice(&dh4);
    }
    secret_input.extend_from_slice(&kyber_shared);

    let derived = derive_v4(&secret_input)?;

    let state = SessionState {
        session_version: SESSION_VERSION_V4,
        local_identity_key: input.our_identity.public,
        remote_identity_key: Some(input.their_identity_public),
        root_key: derived.root_key,
        alice_base_key: Some(input.their_base_key_public),
        sender_chain: None,
        receiver_chains: VecDeque::new(),
        pending_pre_key: None,
        pending_kyber_pre_key: None,
        previous_counter: 0,
        local_registration_id: input.local_registration_id,
        remote_registration_id: input.remote_registration_id,
        pq_ratchet_state_bytes: vec![0u8; 32],
    };

    let pq_ratchet = PqRatchetState::new_bob(&derived.pqr_auth_key)?;

    Ok(BobSessionOutput { state, pq_ratchet })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::{IdentityKeyPair, KyberPreKeyRecord, SignedPreKeyRecord};

    #[test]
    fn alice_and_bob_derive_matching_root_key() {
        let alice_identity = IdentityKeyPair::generate();
        let bob_identity = IdentityKeyPair::generate();
        let bob_signed_pre_key = X25519Static::random_from_rng(rand_core::OsRng);
        let bob_signed_pre_key_public = X25519Public::from(&bob_signed_pre_key).to_bytes();
        let random = [1u8; 64];
        let bob_kyber = KyberPreKeyRecord::generate(1, &bob_identity, 0, &random);
        let alice_base_key = X25519Static::random_from_rng(rand_core::OsRng);

        let alice_out = initialize_alice_session(AliceSessionInput {
            our_identity: &alice_identity,
            our_base_key: &alice_base_key,
            their_identity_public: bob_identity.public,
            their_signed_pre_key_public: bob_signed_pre_key_public,
            their_one_time_pre_key_public: None,
            their_kyber_pre_key_public: bob_kyber.encap_key.clone(),
            local_registration_id: 1,
            remote_registration_id: 2,
        })
        .unwrap();

        let bob_out = initialize_bob_session(BobSessionInput {
            our_identity: &bob_identity,
            our_signed_pre_key: &bob_signed_pre_key,
            our_one_time_pre_key: None,
            our_kyber_decap_key: &bob_kyber.decap_key,
            their_identity_public: alice_identity.public,
            their_base_key_public: X25519Public::from(&alice_base_key).to_bytes(),
            kyber_ciphertext: &alice_out.kyber_ciphertext,
            local_registration_id: 2,
            remote_registration_id: 1,
        })
        .unwrap();

        // Alice's session root has already taken one DH ratchet step past
        // the PQXDH-derived root (`dh_ratchet_bootstrap`); Bob's has not.
        // Recompute the pre-ratchet root independently, from each side's
        // own private keys plus the public values exchanged above, and
        // check it against Bob's unratcheted session root directly —
        // the one value both sides must agree on for the handshake to be
        // correct.
        let dh1 = x25519_raw_agreement(&alice_identity.private, &bob_signed_pre_key_public).unwrap();
        let dh2 = x25519_raw_agreement(&alice_base_key, &bob_identity.public).unwrap();
        let dh3 = x25519_raw_agreement(&alice_base_key, &bob_signed_pre_key_public).unwrap();
        let kyber_shared = ml_kem_1024_decap(&bob_kyber.decap_key, &alice_out.kyber_ciphertext).unwrap();

        let mut secret_input = Vec::with_capacity(32 + 32 * 3 + 32);
        secret_input.extend_from_slice(&PADDING);
        secret_input.extend_from_slice(&dh1);
        secret_input.extend_from_slice(&dh2);
        secret_input.extend_from_slice(&dh3);
        secret_input.extend_from_slice(&kyber_shared);
        let pre_ratchet_root = derive_v4(&secret_input).unwrap().root_key;

        assert_eq!(pre_ratchet_root, bob_out.state.root_key);
        assert_ne!(alice_out.state.root_key, bob_out.state.root_key);
    }

    #[test]
    fn alice_session_carries_a_sender_chain_immediately() {
        let alice_identity = IdentityKeyPair::generate();
        let bob_identity = IdentityKeyPair::generate();
        let bob_signed_pre_key = X25519Static::random_from_rng(rand_core::OsRng);
        let bob_signed_pre_key_public = X25519Public::from(&bob_signed_pre_key).to_bytes();
        let random = [1u8; 64];
        let bob_kyber = KyberPreKeyRecord::generate(1, &bob_identity, 0, &random);
        let alice_base_key = X25519Static::random_from_rng(rand_core::OsRng);

        let alice_out = initialize_alice_session(AliceSessionInput {
            our_identity: &alice_identity,
            our_base_key: &alice_base_key,
            their_identity_public: bob_identity.public,
            their_signed_pre_key_public: bob_signed_pre_key_public,
            their_one_time_pre_key_public: None,
            their_kyber_pre_key_public: bob_kyber.encap_key.clone(),
            local_registration_id: 1,
            remote_registration_id: 2,
        })
        .unwrap();

        assert!(alice_out.state.sender_chain.is_some());
        assert!(alice_out.pq_ratchet.is_enabled());
        // unused import guard for SignedPreKeyRecord grounding reference
        let _ = std::marker::PhantomData::<SignedPreKeyRecord>;
    }
}
