//! Session state (C6): sender chain, a five-slot LRU receiver-chain ring
//! buffer with an out-of-order message-key cache, pending-prekey
//! bookkeeping, and the PQ ratchet's serialized state bytes.
//!
//! Stores key material as raw byte arrays (rather than `x25519_dalek`
//! types directly) so the whole record is plain-data `serde`/`bincode`
//! serializable, the same persistence convention as
//! `secure-legion-core/src/crypto/ratchet.rs`'s `RatchetState`.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use x25519_dalek::StaticSecret as X25519Static;
use zeroize::Zeroize;

use crate::crypto::ratchet_keys::{ChainKey, RootKey};

pub const MAX_RECEIVER_CHAINS: usize = 5;
pub const MAX_MESSAGE_KEYS: usize = 2000;
pub const ARCHIVED_STATES_MAX_LENGTH: usize = 40;
pub const MAX_FORWARD_JUMPS: u32 = 25000;

#[derive(Clone, Serialize, Deserialize)]
pub struct SenderChain {
    pub private_key: [u8; 32],
    pub public_key: [u8; 32],
    pub chain_key: [u8; 32],
    pub chain_index: u32,
}

impl Drop for SenderChain {
    fn drop(&mut self) {
        self.private_key.zeroize();
        self.chain_key.zeroize();
    }
}

impl SenderChain {
    pub fn keypair(&self) -> X25519Static {
        X25519Static::from(self.private_key)
    }

    pub fn chain_key(&self) -> ChainKey {
        ChainKey::new(self.chain_key, self.chain_index)
    }

    pub fn set_chain_key(&mut self, ck: &ChainKey) {
        self.chain_key = ck.key;
        self.chain_index = ck.index;
    }
}

/// One retained receiver chain plus the cache of message-key seeds for
/// counters that arrived out of order.
#[derive(Clone, Serialize, Deserialize)]
pub struct ReceiverChain {
    pub their_ratchet_public: [u8; 32],
    pub chain_key: [u8; 32],
    pub chain_index: u32,
    /// `(counter, seed)` pairs for skipped messages, oldest first.
    pub message_key_cache: VecDeque<(u32, [u8; 32])>,
}

impl Drop for ReceiverChain {
    fn drop(&mut self) {
        self.chain_key.zeroize();
        for (_, seed) in self.message_key_cache.iter_mut() {
            seed.zeroize();
        }
    }
}

impl ReceiverChain {
    pub fn chain_key(&self) -> ChainKey {
        ChainKey::new(self.chain_key, self.chain_index)
    }

    pub fn set_chain_key(&mut self, ck: &ChainKey) {
        self.chain_key = ck.key;
        self.chain_index = ck.index;
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct PendingPreKey {
    pub pre_key_id: Option<u32>,
    pub signed_pre_key_id: u32,
    pub base_key: [u8; 32],
    pub created_at_secs: u64,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct PendingKyberPreKey {
    pub kyber_pre_key_id: u32,
    pub ciphertext: Vec<u8>,
}

/// The full per-session state: one sender chain, up to
/// [`MAX_RECEIVER_CHAINS`] receiver chains, and the bookkeeping needed to
/// drive the DH ratchet and PQXDH handshake completion.
#[derive(Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session_version: u8,
    pub local_identity_key: [u8; 32],
    pub remote_identity_key: Option<[u8; 32]>,
    pub root_key: [u8; 32],
    pub alice_base_key: Option<[u8; 32]>,
    pub sender_chain: Option<SenderChain>,
    /// Ordered oldest-first; index 0 evicted first when a sixth chain
    /// would be inserted.
    pub receiver_chains: VecDeque<ReceiverChain>,
    pub pending_pre_key: Option<PendingPreKey>,
    pub pending_kyber_pre_key: Option<PendingKyberPreKey>,
    pub previous_counter: u32,
    pub local_registration_id: u32,
    pub remote_registration_id: u32,
    /// Empty means V0 (PQ disabled); 32 bytes means V1+ (SPQR enabled).
    pub pq_ratchet_state_bytes: Vec<u8>,
}

impl Drop for SessionState {
    fn drop(&mut self) {
        self.root_key.zeroize();
        self.pq_ratchet_state_bytes.zeroize();
    }
}

impl SessionState {
    pub fn root_key(&self) -> RootKey {
        RootKey::new(self.root_key)
    }

    pub fn set_root_key(&mut self, rk: &RootKey) {
        self.root_key = rk.key;
    }

    /// A session talking to one's own identity key, exempted from the
    /// forward-jump cap since both ends are driven by the same user.
    pub fn is_self_session(&self) -> bool {
        self.remote_identity_key == Some(self.local_identity_key)
    }

    /// Insert a chain, evicting the least-recently-used when the ring
    /// buffer is full.
    pub fn push_receiver_chain(&mut self, chain: ReceiverChain) {
        if self.receiver_chains.len() >= MAX_RECEIVER_CHAINS {
            self.receiver_chains.pop_front();
        }
        self.receiver_chains.push_back(chain);
    }

    /// Look up a receiver chain by its ratchet public key, moving it to
    /// the back of the ring on access so `push_receiver_chain`'s eviction
    /// is LRU rather than insertion-order FIFO.
    pub fn find_receiver_chain_mut(&mut self, their_ratchet_public: &[u8; 32]) -> Option<&mut ReceiverChain> {
        let pos = self
            .receiver_chains
            .iter()
            .position(|c| &c.their_ratchet_public == their_ratchet_public)?;
        if pos != self.receiver_chains.len() - 1 {
            let chain = self.receiver_chains.remove(pos).expect("position just found");
            self.receiver_chains.push_back(chain);
        }
        self.receiver_chains.back_mut()
    }

    /// Total cached message-key seeds across all receiver chains.
    pub fn total_cached_keys(&self) -> usize {
        self.receiver_chains.iter().map(|c| c.message_key_cache.len()).sum()
    }

    /// Evict the globally oldest cached seed (the front of the oldest
    /// non-empty chain's cache) to make room for a new insertion once the
    /// session-wide cap of [`MAX_MESSAGE_KEYS`] is reached.
    pub fn evict_oldest_cached_key(&mut self) {
        if let Some(chain) = self.receiver_chains.iter_mut().find(|c| !c.message_key_cache.is_empty()) {
            chain.message_key_cache.pop_front();
        }
    }
}

/// Holds the current session state plus archived previous states, so
/// out-of-order messages can still be decrypted across a session
/// re-initialization.
#[derive(Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub current: SessionState,
    /// Most-recently-archived last; capped at
    /// [`ARCHIVED_STATES_MAX_LENGTH`].
    pub previous: VecDeque<SessionState>,
}

impl SessionRecord {
    pub fn new(current: SessionState) -> Self {
        SessionRecord {
            current,
            previous: VecDeque::new(),
        }
    }

    /// Archive the current state and promote `new_state` to current.
    pub fn promote(&mut self, new_state: SessionState) {
        let old = std::mem::replace(&mut self.current, new_state);
        if self.previous.len() >= ARCHIVED_STATES_MAX_LENGTH {
            self.previous.pop_front();
        }
        self.previous.push_back(old);
    }

    /// Iterate current then archived states, most-recent-first.
    pub fn all_states(&self) -> impl Iterator<Item = &SessionState> {
        std::iter::once(&self.current).chain(self.previous.iter().rev())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(tag: u8) -> ReceiverChain {
        ReceiverChain {
            their_ratchet_public: [tag; 32],
            chain_key: [tag; 32],
            chain_index: 0,
            message_key_cache: VecDeque::new(),
        }
    }

    fn bare_state() -> SessionState {
        SessionState {
            session_version: 4,
            local_identity_key: [0u8; 32],
            remote_identity_key: None,
            root_key: [1u8; 32],
            alice_base_key: None,
            sender_chain: None,
            receiver_chains: VecDeque::new(),
            pending_pre_key: None,
            pending_kyber_pre_key: None,
            previous_counter: 0,
            local_registration_id: 0,
            remote_registration_id: 0,
            pq_ratchet_state_bytes: Vec::new(),
        }
    }

    #[test]
    fn accessing_a_chain_protects_it_from_eviction() {
        let mut state = bare_state();
        for tag in 1..=MAX_RECEIVER_CHAINS as u8 {
            state.push_receiver_chain(chain(tag));
        }
        // Touch chain 1, the oldest by insertion order; a pure FIFO ring
        // would evict it next regardless.
        assert!(state.find_receiver_chain_mut(&[1u8; 32]).is_some());
        state.push_receiver_chain(chain(MAX_RECEIVER_CHAINS as u8 + 1));

        assert!(state.find_receiver_chain_mut(&[1u8; 32]).is_some());
        assert!(state.find_receiver_chain_mut(&[2u8; 32]).is_none());
    }

    #[test]
    fn self_session_detected_by_matching_identity_keys() {
        let mut state = bare_state();
        assert!(!state.is_self_session());
        state.remote_identity_key = Some(state.local_identity_key);
        assert!(state.is_self_session());
    }
}
