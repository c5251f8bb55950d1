//! Session cipher (C8): the encrypt/decrypt entry points tying the
//! PQXDH bootstrap, the classical double ratchet, and the SPQR
//! post-quantum ratchet together behind one send/receive surface.
//!
//! Grounded in `other_examples/.../rust-protocol-src-session_cipher.rs.rs`'s
//! `message_encrypt`/`message_decrypt_prekey`/`message_decrypt_signal`
//! control flow: encrypt advances the chain and checks trust before
//! persisting, decrypt tries the current state first and falls back to
//! archived states in most-recent-first order, short-circuiting on a
//! duplicate-message error instead of trying older states.

use std::collections::VecDeque;

use x25519_dalek::{PublicKey as X25519Public, StaticSecret as X25519Static};

use crate::config::SessionConfig;
use crate::crypto::primitives::{aes256_cbc_decrypt, aes256_cbc_encrypt, x25519_raw_agreement};
use crate::crypto::ratchet_keys::{ChainKey, MessageKeys};
use crate::error::{RatchetError, Result};
use crate::pqratchet::PqRatchetState;
use crate::wire::signal_message::{PreKeySignalMessage, SignalMessage};
use crate::wire::{version_major, CiphertextMessage};
use crate::storage::{
    Direction, IdentityKeyStore, KyberPreKeyStore, PreKeyStore, ProtocolAddress, SessionStore, SignedPreKeyStore,
};

use super::init::{initialize_bob_session, BobSessionInput, SESSION_VERSION_V4};
use super::state::{
    ReceiverChain, SenderChain, SessionRecord, SessionState, ARCHIVED_STATES_MAX_LENGTH, MAX_FORWARD_JUMPS,
    MAX_MESSAGE_KEYS,
};

/// Read-only counters a caller can inspect to monitor ratchet health
/// (cache pressure, replay attempts, out-of-order arrival).
#[derive(Clone, Copy, Debug, Default)]
pub struct Stats {
    pub messages_encrypted: u64,
    pub messages_decrypted: u64,
    pub keys_evicted: u64,
    pub forward_jumps_rejected: u64,
    pub duplicates_rejected: u64,
}

/// Drives the per-session send/receive protocol. Holds only health
/// counters; all session material lives in the caller's `SessionStore`
/// and the `PqRatchetState`/`SessionConfig` passed into each call.
#[derive(Default)]
pub struct SessionCipher {
    stats: Stats,
}

impl SessionCipher {
    pub fn new() -> Self {
        SessionCipher::default()
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    /// Encrypt `plaintext` for `address`, advancing the sender chain and
    /// persisting the updated session. Wraps the result in a
    /// `PreKeySignalMessage` if the session still has an unacknowledged
    /// prekey handshake pending (and that handshake isn't stale per
    /// `config`), otherwise emits a plain `SignalMessage`.
    pub fn encrypt<A, SS, IS>(
        &mut self,
        address: &A,
        plaintext: &[u8],
        pq: &mut PqRatchetState,
        session_store: &mut SS,
        identity_store: &mut IS,
        config: &SessionConfig,
        now_secs: u64,
    ) -> Result<CiphertextMessage>
    where
        A: ProtocolAddress,
        SS: SessionStore<A>,
        IS: IdentityKeyStore<A>,
    {
        let mut record = session_store.load_session(address)?.ok_or(RatchetError::SessionNotFound)?;

        let remote_identity = record
            .current
            .remote_identity_key
            .ok_or(RatchetError::InvalidSession("no remote identity key"))?;
        let local_identity = record.current.local_identity_key;

        let (sender_ratchet_public, chain_key) = {
            let sender_chain = record
                .current
                .sender_chain
                .as_ref()
                .ok_or(RatchetError::InvalidSession("no sender chain"))?;
            (sender_chain.public_key, sender_chain.chain_key())
        };

        let sent = pq.send();
        let seed = chain_key.message_key_seed();
        let message_keys = MessageKeys::derive_from(&seed, chain_key.index, sent.key.as_ref())?;

        let ciphertext = aes256_cbc_encrypt(plaintext, &message_keys.cipher_key, &message_keys.iv);

        let signal_message = SignalMessage {
            sender_ratchet_public,
            counter: chain_key.index,
            previous_counter: record.current.previous_counter,
            ciphertext,
            pqr_message: if pq.is_enabled() { Some(sent.message) } else { None },
        };
        let embedded = signal_message.serialize(&local_identity, &remote_identity, &message_keys.mac_key);

        let out = match &record.current.pending_pre_key {
            Some(pending) => {
                if now_secs.saturating_sub(pending.created_at_secs) > config.max_unacknowledged_session_age_secs {
                    return Err(RatchetError::SessionNotFound);
                }
                let prekey_message = PreKeySignalMessage {
                    pre_key_id: pending.pre_key_id,
                    base_key: pending.base_key,
                    identity_key: local_identity,
                    embedded_message: embedded,
                    registration_id: record.current.local_registration_id,
                    signed_pre_key_id: pending.signed_pre_key_id,
                    kyber_pre_key_id: record.current.pending_kyber_pre_key.as_ref().map(|k| k.kyber_pre_key_id),
                    kyber_ciphertext: record.current.pending_kyber_pre_key.as_ref().map(|k| k.ciphertext.clone()),
                };
                CiphertextMessage::PreKey(prekey_message.serialize()?)
            }
            None => CiphertextMessage::Signal(embedded),
        };

        record
            .current
            .sender_chain
            .as_mut()
            .expect("checked above")
            .set_chain_key(&chain_key.next());

        if !identity_store.is_trusted(address, &remote_identity, Direction::Sending)? {
            return Err(RatchetError::UntrustedIdentity);
        }
        identity_store.save_identity(address, &remote_identity)?;
        session_store.store_session(address, record)?;

        self.stats.messages_encrypted += 1;
        Ok(out)
    }

    /// Decrypt an inbound wire message for `address`, dispatching on
    /// whether it arrived wrapped in a prekey handshake.
    #[allow(clippy::too_many_arguments)]
    pub fn decrypt<A, SS, IS, PKS, SPKS, KPKS>(
        &mut self,
        address: &A,
        message: &CiphertextMessage,
        pq: &mut PqRatchetState,
        session_store: &mut SS,
        identity_store: &mut IS,
        pre_key_store: &mut PKS,
        signed_pre_key_store: &mut SPKS,
        kyber_pre_key_store: &mut KPKS,
    ) -> Result<Vec<u8>>
    where
        A: ProtocolAddress,
        SS: SessionStore<A>,
        IS: IdentityKeyStore<A>,
        PKS: PreKeyStore,
        SPKS: SignedPreKeyStore,
        KPKS: KyberPreKeyStore,
    {
        match message {
            CiphertextMessage::PreKey(bytes) => self.decrypt_prekey(
                address,
                bytes,
                pq,
                session_store,
                identity_store,
                pre_key_store,
                signed_pre_key_store,
                kyber_pre_key_store,
            ),
            CiphertextMessage::Signal(bytes) => self.decrypt_signal(address, bytes, pq, session_store, identity_store),
        }
    }

    fn decrypt_signal<A, SS, IS>(
        &mut self,
        address: &A,
        bytes: &[u8],
        pq: &mut PqRatchetState,
        session_store: &mut SS,
        identity_store: &mut IS,
    ) -> Result<Vec<u8>>
    where
        A: ProtocolAddress,
        SS: SessionStore<A>,
        IS: IdentityKeyStore<A>,
    {
        let mut record = session_store.load_session(address)?.ok_or(RatchetError::SessionNotFound)?;
        let local_identity = record.current.local_identity_key;
        let remote_identity = record
            .current
            .remote_identity_key
            .ok_or(RatchetError::InvalidSession("no remote identity key"))?;

        let mut attempt = record.current.clone();
        match decrypt_with_state(&mut attempt, pq, bytes, &local_identity, &remote_identity, &mut self.stats) {
            Ok(plaintext) => {
                record.current = attempt;
                self.finish_decrypt(address, record, &remote_identity, session_store, identity_store)?;
                return Ok(plaintext);
            }
            Err(RatchetError::DuplicateMessage) => {
                self.stats.duplicates_rejected += 1;
                return Err(RatchetError::DuplicateMessage);
            }
            Err(_) => {}
        }

        let archived: Vec<SessionState> = record.previous.iter().cloned().collect();
        for idx in (0..archived.len()).rev() {
            let mut attempt = archived[idx].clone();
            let mut archived_pq = PqRatchetState::from_persisted_archived(&attempt.pq_ratchet_state_bytes);
            match decrypt_with_state(
                &mut attempt,
                &mut archived_pq,
                bytes,
                &local_identity,
                &remote_identity,
                &mut self.stats,
            ) {
                Ok(plaintext) => {
                    record.previous.remove(idx);
                    let superseded = std::mem::replace(&mut record.current, attempt);
                    record.previous.push_back(superseded);
                    if record.previous.len() > ARCHIVED_STATES_MAX_LENGTH {
                        record.previous.pop_front();
                    }
                    self.finish_decrypt(address, record, &remote_identity, session_store, identity_store)?;
                    return Ok(plaintext);
                }
                Err(RatchetError::DuplicateMessage) => {
                    self.stats.duplicates_rejected += 1;
                    return Err(RatchetError::DuplicateMessage);
                }
                Err(_) => continue,
            }
        }

        Err(RatchetError::InvalidMessage("no session state could decrypt this message".into()))
    }

    #[allow(clippy::too_many_arguments)]
    fn decrypt_prekey<A, SS, IS, PKS, SPKS, KPKS>(
        &mut self,
        address: &A,
        bytes: &[u8],
        pq: &mut PqRatchetState,
        session_store: &mut SS,
        identity_store: &mut IS,
        pre_key_store: &mut PKS,
        signed_pre_key_store: &mut SPKS,
        kyber_pre_key_store: &mut KPKS,
    ) -> Result<Vec<u8>>
    where
        A: ProtocolAddress,
        SS: SessionStore<A>,
        IS: IdentityKeyStore<A>,
        PKS: PreKeyStore,
        SPKS: SignedPreKeyStore,
        KPKS: KyberPreKeyStore,
    {
        let prekey_msg = PreKeySignalMessage::deserialize(bytes)?;
        let existing = session_store.load_session(address)?;
        let reuse_existing = existing
            .as_ref()
            .map(|r| r.current.session_version == SESSION_VERSION_V4 && r.current.alice_base_key == Some(prekey_msg.base_key))
            .unwrap_or(false);

        let mut used_pre_key_id = None;
        let mut used_kyber_pre_key_id = None;
        let mut used_signed_pre_key_id = 0u32;

        let mut record = if reuse_existing {
            existing.expect("checked above")
        } else {
            let our_identity = identity_store.get_identity_key_pair()?;
            let signed_pre_key = signed_pre_key_store
                .load_signed_pre_key(prekey_msg.signed_pre_key_id)?
                .ok_or(RatchetError::InvalidSession("unknown signed prekey id"))?;
            let one_time_pre_key = match prekey_msg.pre_key_id {
                Some(id) => pre_key_store.load_pre_key(id)?,
                None => None,
            };
            let kyber_pre_key_id = prekey_msg.kyber_pre_key_id.ok_or(RatchetError::MissingKyberCiphertext)?;
            let kyber_ciphertext = prekey_msg
                .kyber_ciphertext
                .as_ref()
                .ok_or(RatchetError::MissingKyberCiphertext)?;
            let kyber_pre_key = kyber_pre_key_store
                .load_kyber_pre_key(kyber_pre_key_id)?
                .ok_or(RatchetError::InvalidSession("unknown kyber prekey id"))?;
            let local_registration_id = identity_store.get_local_registration_id()?;

            let bob_out = initialize_bob_session(BobSessionInput {
                our_identity: &our_identity,
                our_signed_pre_key: &signed_pre_key.keypair,
                our_one_time_pre_key: one_time_pre_key.as_ref().map(|k| &k.keypair),
                our_kyber_decap_key: &kyber_pre_key.decap_key,
                their_identity_public: prekey_msg.identity_key,
                their_base_key_public: prekey_msg.base_key,
                kyber_ciphertext,
                local_registration_id,
                remote_registration_id: prekey_msg.registration_id,
            })?;

            *pq = bob_out.pq_ratchet;
            used_pre_key_id = prekey_msg.pre_key_id;
            used_kyber_pre_key_id = Some(kyber_pre_key_id);
            used_signed_pre_key_id = signed_pre_key.id;

            match existing {
                Some(mut rec) => {
                    rec.promote(bob_out.state);
                    rec
                }
                None => SessionRecord::new(bob_out.state),
            }
        };

        let local_identity = record.current.local_identity_key;
        let remote_identity = record
            .current
            .remote_identity_key
            .ok_or(RatchetError::InvalidSession("no remote identity key"))?;

        let mut attempt = record.current.clone();
        let plaintext = decrypt_with_state(
            &mut attempt,
            pq,
            &prekey_msg.embedded_message,
            &local_identity,
            &remote_identity,
            &mut self.stats,
        )?;
        record.current = attempt;

        // Mark the Kyber prekey used before removing the one-time EC
        // prekey, so a crash between the two never leaves the Kyber
        // prekey silently reusable.
        if let Some(kyber_id) = used_kyber_pre_key_id {
            kyber_pre_key_store.mark_kyber_pre_key_used(kyber_id, used_signed_pre_key_id, &prekey_msg.base_key)?;
        }
        if let Some(pre_key_id) = used_pre_key_id {
            pre_key_store.remove_pre_key(pre_key_id)?;
        }

        self.finish_decrypt(address, record, &remote_identity, session_store, identity_store)?;
        Ok(plaintext)
    }

    fn finish_decrypt<A, SS, IS>(
        &mut self,
        address: &A,
        record: SessionRecord,
        remote_identity: &[u8; 32],
        session_store: &mut SS,
        identity_store: &mut IS,
    ) -> Result<()>
    where
        A: ProtocolAddress,
        SS: SessionStore<A>,
        IS: IdentityKeyStore<A>,
    {
        if !identity_store.is_trusted(address, remote_identity, Direction::Receiving)? {
            return Err(RatchetError::UntrustedIdentity);
        }
        identity_store.save_identity(address, remote_identity)?;
        session_store.store_session(address, record)?;
        self.stats.messages_decrypted += 1;
        Ok(())
    }
}

/// Decrypt one `SignalMessage` against `state`, performing a DH ratchet
/// step if `sender_ratchet_public` hasn't been seen before. On success,
/// clears any pending prekey bookkeeping (the handshake is now
/// acknowledged).
fn decrypt_with_state(
    state: &mut SessionState,
    pq: &mut PqRatchetState,
    message_bytes: &[u8],
    local_identity: &[u8; 32],
    remote_identity: &[u8; 32],
    stats: &mut Stats,
) -> Result<Vec<u8>> {
    let (parsed, version, body, mac) = SignalMessage::deserialize(message_bytes)?;
    if version_major(version) != state.session_version {
        return Err(RatchetError::UnrecognizedCiphertextVersion(version));
    }
    if state.root_key == [0u8; 32] {
        return Err(RatchetError::InvalidSession("zero root key"));
    }

    let chain_key = get_or_create_chain_key(state, pq, &parsed.sender_ratchet_public)?;
    let seed = resolve_message_key_seed(state, &parsed.sender_ratchet_public, &chain_key, parsed.counter, stats)?;

    let pq_salt = pq.recv(parsed.pqr_message.as_deref().unwrap_or(&[]))?;
    let message_keys = MessageKeys::derive_from(&seed, parsed.counter, pq_salt.as_ref())?;

    SignalMessage::verify_mac(&body, version, remote_identity, local_identity, &message_keys.mac_key, &mac)?;

    let plaintext = aes256_cbc_decrypt(&parsed.ciphertext, &message_keys.cipher_key, &message_keys.iv)?;

    state.pending_pre_key = None;
    state.pending_kyber_pre_key = None;

    Ok(plaintext)
}

/// Look up the receiver chain for `their_ratchet_public`, performing a
/// DH ratchet step (fresh receiver chain, fresh sender chain, root key
/// advanced) the first time this ratchet public key is seen.
fn get_or_create_chain_key(state: &mut SessionState, pq: &mut PqRatchetState, their_ratchet_public: &[u8; 32]) -> Result<ChainKey> {
    if let Some(chain) = state.find_receiver_chain_mut(their_ratchet_public) {
        return Ok(chain.chain_key());
    }

    let our_sender_private = {
        let sender_chain = state
            .sender_chain
            .as_ref()
            .ok_or(RatchetError::InvalidSession("no sender chain to ratchet from"))?;
        sender_chain.keypair()
    };

    let root_key = state.root_key();
    let (receiver_root, receiver_chain_key) = root_key.create_chain(&our_sender_private, their_ratchet_public)?;

    let dh_shared = x25519_raw_agreement(&our_sender_private, their_ratchet_public)
        .map_err(|_| RatchetError::InvalidKey("low-order ratchet public key"))?;
    pq.ratchet_step(&dh_shared)?;

    let new_sender_private = X25519Static::random_from_rng(rand_core::OsRng);
    let (sender_root, sender_chain_key) = receiver_root.create_chain(&new_sender_private, their_ratchet_public)?;

    state.push_receiver_chain(ReceiverChain {
        their_ratchet_public: *their_ratchet_public,
        chain_key: receiver_chain_key.key,
        chain_index: receiver_chain_key.index,
        message_key_cache: VecDeque::new(),
    });

    state.previous_counter = state.sender_chain.as_ref().map(|c| c.chain_index).unwrap_or(0);
    state.sender_chain = Some(SenderChain {
        private_key: new_sender_private.to_bytes(),
        public_key: X25519Public::from(&new_sender_private).to_bytes(),
        chain_key: sender_chain_key.key,
        chain_index: sender_chain_key.index,
    });
    state.set_root_key(&sender_root);

    Ok(receiver_chain_key)
}

/// Resolve the message-key seed for `counter` on the receiver chain
/// keyed by `their_ratchet_public`: a cache hit for an out-of-order
/// counter already behind the chain, or a forward walk (caching every
/// skipped seed) up to `counter`.
fn resolve_message_key_seed(
    state: &mut SessionState,
    their_ratchet_public: &[u8; 32],
    chain_key: &ChainKey,
    counter: u32,
    stats: &mut Stats,
) -> Result<[u8; 32]> {
    if chain_key.index > counter {
        let chain = state
            .find_receiver_chain_mut(their_ratchet_public)
            .expect("receiver chain just resolved by get_or_create_chain_key");
        return match chain.message_key_cache.iter().position(|(c, _)| *c == counter) {
            Some(pos) => Ok(chain.message_key_cache.remove(pos).expect("position just found").1),
            None => Err(RatchetError::DuplicateMessage),
        };
    }

    let jump = counter - chain_key.index;
    if jump > MAX_FORWARD_JUMPS && !state.is_self_session() {
        stats.forward_jumps_rejected += 1;
        return Err(RatchetError::InvalidMessage("forward jump exceeds maximum".into()));
    }

    let mut current = chain_key.clone();
    while current.index < counter {
        let seed = current.message_key_seed();
        if state.total_cached_keys() >= MAX_MESSAGE_KEYS {
            state.evict_oldest_cached_key();
            stats.keys_evicted += 1;
        }
        let chain = state
            .find_receiver_chain_mut(their_ratchet_public)
            .expect("receiver chain just resolved by get_or_create_chain_key");
        chain.message_key_cache.push_back((current.index, seed));
        current = current.next();
    }

    let seed = current.message_key_seed();
    let next = current.next();
    state
        .find_receiver_chain_mut(their_ratchet_public)
        .expect("receiver chain just resolved by get_or_create_chain_key")
        .set_chain_key(&next);

    Ok(seed)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;

    use crate::crypto::keys::{IdentityKeyPair, KyberPreKeyRecord, PreKeyRecord, SignedPreKeyRecord};
    use crate::session::init::{initialize_alice_session, AliceSessionInput};

    use super::*;

    #[derive(Clone, Eq, PartialEq, Hash)]
    struct Addr(&'static str);

    #[derive(Default)]
    struct MemoryStore {
        sessions: Rc<RefCell<HashMap<&'static str, SessionRecord>>>,
        identities: Rc<RefCell<HashMap<&'static str, [u8; 32]>>>,
        identity_pair: Option<IdentityKeyPair>,
        registration_id: u32,
        pre_keys: HashMap<u32, PreKeyRecord>,
        signed_pre_keys: HashMap<u32, SignedPreKeyRecord>,
        kyber_pre_keys: HashMap<u32, KyberPreKeyRecord>,
        kyber_used: Vec<(u32, u32, [u8; 32])>,
    }

    impl SessionStore<Addr> for MemoryStore {
        fn load_session(&self, address: &Addr) -> Result<Option<SessionRecord>> {
            Ok(self.sessions.borrow().get(address.0).cloned())
        }
        fn store_session(&mut self, address: &Addr, record: SessionRecord) -> Result<()> {
            self.sessions.borrow_mut().insert(address.0, record);
            Ok(())
        }
    }

    impl IdentityKeyStore<Addr> for MemoryStore {
        fn get_identity_key_pair(&self) -> Result<IdentityKeyPair> {
            Ok(self.identity_pair.as_ref().map(clone_identity).unwrap())
        }
        fn get_local_registration_id(&self) -> Result<u32> {
            Ok(self.registration_id)
        }
        fn save_identity(&mut self, address: &Addr, identity_key: &[u8; 32]) -> Result<bool> {
            Ok(self.identities.borrow_mut().insert(address.0, *identity_key).is_none())
        }
        fn is_trusted(&self, _address: &Addr, _identity_key: &[u8; 32], _direction: Direction) -> Result<bool> {
            Ok(true)
        }
    }

    impl PreKeyStore for MemoryStore {
        fn load_pre_key(&self, id: u32) -> Result<Option<PreKeyRecord>> {
            Ok(self.pre_keys.get(&id).map(|k| PreKeyRecord {
                id: k.id,
                keypair: k.keypair.clone(),
            }))
        }
        fn remove_pre_key(&mut self, id: u32) -> Result<()> {
            self.pre_keys.remove(&id);
            Ok(())
        }
    }

    impl SignedPreKeyStore for MemoryStore {
        fn load_signed_pre_key(&self, id: u32) -> Result<Option<SignedPreKeyRecord>> {
            Ok(self.signed_pre_keys.get(&id).map(|k| SignedPreKeyRecord {
                id: k.id,
                keypair: k.keypair.clone(),
                signature: k.signature,
                timestamp_ms: k.timestamp_ms,
            }))
        }
    }

    impl KyberPreKeyStore for MemoryStore {
        fn load_kyber_pre_key(&self, id: u32) -> Result<Option<KyberPreKeyRecord>> {
            Ok(self.kyber_pre_keys.get(&id).map(|k| KyberPreKeyRecord {
                id: k.id,
                decap_key: k.decap_key.clone(),
                encap_key: k.encap_key.clone(),
                signature: k.signature,
                timestamp_ms: k.timestamp_ms,
            }))
        }
        fn mark_kyber_pre_key_used(&mut self, id: u32, signed_ec_id: u32, base_key: &[u8; 32]) -> Result<()> {
            self.kyber_used.push((id, signed_ec_id, *base_key));
            Ok(())
        }
    }

    fn clone_identity(id: &IdentityKeyPair) -> IdentityKeyPair {
        IdentityKeyPair {
            private: id.private.clone(),
            public: id.public,
        }
    }

    fn bob_store_with_prekeys(bob_identity: &IdentityKeyPair) -> (MemoryStore, SignedPreKeyRecord, KyberPreKeyRecord) {
        let random = [7u8; 64];
        let spk = SignedPreKeyRecord::generate(1, bob_identity, 1_700_000_000_000, &random);
        let kpk = KyberPreKeyRecord::generate(1, bob_identity, 1_700_000_000_000, &random);

        let mut store = MemoryStore {
            identity_pair: Some(clone_identity(bob_identity)),
            registration_id: 42,
            ..Default::default()
        };
        store.signed_pre_keys.insert(
            1,
            SignedPreKeyRecord {
                id: spk.id,
                keypair: spk.keypair.clone(),
                signature: spk.signature,
                timestamp_ms: spk.timestamp_ms,
            },
        );
        store.kyber_pre_keys.insert(
            1,
            KyberPreKeyRecord {
                id: kpk.id,
                decap_key: kpk.decap_key.clone(),
                encap_key: kpk.encap_key.clone(),
                signature: kpk.signature,
                timestamp_ms: kpk.timestamp_ms,
            },
        );
        (store, spk, kpk)
    }

    #[test]
    fn first_prekey_message_round_trips_and_establishes_session() {
        let alice_identity = IdentityKeyPair::generate();
        let bob_identity = IdentityKeyPair::generate();
        let (mut bob_store, bob_spk, bob_kpk) = bob_store_with_prekeys(&bob_identity);

        let alice_base_key = X25519Static::random_from_rng(rand_core::OsRng);
        let alice_out = initialize_alice_session(AliceSessionInput {
            our_identity: &alice_identity,
            our_base_key: &alice_base_key,
            their_identity_public: bob_identity.public,
            their_signed_pre_key_public: bob_spk.public(),
            their_one_time_pre_key_public: None,
            their_kyber_pre_key_public: bob_kpk.encap_key.clone(),
            local_registration_id: 7,
            remote_registration_id: 42,
        })
        .unwrap();

        let mut alice_state = alice_out.state;
        alice_state.pending_pre_key = Some(super::super::state::PendingPreKey {
            pre_key_id: None,
            signed_pre_key_id: 1,
            base_key: X25519Public::from(&alice_base_key).to_bytes(),
            created_at_secs: 0,
        });
        alice_state.pending_kyber_pre_key = Some(super::super::state::PendingKyberPreKey {
            kyber_pre_key_id: 1,
            ciphertext: alice_out.kyber_ciphertext.clone(),
        });

        let mut alice_store = MemoryStore {
            identity_pair: Some(clone_identity(&alice_identity)),
            registration_id: 7,
            ..Default::default()
        };
        let addr = Addr("bob");
        alice_store.store_session(&addr, SessionRecord::new(alice_state)).unwrap();

        let mut alice_pq = alice_out.pq_ratchet;
        let mut cipher = SessionCipher::new();
        let config = SessionConfig::default();
        let ciphertext = cipher
            .encrypt(&addr, b"hello bob", &mut alice_pq, &mut alice_store, &mut alice_store, &config, 0)
            .unwrap();
        assert!(matches!(ciphertext, CiphertextMessage::PreKey(_)));

        let mut bob_pq = PqRatchetState::disabled();
        let mut decryptor = SessionCipher::new();
        let plaintext = decryptor
            .decrypt(
                &Addr("alice"),
                &ciphertext,
                &mut bob_pq,
                &mut bob_store,
                &mut bob_store,
                &mut bob_store,
                &mut bob_store,
                &mut bob_store,
            )
            .unwrap();
        assert_eq!(plaintext, b"hello bob");
        assert_eq!(bob_store.kyber_used.len(), 1);
        assert_eq!(decryptor.stats().messages_decrypted, 1);
    }

    #[test]
    fn out_of_order_message_is_cached_and_replay_is_rejected() {
        // Build a matched pair of sessions the way Alice and Bob would
        // end up after PQXDH completes, then exercise the plain
        // `SignalMessage` path directly against matching receiver state.
        let alice_identity = IdentityKeyPair::generate();
        let bob_identity = IdentityKeyPair::generate();
        let (bob_store, bob_spk, bob_kpk) = bob_store_with_prekeys(&bob_identity);

        let alice_base_key = X25519Static::random_from_rng(rand_core::OsRng);
        let alice_out = initialize_alice_session(AliceSessionInput {
            our_identity: &alice_identity,
            our_base_key: &alice_base_key,
            their_identity_public: bob_identity.public,
            their_signed_pre_key_public: bob_spk.public(),
            their_one_time_pre_key_public: None,
            their_kyber_pre_key_public: bob_kpk.encap_key.clone(),
            local_registration_id: 7,
            remote_registration_id: 42,
        })
        .unwrap();

        let bob_out = super::super::init::initialize_bob_session(super::super::init::BobSessionInput {
            our_identity: &bob_identity,
            our_signed_pre_key: &bob_spk.keypair,
            our_one_time_pre_key: None,
            our_kyber_decap_key: &bob_kpk.decap_key,
            their_identity_public: alice_identity.public,
            their_base_key_public: X25519Public::from(&alice_base_key).to_bytes(),
            kyber_ciphertext: &alice_out.kyber_ciphertext,
            local_registration_id: 42,
            remote_registration_id: 7,
        })
        .unwrap();

        let mut alice_store = MemoryStore {
            identity_pair: Some(clone_identity(&alice_identity)),
            registration_id: 7,
            ..Default::default()
        };
        let mut bob_store = bob_store;
        let addr_bob = Addr("bob");
        let addr_alice = Addr("alice");
        alice_store.store_session(&addr_bob, SessionRecord::new(alice_out.state)).unwrap();
        bob_store.store_session(&addr_alice, SessionRecord::new(bob_out.state)).unwrap();

        // Use disabled PQ ratchets here: this test exercises the classical
        // chain-key/message-key cache logic in isolation, and driving two
        // independent SPQR state machines out of order is covered by
        // `spqr::state`'s own tests, not this one.
        let mut alice_pq = PqRatchetState::disabled();
        let mut bob_pq = PqRatchetState::disabled();
        let config = SessionConfig::default();

        let mut sender = SessionCipher::new();
        let msg1 = sender
            .encrypt(&addr_bob, b"first", &mut alice_pq, &mut alice_store, &mut alice_store, &config, 0)
            .unwrap();
        let msg2 = sender
            .encrypt(&addr_bob, b"second", &mut alice_pq, &mut alice_store, &mut alice_store, &config, 0)
            .unwrap();

        let mut receiver = SessionCipher::new();
        // Deliver msg2 first: msg1's key gets cached as skipped.
        let plaintext2 = receiver
            .decrypt(
                &addr_alice,
                &msg2,
                &mut bob_pq,
                &mut bob_store,
                &mut bob_store,
                &mut bob_store,
                &mut bob_store,
                &mut bob_store,
            )
            .unwrap();
        assert_eq!(plaintext2, b"second");

        let plaintext1 = receiver
            .decrypt(
                &addr_alice,
                &msg1,
                &mut bob_pq,
                &mut bob_store,
                &mut bob_store,
                &mut bob_store,
                &mut bob_store,
                &mut bob_store,
            )
            .unwrap();
        assert_eq!(plaintext1, b"first");

        // Replaying msg1 again must fail as a duplicate, not succeed.
        let replay = receiver.decrypt(
            &addr_alice,
            &msg1,
            &mut bob_pq,
            &mut bob_store,
            &mut bob_store,
            &mut bob_store,
            &mut bob_store,
            &mut bob_store,
        );
        assert!(matches!(replay, Err(RatchetError::DuplicateMessage)));
        assert_eq!(receiver.stats().duplicates_rejected, 1);
    }

    fn state_with_receiver_chain(chain: ReceiverChain) -> SessionState {
        let mut state = SessionState {
            session_version: SESSION_VERSION_V4,
            local_identity_key: [0u8; 32],
            remote_identity_key: None,
            root_key: [0u8; 32],
            alice_base_key: None,
            sender_chain: None,
            receiver_chains: VecDeque::new(),
            pending_pre_key: None,
            pending_kyber_pre_key: None,
            previous_counter: 0,
            local_registration_id: 0,
            remote_registration_id: 0,
            pq_ratchet_state_bytes: Vec::new(),
        };
        state.push_receiver_chain(chain);
        state
    }

    #[test]
    fn forward_jump_past_limit_is_rejected_without_caching() {
        let their_ratchet_public = [9u8; 32];
        let chain_key = ChainKey::new([1u8; 32], 0);
        let mut state = state_with_receiver_chain(ReceiverChain {
            their_ratchet_public,
            chain_key: chain_key.key,
            chain_index: chain_key.index,
            message_key_cache: VecDeque::new(),
        });
        let mut stats = Stats::default();

        let result = resolve_message_key_seed(
            &mut state,
            &their_ratchet_public,
            &chain_key,
            MAX_FORWARD_JUMPS + 1,
            &mut stats,
        );

        assert!(matches!(result, Err(RatchetError::InvalidMessage(_))));
        assert_eq!(stats.forward_jumps_rejected, 1);
        assert_eq!(state.total_cached_keys(), 0);
    }

    #[test]
    fn self_session_is_exempt_from_forward_jump_cap() {
        let their_ratchet_public = [9u8; 32];
        let chain_key = ChainKey::new([1u8; 32], 0);
        let identity = [3u8; 32];
        let mut state = state_with_receiver_chain(ReceiverChain {
            their_ratchet_public,
            chain_key: chain_key.key,
            chain_index: chain_key.index,
            message_key_cache: VecDeque::new(),
        });
        state.local_identity_key = identity;
        state.remote_identity_key = Some(identity);
        let mut stats = Stats::default();

        let result = resolve_message_key_seed(
            &mut state,
            &their_ratchet_public,
            &chain_key,
            MAX_FORWARD_JUMPS + 1,
            &mut stats,
        );

        assert!(result.is_ok());
        assert_eq!(stats.forward_jumps_rejected, 0);
    }

    #[test]
    fn message_key_cache_evicts_oldest_once_capacity_is_reached() {
        let their_ratchet_public = [9u8; 32];
        let chain_key = ChainKey::new([1u8; 32], 0);
        let mut state = state_with_receiver_chain(ReceiverChain {
            their_ratchet_public,
            chain_key: chain_key.key,
            chain_index: chain_key.index,
            message_key_cache: VecDeque::new(),
        });
        let mut stats = Stats::default();

        // Jumping past MAX_MESSAGE_KEYS caches that many skipped seeds
        // before resolving the requested counter, forcing eviction once
        // the session-wide cap is hit.
        let target_counter = MAX_MESSAGE_KEYS as u32 + 5;
        let seed = resolve_message_key_seed(&mut state, &their_ratchet_public, &chain_key, target_counter, &mut stats)
            .unwrap();

        assert_ne!(seed, [0u8; 32]);
        assert!(stats.keys_evicted > 0);
        assert!(state.total_cached_keys() <= MAX_MESSAGE_KEYS);
    }
}
