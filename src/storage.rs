//! Storage interfaces (C10): typed contracts for session, identity,
//! prekey, signed-prekey, and Kyber-prekey persistence. No persistence
//! strategy is prescribed here, mirroring the trait-only shape of
//! `secure-legion-core/src/storage/mod.rs`'s `DeniableStorage` contract —
//! this crate just narrows the contract surface to what the ratchet core
//! actually needs.

use crate::crypto::keys::{KyberPreKeyRecord, PreKeyRecord, SignedPreKeyRecord};
use crate::error::Result;
use crate::session::state::SessionRecord;

/// Trust direction for an identity-key change, passed to
/// `IdentityKeyStore::is_trusted`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Sending,
    Receiving,
}

/// Opaque per-peer address used as the storage key. Callers typically
/// combine a user identifier with a device id; this core treats it as an
/// opaque, `Eq + Hash` token.
pub trait ProtocolAddress: Clone + Eq + std::hash::Hash {}
impl<T: Clone + Eq + std::hash::Hash> ProtocolAddress for T {}

pub trait SessionStore<A: ProtocolAddress> {
    fn load_session(&self, address: &A) -> Result<Option<SessionRecord>>;
    fn store_session(&mut self, address: &A, record: SessionRecord) -> Result<()>;
}

pub trait IdentityKeyStore<A: ProtocolAddress> {
    fn get_identity_key_pair(&self) -> Result<crate::crypto::keys::IdentityKeyPair>;
    fn get_local_registration_id(&self) -> Result<u32>;
    fn save_identity(&mut self, address: &A, identity_key: &[u8; 32]) -> Result<bool>;
    fn is_trusted(&self, address: &A, identity_key: &[u8; 32], direction: Direction) -> Result<bool>;
}

pub trait PreKeyStore {
    fn load_pre_key(&self, id: u32) -> Result<Option<PreKeyRecord>>;
    fn remove_pre_key(&mut self, id: u32) -> Result<()>;
}

pub trait SignedPreKeyStore {
    fn load_signed_pre_key(&self, id: u32) -> Result<Option<SignedPreKeyRecord>>;
}

pub trait KyberPreKeyStore {
    fn load_kyber_pre_key(&self, id: u32) -> Result<Option<KyberPreKeyRecord>>;
    /// Record de-duplication: called with the signed prekey id and base
    /// key used in the same handshake, so replays of a consumed prekey
    /// message remain deterministically rejectable.
    fn mark_kyber_pre_key_used(&mut self, id: u32, signed_ec_id: u32, base_key: &[u8; 32]) -> Result<()>;
}
