//! Cryptographic primitives (C1), key records (C2), and ratchet key
//! derivation (C3).

pub mod constant_time;
pub mod keys;
pub mod primitives;
pub mod ratchet_keys;

pub use constant_time::{eq_32, eq_64, eq_mac, eq_slices};
pub use keys::{fingerprint, IdentityKeyPair, KyberPreKeyRecord, PreKeyBundle, PreKeyRecord, SignedPreKeyRecord};
pub use primitives::PrimitiveError;
pub use ratchet_keys::{ChainKey, MessageKeys, RootKey};
