//! PQ-ratchet facade (C5): wraps either a V0 (disabled) or V1+ (SPQR)
//! post-quantum ratchet behind one `send`/`recv`/`ratchet_step` surface,
//! so the session cipher never has to branch on whether PQ is enabled.
//!
//! Sparse-ratchet rule (spec §9): the epoch secret returned by `send`
//! stays stable across many calls and is reused as the HKDF salt for
//! message keys; only a completed SPQR epoch or an explicit DH-mixing
//! `ratchet_step` changes it.

use zeroize::Zeroize;

use crate::crypto::primitives::hkdf_sha256;
use crate::error::Result;
use crate::spqr::message::SpqrMessage;
use crate::spqr::state::SpqrState;

const CHAIN_START_INFO: &[u8] = b"Signal PQ Ratchet V1 Chain  Start";
const CHAIN_ADD_EPOCH_INFO: &[u8] = b"Signal PQ Ratchet V1 Chain Add Epoch";
const CHAIN_NEXT_INFO: &[u8] = b"Signal PQ Ratchet V1 Chain Next";

enum Inner {
    /// PQ disabled for this session; `pq_ratchet_state_bytes` is empty.
    V0,
    V1 {
        spqr: SpqrState,
        chain: [u8; 32],
        current_key: Option<[u8; 32]>,
    },
    /// A superseded (archived) session's PQ state, rehydrated from
    /// persisted bytes only. Archived sessions are no longer driving an
    /// SPQR epoch exchange forward, so this replays the chain value
    /// already folded into the persisted bytes instead of resuming the
    /// live multi-round KEM handshake, which isn't part of the persisted
    /// state (see `state_bytes`).
    Archived { chain: [u8; 32] },
}

pub struct PqRatchetState {
    inner: Inner,
}

impl Drop for PqRatchetState {
    fn drop(&mut self) {
        match &mut self.inner {
            Inner::V1 { chain, current_key, .. } => {
                chain.zeroize();
                if let Some(k) = current_key {
                    k.zeroize();
                }
            }
            Inner::Archived { chain } => chain.zeroize(),
            Inner::V0 => {}
        }
    }
}

pub struct SendResult {
    pub message: Vec<u8>,
    pub key: Option<[u8; 32]>,
}

impl PqRatchetState {
    pub fn disabled() -> Self {
        PqRatchetState { inner: Inner::V0 }
    }

    pub fn new_alice(auth_key: &[u8; 32]) -> Result<Self> {
        let chain = hkdf_sha256(auth_key, None, CHAIN_START_INFO, 32)?;
        let mut chain_bytes = [0u8; 32];
        chain_bytes.copy_from_slice(&chain);
        Ok(PqRatchetState {
            inner: Inner::V1 {
                spqr: SpqrState::new_alice(auth_key)?,
                chain: chain_bytes,
                current_key: None,
            },
        })
    }

    pub fn new_bob(auth_key: &[u8; 32]) -> Result<Self> {
        let chain = hkdf_sha256(auth_key, None, CHAIN_START_INFO, 32)?;
        let mut chain_bytes = [0u8; 32];
        chain_bytes.copy_from_slice(&chain);
        Ok(PqRatchetState {
            inner: Inner::V1 {
                spqr: SpqrState::new_bob(auth_key)?,
                chain: chain_bytes,
                current_key: None,
            },
        })
    }

    /// Rehydrate an archived session's PQ state from its persisted bytes
    /// only, for decrypting against a superseded `SessionState`. Empty
    /// bytes mean that archived session had PQ disabled.
    pub fn from_persisted_archived(bytes: &[u8]) -> Self {
        if bytes.is_empty() {
            return PqRatchetState { inner: Inner::V0 };
        }
        let mut chain = [0u8; 32];
        chain.copy_from_slice(&bytes[..32.min(bytes.len())]);
        PqRatchetState {
            inner: Inner::Archived { chain },
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self.inner, Inner::V1 { .. } | Inner::Archived { .. })
    }

    fn fold_epoch_secret(chain: &mut [u8; 32], secret: &[u8; 32]) -> Result<[u8; 32]> {
        let mut ikm = chain.to_vec();
        ikm.extend_from_slice(secret);
        let derived = hkdf_sha256(&ikm, None, CHAIN_ADD_EPOCH_INFO, 64)?;
        chain.copy_from_slice(&derived[0..32]);
        let mut key = [0u8; 32];
        key.copy_from_slice(&derived[32..64]);
        Ok(key)
    }

    /// Produce the next outbound SPQR message. The per-message key is
    /// the current epoch secret and does not advance on its own; only a
    /// completed epoch (driven by `recv`) rotates it.
    pub fn send(&mut self) -> SendResult {
        match &mut self.inner {
            Inner::V0 => SendResult {
                message: Vec::new(),
                key: None,
            },
            Inner::V1 {
                spqr, current_key, ..
            } => {
                let msg = spqr.send();
                SendResult {
                    message: msg.serialize(),
                    key: *current_key,
                }
            }
            Inner::Archived { chain } => SendResult {
                message: Vec::new(),
                key: Some(*chain),
            },
        }
    }

    /// Consume an inbound SPQR message. Returns the key in effect after
    /// processing: unchanged unless this message completed an epoch.
    pub fn recv(&mut self, message: &[u8]) -> Result<Option<[u8; 32]>> {
        match &mut self.inner {
            Inner::V0 => Ok(None),
            Inner::V1 {
                spqr,
                chain,
                current_key,
            } => {
                if message.is_empty() {
                    return Ok(*current_key);
                }
                let parsed = SpqrMessage::deserialize(message)?;
                if let Some(epoch_secret) = spqr.recv(&parsed)? {
                    let key = Self::fold_epoch_secret(chain, &epoch_secret.secret)?;
                    *current_key = Some(key);
                }
                Ok(*current_key)
            }
            Inner::Archived { chain } => Ok(Some(*chain)),
        }
    }

    /// Mix a fresh DH shared secret into the PQ chain at a DH ratchet
    /// boundary, per `"...Chain Next"`.
    pub fn ratchet_step(&mut self, dh_shared: &[u8; 32]) -> Result<()> {
        if let Inner::V1 { chain, .. } = &mut self.inner {
            let mut ikm = chain.to_vec();
            ikm.extend_from_slice(dh_shared);
            let derived = hkdf_sha256(&ikm, None, CHAIN_NEXT_INFO, 32)?;
            chain.copy_from_slice(&derived);
        }
        Ok(())
    }

    /// Serialize the facade's persisted state: empty for V0, 32 bytes
    /// (the chain key) for V1+.
    pub fn state_bytes(&self) -> Vec<u8> {
        match &self.inner {
            Inner::V0 => Vec::new(),
            Inner::V1 { chain, .. } => chain.to_vec(),
            Inner::Archived { chain } => chain.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v0_send_recv_are_empty_and_keyless() {
        let mut pq = PqRatchetState::disabled();
        let sent = pq.send();
        assert!(sent.message.is_empty());
        assert!(sent.key.is_none());
        assert!(pq.recv(&[]).unwrap().is_none());
        assert!(pq.state_bytes().is_empty());
    }

    #[test]
    fn v1_state_bytes_are_32_bytes() {
        let pq = PqRatchetState::new_alice(&[3u8; 32]).unwrap();
        assert_eq!(pq.state_bytes().len(), 32);
    }

    #[test]
    fn v1_recv_of_duplicate_message_is_idempotent_on_key() {
        let mut bob = PqRatchetState::new_bob(&[3u8; 32]).unwrap();
        let before = bob.recv(&[]).unwrap();
        let after = bob.recv(&[]).unwrap();
        assert_eq!(before, after);
    }
}
