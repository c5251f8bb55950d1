//! SPQR authenticator: the MAC key ratchet that authenticates each
//! epoch's header/ciphertext exchange independently of the message MAC.

use zeroize::Zeroize;

use crate::crypto::primitives::{hkdf_sha256, hmac_sha256};
use crate::error::Result;

const AUTH_UPDATE_INFO_PREFIX: &[u8] = b"Signal_PQCKA_V1_MLKEM768:Authenticator Update";
const HEADER_MAC_INFO: &[u8] = b"Signal_PQCKA_V1_MLKEM768:ekheader";
const CIPHERTEXT_MAC_INFO: &[u8] = b"Signal_PQCKA_V1_MLKEM768:ciphertext";

/// `{root_key, mac_key, epoch}`, advanced by HKDF on every derived epoch
/// secret.
pub struct Authenticator {
    pub root_key: [u8; 32],
    pub mac_key: [u8; 32],
    pub epoch: u64,
}

impl Drop for Authenticator {
    fn drop(&mut self) {
        self.root_key.zeroize();
        self.mac_key.zeroize();
    }
}

impl Authenticator {
    /// Derive the initial authenticator from the PQXDH-derived auth key.
    pub fn from_auth_key(auth_key: &[u8; 32]) -> Result<Self> {
        let zero_salt = [0u8; 32];
        let mut info = AUTH_UPDATE_INFO_PREFIX.to_vec();
        info.extend_from_slice(&0u64.to_be_bytes());
        let derived = hkdf_sha256(auth_key, Some(&zero_salt), &info, 64)
            .map_err(|_| crate::error::RatchetError::InvalidMessage("authenticator init HKDF failed".into()))?;
        let mut root_key = [0u8; 32];
        let mut mac_key = [0u8; 32];
        root_key.copy_from_slice(&derived[0..32]);
        mac_key.copy_from_slice(&derived[32..64]);
        Ok(Authenticator {
            root_key,
            mac_key,
            epoch: 0,
        })
    }

    /// Advance to `new_epoch`, deriving a fresh root/mac key pair:
    /// `HKDF(root_key, zero_salt, "...Authenticator Update" || epoch_be8, 64)`.
    pub fn advance(&mut self, new_epoch: u64) -> Result<()> {
        let zero_salt = [0u8; 32];
        let mut info = AUTH_UPDATE_INFO_PREFIX.to_vec();
        info.extend_from_slice(&new_epoch.to_be_bytes());
        let derived = hkdf_sha256(&self.root_key, Some(&zero_salt), &info, 64)
            .map_err(|_| crate::error::RatchetError::InvalidMessage("authenticator update HKDF failed".into()))?;
        self.root_key.zeroize();
        self.mac_key.zeroize();
        self.root_key.copy_from_slice(&derived[0..32]);
        self.mac_key.copy_from_slice(&derived[32..64]);
        self.epoch = new_epoch;
        Ok(())
    }

    fn domain_separated_mac(&self, info: &[u8], epoch: u64, data: &[u8]) -> [u8; 32] {
        let mut salted_key = info.to_vec();
        salted_key.extend_from_slice(&epoch.to_be_bytes());
        salted_key.extend_from_slice(&self.mac_key);
        hmac_sha256(&self.mac_key, &[&salted_key[..], data].concat())
    }

    pub fn mac_header(&self, epoch: u64, header: &[u8]) -> [u8; 32] {
        self.domain_separated_mac(HEADER_MAC_INFO, epoch, header)
    }

    pub fn mac_ciphertext(&self, epoch: u64, ct1: &[u8], ct2: &[u8]) -> [u8; 32] {
        self.domain_separated_mac(CIPHERTEXT_MAC_INFO, epoch, &[ct1, ct2].concat())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_changes_root_and_mac_key() {
        let mut auth = Authenticator::from_auth_key(&[4u8; 32]).unwrap();
        let root0 = auth.root_key;
        let mac0 = auth.mac_key;
        auth.advance(1).unwrap();
        assert_ne!(root0, auth.root_key);
        assert_ne!(mac0, auth.mac_key);
        assert_eq!(auth.epoch, 1);
    }

    #[test]
    fn header_mac_is_deterministic_and_epoch_bound() {
        let auth = Authenticator::from_auth_key(&[9u8; 32]).unwrap();
        let header = b"header bytes";
        let m1 = auth.mac_header(0, header);
        let m2 = auth.mac_header(0, header);
        let m3 = auth.mac_header(1, header);
        assert_eq!(m1, m2);
        assert_ne!(m1, m3);
    }
}
