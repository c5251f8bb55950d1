//! `SignalMessage` and `PreKeySignalMessage` field-tag serialization.
//!
//! Field layout and MAC placement follow spec §3/§6 exactly; the varint
//! and tag mechanics follow standard proto2 wire-format rules (field
//! number and wire type packed into one tag varint, length-delimited
//! fields carry their own length prefix).

use crate::crypto::constant_time::eq_mac;
use crate::crypto::primitives::hmac_sha256;
use crate::error::{RatchetError, Result};
use super::varint::{decode_varint, encode_varint};
use super::{version_byte, version_major, CURRENT_VERSION, MAC_LENGTH};

const WIRE_VARINT: u64 = 0;
const WIRE_BYTES: u64 = 2;

fn write_tag(field: u64, wire_type: u64, out: &mut Vec<u8>) {
    encode_varint((field << 3) | wire_type, out);
}

fn write_varint_field(field: u64, value: u64, out: &mut Vec<u8>) {
    write_tag(field, WIRE_VARINT, out);
    encode_varint(value, out);
}

fn write_bytes_field(field: u64, data: &[u8], out: &mut Vec<u8>) {
    write_tag(field, WIRE_BYTES, out);
    encode_varint(data.len() as u64, out);
    out.extend_from_slice(data);
}

struct ParsedField<'a> {
    field: u64,
    varint: u64,
    bytes: &'a [u8],
}

fn parse_fields(mut data: &[u8]) -> Result<Vec<ParsedField<'_>>> {
    let mut fields = Vec::new();
    while !data.is_empty() {
        let (tag, consumed) = decode_varint(data)
            .ok_or_else(|| RatchetError::InvalidMessage("truncated field tag".into()))?;
        data = &data[consumed..];
        let field = tag >> 3;
        let wire_type = tag & 7;
        match wire_type {
            w if w == WIRE_VARINT => {
                let (value, consumed) = decode_varint(data)
                    .ok_or_else(|| RatchetError::InvalidMessage("truncated varint field".into()))?;
                data = &data[consumed..];
                fields.push(ParsedField {
                    field,
                    varint: value,
                    bytes: &[],
                });
            }
            w if w == WIRE_BYTES => {
                let (len, consumed) = decode_varint(data)
                    .ok_or_else(|| RatchetError::InvalidMessage("truncated length prefix".into()))?;
                data = &data[consumed..];
                let len = len as usize;
                if data.len() < len {
                    return Err(RatchetError::InvalidMessage("truncated length-delimited field".into()));
                }
                let (bytes, rest) = data.split_at(len);
                data = rest;
                fields.push(ParsedField { field, varint: 0, bytes });
            }
            _ => return Err(RatchetError::InvalidMessage("unsupported wire type".into())),
        }
    }
    Ok(fields)
}

fn prefixed_public(public: &[u8; 32]) -> [u8; 33] {
    let mut out = [0u8; 33];
    out[0] = 0x05;
    out[1..].copy_from_slice(public);
    out
}

fn unprefix_public(bytes: &[u8]) -> Result<[u8; 32]> {
    if bytes.len() != 33 || bytes[0] != 0x05 {
        return Err(RatchetError::InvalidKey("expected 0x05-prefixed X25519 public key"));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes[1..]);
    Ok(out)
}

/// The per-message double-ratchet wire format.
pub struct SignalMessage {
    pub sender_ratchet_public: [u8; 32],
    pub counter: u32,
    pub previous_counter: u32,
    pub ciphertext: Vec<u8>,
    /// Serialized SPQR message; `None` means V0 (PQ disabled for this session).
    pub pqr_message: Option<Vec<u8>>,
}

impl SignalMessage {
    fn proto_body(&self) -> Vec<u8> {
        let mut body = Vec::new();
        write_bytes_field(1, &prefixed_public(&self.sender_ratchet_public), &mut body);
        write_varint_field(2, self.counter as u64, &mut body);
        write_varint_field(3, self.previous_counter as u64, &mut body);
        write_bytes_field(4, &self.ciphertext, &mut body);
        if let Some(pqr) = &self.pqr_message {
            write_bytes_field(5, pqr, &mut body);
        }
        body
    }

    fn mac_input(
        sender_identity_pub: &[u8; 32],
        receiver_identity_pub: &[u8; 32],
        version: u8,
        body: &[u8],
    ) -> Vec<u8> {
        let mut input = Vec::with_capacity(32 + 32 + 1 + body.len());
        input.extend_from_slice(sender_identity_pub);
        input.extend_from_slice(receiver_identity_pub);
        input.push(version);
        input.extend_from_slice(body);
        input
    }

    /// Serialize with version byte and trailing 8-byte truncated MAC.
    pub fn serialize(
        &self,
        sender_identity_pub: &[u8; 32],
        receiver_identity_pub: &[u8; 32],
        mac_key: &[u8; 32],
    ) -> Vec<u8> {
        let version = version_byte(CURRENT_VERSION, CURRENT_VERSION);
        let body = self.proto_body();
        let mac_input = Self::mac_input(sender_identity_pub, receiver_identity_pub, version, &body);
        let full_mac = hmac_sha256(mac_key, &mac_input);

        let mut out = Vec::with_capacity(1 + body.len() + MAC_LENGTH);
        out.push(version);
        out.extend_from_slice(&body);
        out.extend_from_slice(&full_mac[..MAC_LENGTH]);
        out
    }

    /// Parse the wire bytes (not yet MAC-verified). Callers must call
    /// [`verify_mac`](Self::verify_mac) before trusting the contents.
    pub fn deserialize(data: &[u8]) -> Result<(Self, u8, Vec<u8>, [u8; MAC_LENGTH])> {
        if data.len() < 1 + MAC_LENGTH {
            return Err(RatchetError::InvalidMessage("signal message too short".into()));
        }
        let version = data[0];
        if version_major(version) < CURRENT_VERSION {
            return Err(RatchetError::X3dhNoLongerSupported);
        }
        let body_end = data.len() - MAC_LENGTH;
        let body = data[1..body_end].to_vec();
        let mut mac = [0u8; MAC_LENGTH];
        mac.copy_from_slice(&data[body_end..]);

        let fields = parse_fields(&body)?;
        let mut sender_ratchet_public = None;
        let mut counter = 0u32;
        let mut previous_counter = 0u32;
        let mut ciphertext = Vec::new();
        let mut pqr_message = None;

        for f in &fields {
            match f.field {
                1 => sender_ratchet_public = Some(unprefix_public(f.bytes)?),
                2 => counter = f.varint as u32,
                3 => previous_counter = f.varint as u32,
                4 => ciphertext = f.bytes.to_vec(),
                5 => pqr_message = Some(f.bytes.to_vec()),
                _ => {}
            }
        }

        let sender_ratchet_public =
            sender_ratchet_public.ok_or_else(|| RatchetError::InvalidMessage("missing sender ratchet key".into()))?;

        Ok((
            SignalMessage {
                sender_ratchet_public,
                counter,
                previous_counter,
                ciphertext,
                pqr_message,
            },
            version,
            body,
            mac,
        ))
    }

    /// Recompute and constant-time compare the trailing MAC.
    pub fn verify_mac(
        body: &[u8],
        version: u8,
        sender_identity_pub: &[u8; 32],
        receiver_identity_pub: &[u8; 32],
        mac_key: &[u8; 32],
        received_mac: &[u8; MAC_LENGTH],
    ) -> Result<()> {
        let mac_input = Self::mac_input(sender_identity_pub, receiver_identity_pub, version, body);
        let full_mac = hmac_sha256(mac_key, &mac_input);
        let mut expected = [0u8; MAC_LENGTH];
        expected.copy_from_slice(&full_mac[..MAC_LENGTH]);
        if eq_mac(&expected, received_mac) {
            Ok(())
        } else {
            Err(RatchetError::InvalidMessage("MAC verification failed".into()))
        }
    }
}

/// The PQXDH-bootstrapped initial message wrapping an embedded
/// `SignalMessage`. Carries no MAC of its own; the embedded message's
/// MAC authenticates the whole envelope.
pub struct PreKeySignalMessage {
    pub pre_key_id: Option<u32>,
    pub base_key: [u8; 32],
    pub identity_key: [u8; 32],
    pub embedded_message: Vec<u8>,
    pub registration_id: u32,
    pub signed_pre_key_id: u32,
    pub kyber_pre_key_id: Option<u32>,
    pub kyber_ciphertext: Option<Vec<u8>>,
}

impl PreKeySignalMessage {
    pub fn serialize(&self) -> Result<Vec<u8>> {
        if self.kyber_pre_key_id.is_some() != self.kyber_ciphertext.is_some() {
            return Err(RatchetError::MissingKyberCiphertext);
        }
        let version = version_byte(CURRENT_VERSION, CURRENT_VERSION);
        let mut out = vec![version];
        if let Some(id) = self.pre_key_id {
            write_varint_field(1, id as u64, &mut out);
        }
        write_bytes_field(2, &prefixed_public(&self.base_key), &mut out);
        write_bytes_field(3, &prefixed_public(&self.identity_key), &mut out);
        write_bytes_field(4, &self.embedded_message, &mut out);
        write_varint_field(5, self.registration_id as u64, &mut out);
        write_varint_field(6, self.signed_pre_key_id as u64, &mut out);
        if let (Some(kid), Some(kct)) = (self.kyber_pre_key_id, &self.kyber_ciphertext) {
            write_varint_field(7, kid as u64, &mut out);
            write_bytes_field(8, kct, &mut out);
        }
        Ok(out)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(RatchetError::InvalidMessage("empty prekey message".into()));
        }
        let version = data[0];
        if version_major(version) < CURRENT_VERSION {
            return Err(RatchetError::X3dhNoLongerSupported);
        }
        let fields = parse_fields(&data[1..])?;

        let mut pre_key_id = None;
        let mut base_key = None;
        let mut identity_key = None;
        let mut embedded_message = None;
        let mut registration_id = 0u32;
        let mut signed_pre_key_id = 0u32;
        let mut kyber_pre_key_id = None;
        let mut kyber_ciphertext = None;

        for f in &fields {
            match f.field {
                1 => pre_key_id = Some(f.varint as u32),
                2 => base_key = Some(unprefix_public(f.bytes)?),
                3 => identity_key = Some(unprefix_public(f.bytes)?),
                4 => embedded_message = Some(f.bytes.to_vec()),
                5 => registration_id = f.varint as u32,
                6 => signed_pre_key_id = f.varint as u32,
                7 => kyber_pre_key_id = Some(f.varint as u32),
                8 => kyber_ciphertext = Some(f.bytes.to_vec()),
                _ => {}
            }
        }

        if kyber_pre_key_id.is_some() != kyber_ciphertext.is_some() {
            return Err(RatchetError::MissingKyberCiphertext);
        }

        Ok(PreKeySignalMessage {
            pre_key_id,
            base_key: base_key.ok_or_else(|| RatchetError::InvalidMessage("missing base key".into()))?,
            identity_key: identity_key
                .ok_or_else(|| RatchetError::InvalidMessage("missing identity key".into()))?,
            embedded_message: embedded_message
                .ok_or_else(|| RatchetError::InvalidMessage("missing embedded message".into()))?,
            registration_id,
            signed_pre_key_id,
            kyber_pre_key_id,
            kyber_ciphertext,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_message_round_trips_and_verifies() {
        let mac_key = [3u8; 32];
        let sender_id = [1u8; 32];
        let receiver_id = [2u8; 32];
        let msg = SignalMessage {
            sender_ratchet_public: [9u8; 32],
            counter: 5,
            previous_counter: 4,
            ciphertext: vec![1, 2, 3, 4, 5],
            pqr_message: Some(vec![0xaa, 0xbb]),
        };
        let bytes = msg.serialize(&sender_id, &receiver_id, &mac_key);
        let (parsed, version, body, mac) = SignalMessage::deserialize(&bytes).unwrap();
        assert_eq!(parsed.counter, 5);
        assert_eq!(parsed.previous_counter, 4);
        assert_eq!(parsed.ciphertext, vec![1, 2, 3, 4, 5]);
        assert_eq!(parsed.pqr_message, Some(vec![0xaa, 0xbb]));
        SignalMessage::verify_mac(&body, version, &sender_id, &receiver_id, &mac_key, &mac).unwrap();
    }

    #[test]
    fn signal_message_rejects_tampered_mac() {
        let mac_key = [3u8; 32];
        let sender_id = [1u8; 32];
        let receiver_id = [2u8; 32];
        let msg = SignalMessage {
            sender_ratchet_public: [9u8; 32],
            counter: 0,
            previous_counter: 0,
            ciphertext: vec![1],
            pqr_message: None,
        };
        let mut bytes = msg.serialize(&sender_id, &receiver_id, &mac_key);
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let (_, version, body, mac) = SignalMessage::deserialize(&bytes).unwrap();
        assert!(SignalMessage::verify_mac(&body, version, &sender_id, &receiver_id, &mac_key, &mac).is_err());
    }

    #[test]
    fn prekey_message_rejects_partial_kyber_fields() {
        let msg = PreKeySignalMessage {
            pre_key_id: Some(1),
            base_key: [1u8; 32],
            identity_key: [2u8; 32],
            embedded_message: vec![5, 6, 7],
            registration_id: 9,
            signed_pre_key_id: 2,
            kyber_pre_key_id: Some(4),
            kyber_ciphertext: None,
        };
        assert!(msg.serialize().is_err());
    }

    #[test]
    fn prekey_message_round_trips_with_kyber_fields() {
        let msg = PreKeySignalMessage {
            pre_key_id: Some(1),
            base_key: [1u8; 32],
            identity_key: [2u8; 32],
            embedded_message: vec![5, 6, 7],
            registration_id: 9,
            signed_pre_key_id: 2,
            kyber_pre_key_id: Some(4),
            kyber_ciphertext: Some(vec![0xff; 16]),
        };
        let bytes = msg.serialize().unwrap();
        let parsed = PreKeySignalMessage::deserialize(&bytes).unwrap();
        assert_eq!(parsed.pre_key_id, Some(1));
        assert_eq!(parsed.kyber_pre_key_id, Some(4));
        assert_eq!(parsed.kyber_ciphertext, Some(vec![0xff; 16]));
    }
}
