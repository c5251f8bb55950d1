//! SPQR wire message: `{epoch, payload}` where `payload` is one of the
//! six variants the V1 chunked exchange can emit. Wire format:
//! `[0x01 version][epoch varint][chunk index varint][payload type tag]
//! [payload bytes][mac (32 bytes), only for Hdr/Ct2]`.
//!
//! `Hdr` and `Ct2` carry a MAC of the complete field they belong to
//! (the header, and the ct1||ct2 ciphertext respectively) alongside
//! every chunk, so the receiver can authenticate the field once
//! reconstruction completes without a separate round trip.

use crate::error::{RatchetError, Result};
use crate::wire::varint::{decode_varint, encode_varint};

use super::poly::CHUNK_SIZE;

const SPQR_WIRE_VERSION: u8 = 0x01;

const TAG_NONE: u8 = 0;
const TAG_HDR: u8 = 1;
const TAG_EK: u8 = 2;
const TAG_EK_CT1_ACK: u8 = 3;
const TAG_CT1: u8 = 5;
const TAG_CT2: u8 = 6;

/// A single 32-byte erasure-coded chunk of an SPQR field, tagged with
/// its position.
#[derive(Clone, Copy)]
pub struct Chunk {
    pub index: u32,
    pub data: [u8; CHUNK_SIZE],
}

pub enum SpqrPayload {
    None,
    /// A header chunk plus the MAC of the full reconstructed header.
    Hdr(Chunk, [u8; 32]),
    Ek(Chunk),
    EkCt1Ack(Chunk),
    Ct1(Chunk),
    /// A ct2 chunk plus the MAC of the full ct1||ct2 ciphertext.
    Ct2(Chunk, [u8; 32]),
}

pub struct SpqrMessage {
    pub epoch: u64,
    pub payload: SpqrPayload,
}

impl SpqrMessage {
    pub fn serialize(&self) -> Vec<u8> {
        let (tag, chunk, mac) = match &self.payload {
            SpqrPayload::None => (TAG_NONE, None, None),
            SpqrPayload::Hdr(c, mac) => (TAG_HDR, Some(c), Some(mac)),
            SpqrPayload::Ek(c) => (TAG_EK, Some(c), None),
            SpqrPayload::EkCt1Ack(c) => (TAG_EK_CT1_ACK, Some(c), None),
            SpqrPayload::Ct1(c) => (TAG_CT1, Some(c), None),
            SpqrPayload::Ct2(c, mac) => (TAG_CT2, Some(c), Some(mac)),
        };

        let mut out = vec![SPQR_WIRE_VERSION];
        encode_varint(self.epoch, &mut out);
        encode_varint(chunk.map(|c| c.index as u64).unwrap_or(0), &mut out);
        out.push(tag);
        if let Some(c) = chunk {
            out.extend_from_slice(&c.data);
        }
        if let Some(mac) = mac {
            out.extend_from_slice(mac);
        }
        out
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        if data.is_empty() || data[0] != SPQR_WIRE_VERSION {
            return Err(RatchetError::ErroneousData);
        }
        let mut cursor = &data[1..];
        let (epoch, consumed) = decode_varint(cursor).ok_or(RatchetError::ErroneousData)?;
        cursor = &cursor[consumed..];
        let (index, consumed) = decode_varint(cursor).ok_or(RatchetError::ErroneousData)?;
        cursor = &cursor[consumed..];
        let index = index as u32;
        if epoch == 0 {
            return Err(RatchetError::EpochOutOfRange { got: 0, current: 1 });
        }
        let tag = *cursor.first().ok_or(RatchetError::ErroneousData)?;
        cursor = &cursor[1..];

        let read_chunk = |cursor: &[u8]| -> Result<Chunk> {
            if cursor.len() < CHUNK_SIZE {
                return Err(RatchetError::ErroneousData);
            }
            let mut data = [0u8; CHUNK_SIZE];
            data.copy_from_slice(&cursor[..CHUNK_SIZE]);
            Ok(Chunk { index, data })
        };

        let read_mac = |cursor: &[u8]| -> Result<[u8; 32]> {
            if cursor.len() != CHUNK_SIZE + 32 {
                return Err(RatchetError::ErroneousData);
            }
            let mut mac = [0u8; 32];
            mac.copy_from_slice(&cursor[CHUNK_SIZE..]);
            Ok(mac)
        };

        let payload = match tag {
            TAG_NONE => {
                if !cursor.is_empty() {
                    return Err(RatchetError::ErroneousData);
                }
                SpqrPayload::None
            }
            TAG_HDR => SpqrPayload::Hdr(read_chunk(cursor)?, read_mac(cursor)?),
            TAG_EK => {
                if cursor.len() != CHUNK_SIZE {
                    return Err(RatchetError::ErroneousData);
                }
                SpqrPayload::Ek(read_chunk(cursor)?)
            }
            TAG_EK_CT1_ACK => {
                if cursor.len() != CHUNK_SIZE {
                    return Err(RatchetError::ErroneousData);
                }
                SpqrPayload::EkCt1Ack(read_chunk(cursor)?)
            }
            TAG_CT1 => {
                if cursor.len() != CHUNK_SIZE {
                    return Err(RatchetError::ErroneousData);
                }
                SpqrPayload::Ct1(read_chunk(cursor)?)
            }
            TAG_CT2 => SpqrPayload::Ct2(read_chunk(cursor)?, read_mac(cursor)?),
            _ => return Err(RatchetError::ErroneousData),
        };

        Ok(SpqrMessage { epoch, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hdr_chunk_round_trips_with_mac() {
        let msg = SpqrMessage {
            epoch: 3,
            payload: SpqrPayload::Hdr(
                Chunk {
                    index: 2,
                    data: [0x42u8; CHUNK_SIZE],
                },
                [0x55u8; 32],
            ),
        };
        let bytes = msg.serialize();
        let parsed = SpqrMessage::deserialize(&bytes).unwrap();
        assert_eq!(parsed.epoch, 3);
        match parsed.payload {
            SpqrPayload::Hdr(c, mac) => {
                assert_eq!(c.index, 2);
                assert_eq!(c.data, [0x42u8; CHUNK_SIZE]);
                assert_eq!(mac, [0x55u8; 32]);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn ct2_chunk_round_trips_with_mac() {
        let msg = SpqrMessage {
            epoch: 1,
            payload: SpqrPayload::Ct2(
                Chunk {
                    index: 0,
                    data: [0x11u8; CHUNK_SIZE],
                },
                [0x22u8; 32],
            ),
        };
        let bytes = msg.serialize();
        let parsed = SpqrMessage::deserialize(&bytes).unwrap();
        match parsed.payload {
            SpqrPayload::Ct2(c, mac) => {
                assert_eq!(c.data, [0x11u8; CHUNK_SIZE]);
                assert_eq!(mac, [0x22u8; 32]);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn epoch_zero_is_rejected() {
        let msg = SpqrMessage {
            epoch: 0,
            payload: SpqrPayload::None,
        };
        let bytes = msg.serialize();
        assert!(SpqrMessage::deserialize(&bytes).is_err());
    }

    #[test]
    fn none_payload_has_no_trailing_bytes() {
        let msg = SpqrMessage {
            epoch: 1,
            payload: SpqrPayload::None,
        };
        let bytes = msg.serialize();
        assert_eq!(bytes.len(), 1 + 1 + 1 + 1);
        let parsed = SpqrMessage::deserialize(&bytes).unwrap();
        assert!(matches!(parsed.payload, SpqrPayload::None));
    }
}
