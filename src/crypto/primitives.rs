//! Crypto primitives (C1): HMAC, HKDF, AES-256-CBC/GCM-SIV, X25519 raw
//! agreement, XEdDSA sign/verify, and ML-KEM-768/1024 encapsulation.
//!
//! Every operation here is a pure function over byte buffers; no session
//! or ratchet state lives in this module.

use aes::Aes256;
use aes_gcm_siv::{aead::Aead, Aes256GcmSiv, KeyInit, Nonce as GcmSivNonce};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use curve25519_dalek::{
    edwards::{CompressedEdwardsY, EdwardsPoint},
    montgomery::MontgomeryPoint,
    scalar::Scalar,
};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use ml_kem::{
    kem::{Decapsulate, Encapsulate},
    Encoded, EncodedSizeUser, KemCore, MlKem1024, MlKem768,
};
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256, Sha512};
use thiserror::Error;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret as X25519Static};

type HmacSha256 = Hmac<Sha256>;
type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

#[derive(Error, Debug)]
pub enum PrimitiveError {
    #[error("invalid key length: expected {expected}, got {got}")]
    InvalidLength { expected: usize, got: usize },
    #[error("low-order or identity point rejected")]
    LowOrderPoint,
    #[error("HKDF output length too large for SHA-256")]
    HkdfLengthInvalid,
    #[error("PKCS#7 unpadding failed")]
    PaddingInvalid,
    #[error("AEAD encryption or decryption failed")]
    AeadFailed,
    #[error("ML-KEM operation failed")]
    KemFailed,
    #[error("signature verification failed")]
    SignatureInvalid,
}

type Result<T> = std::result::Result<T, PrimitiveError>;

/// HMAC-SHA256(key, data).
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// RFC 5869 HKDF-SHA256 extract-then-expand.
pub fn hkdf_sha256(ikm: &[u8], salt: Option<&[u8]>, info: &[u8], len: usize) -> Result<Vec<u8>> {
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    let mut okm = vec![0u8; len];
    hk.expand(info, &mut okm)
        .map_err(|_| PrimitiveError::HkdfLengthInvalid)?;
    Ok(okm)
}

/// AES-256-CBC encrypt with PKCS#7 padding. Output is always a non-zero
/// multiple of 16 bytes (at least one full padding block is appended).
pub fn aes256_cbc_encrypt(plaintext: &[u8], key: &[u8; 32], iv: &[u8; 16]) -> Vec<u8> {
    Aes256CbcEnc::new(key.into(), iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

/// AES-256-CBC decrypt with PKCS#7 unpadding.
pub fn aes256_cbc_decrypt(ciphertext: &[u8], key: &[u8; 32], iv: &[u8; 16]) -> Result<Vec<u8>> {
    if ciphertext.is_empty() || ciphertext.len() % 16 != 0 {
        return Err(PrimitiveError::InvalidLength {
            expected: 16,
            got: ciphertext.len(),
        });
    }
    Aes256CbcDec::new(key.into(), iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| PrimitiveError::PaddingInvalid)
}

/// AES-256-GCM-SIV encrypt; returns ciphertext with the tag appended.
pub fn aes256_gcm_siv_encrypt(
    key: &[u8; 32],
    nonce: &[u8; 12],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let cipher = Aes256GcmSiv::new(key.into());
    cipher
        .encrypt(
            GcmSivNonce::from_slice(nonce),
            aes_gcm_siv::aead::Payload { msg: plaintext, aad },
        )
        .map_err(|_| PrimitiveError::AeadFailed)
}

/// AES-256-GCM-SIV decrypt; expects the tag appended to `ciphertext`.
pub fn aes256_gcm_siv_decrypt(
    key: &[u8; 32],
    nonce: &[u8; 12],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let cipher = Aes256GcmSiv::new(key.into());
    cipher
        .decrypt(
            GcmSivNonce::from_slice(nonce),
            aes_gcm_siv::aead::Payload { msg: ciphertext, aad },
        )
        .map_err(|_| PrimitiveError::AeadFailed)
}

const LOW_ORDER_ALL_ZERO: [u8; 32] = [0u8; 32];
const LOW_ORDER_ONE_PREFIX: [u8; 32] = {
    let mut b = [0u8; 32];
    b[0] = 1;
    b
};

/// Raw X25519 Diffie-Hellman agreement. Rejects the known degenerate
/// low-order public keys (all-zero and the `0x01` identity encoding)
/// rather than silently returning an all-zero shared secret.
pub fn x25519_raw_agreement(private: &X25519Static, public: &[u8; 32]) -> Result<[u8; 32]> {
    if *public == LOW_ORDER_ALL_ZERO || *public == LOW_ORDER_ONE_PREFIX {
        return Err(PrimitiveError::LowOrderPoint);
    }
    let their_pub = X25519Public::from(*public);
    Ok(private.diffie_hellman(&their_pub).to_bytes())
}

/// XEdDSA signing domain separation, matching the convention used by
/// Signal's implementation rather than the original XEdDSA paper: the
/// scalar is used directly (never negated) and the Edwards public key's
/// natural sign bit is carried in the high bit of the signature.
const XEDDSA_NONCE_PREFIX: [u8; 32] = [0xfeu8; 32];
const XEDDSA_NONCE_MARKER: u8 = 0xff;

fn edwards_pub_from_scalar(scalar: &Scalar) -> EdwardsPoint {
    scalar * curve25519_dalek::constants::ED25519_BASEPOINT_POINT
}

fn scalar_from_clamped(private: &[u8; 32]) -> Scalar {
    // x25519-dalek clamps on construction; StaticSecret::to_bytes() returns
    // the clamped scalar bytes, which are a valid Ed25519 scalar encoding.
    Scalar::from_bits(*private)
}

/// Sign `message` with an X25519 private key, Signal-style XEdDSA.
///
/// `random` supplies 64 bytes of fresh entropy mixed into the nonce
/// derivation; callers should draw it from a CSPRNG.
pub fn xeddsa_sign(private: &X25519Static, message: &[u8], random: &[u8; 64]) -> [u8; 64] {
    let a = scalar_from_clamped(&private.to_bytes());
    let a_point = edwards_pub_from_scalar(&a);
    let a_bytes = a_point.compress().to_bytes();
    let sign_bit = a_bytes[31] >> 7;

    let mut hasher = Sha512::new();
    hasher.update(XEDDSA_NONCE_PREFIX);
    hasher.update([XEDDSA_NONCE_MARKER]);
    hasher.update(a.to_bytes());
    hasher.update(message);
    hasher.update(random);
    let nonce = Scalar::from_bytes_mod_order_wide(&hasher.finalize().into());

    let r_point = edwards_pub_from_scalar(&nonce);
    let r_bytes = r_point.compress().to_bytes();

    let mut challenge_hasher = Sha512::new();
    challenge_hasher.update(r_bytes);
    challenge_hasher.update(a_bytes);
    challenge_hasher.update(message);
    let h = Scalar::from_bytes_mod_order_wide(&challenge_hasher.finalize().into());

    let s = nonce + h * a;

    let mut sig = [0u8; 64];
    sig[..32].copy_from_slice(&r_bytes);
    sig[32..].copy_from_slice(&s.to_bytes());
    sig[63] |= sign_bit << 7;
    sig
}

/// Verify an XEdDSA signature made by [`xeddsa_sign`] over an X25519
/// public key. Reconstructs the Edwards point from the Montgomery public
/// key using the sign bit embedded in the signature.
pub fn xeddsa_verify(public: &[u8; 32], message: &[u8], sig: &[u8; 64]) -> bool {
    let sign_bit = sig[63] >> 7;
    let mut s_bytes = [0u8; 32];
    s_bytes.copy_from_slice(&sig[32..64]);
    s_bytes[31] &= 0x7f;

    let s = match Option::<Scalar>::from(Scalar::from_canonical_bytes(s_bytes)) {
        Some(s) => s,
        None => return false,
    };

    let a_point = match MontgomeryPoint(*public).to_edwards(sign_bit) {
        Some(p) => p,
        None => return false,
    };
    let a_bytes = a_point.compress().to_bytes();

    let mut r_bytes = [0u8; 32];
    r_bytes.copy_from_slice(&sig[..32]);

    let mut challenge_hasher = Sha512::new();
    challenge_hasher.update(r_bytes);
    challenge_hasher.update(a_bytes);
    challenge_hasher.update(message);
    let h = Scalar::from_bytes_mod_order_wide(&challenge_hasher.finalize().into());

    let r_check = EdwardsPoint::vartime_double_scalar_mul_basepoint(&h, &(-a_point), &s);
    r_check.compress().to_bytes() == r_bytes
}

/// Recover an Ed25519-style Edwards public key byte encoding (not part of
/// the public API; exposed for tests verifying sign-bit round-tripping).
#[cfg(test)]
fn edwards_pub_bytes(private: &X25519Static) -> [u8; 32] {
    edwards_pub_from_scalar(&scalar_from_clamped(&private.to_bytes()))
        .compress()
        .to_bytes()
}

/// ML-KEM-1024 keypair: (decapsulation key bytes, encapsulation key bytes).
pub fn ml_kem_1024_keygen() -> (Vec<u8>, Vec<u8>) {
    let (dk, ek) = MlKem1024::generate(&mut OsRng);
    (dk.as_bytes().to_vec(), ek.as_bytes().to_vec())
}

pub fn ml_kem_1024_encap(public: &[u8]) -> Result<(Vec<u8>, [u8; 32])> {
    let encoded = Encoded::<<MlKem1024 as KemCore>::EncapsulationKey>::try_from(public)
        .map_err(|_| PrimitiveError::KemFailed)?;
    let ek = <MlKem1024 as KemCore>::EncapsulationKey::from_bytes(&encoded);
    let (ct, shared) = ek.encapsulate(&mut OsRng).map_err(|_| PrimitiveError::KemFailed)?;
    let mut shared_bytes = [0u8; 32];
    shared_bytes.copy_from_slice(shared.as_slice());
    Ok((ct.to_vec(), shared_bytes))
}

pub fn ml_kem_1024_decap(secret: &[u8], ciphertext: &[u8]) -> Result<[u8; 32]> {
    let encoded = Encoded::<<MlKem1024 as KemCore>::DecapsulationKey>::try_from(secret)
        .map_err(|_| PrimitiveError::KemFailed)?;
    let dk = <MlKem1024 as KemCore>::DecapsulationKey::from_bytes(&encoded);
    let ct = ml_kem::Ciphertext::<MlKem1024>::try_from(ciphertext)
        .map_err(|_| PrimitiveError::KemFailed)?;
    let shared = dk.decapsulate(&ct).map_err(|_| PrimitiveError::KemFailed)?;
    let mut shared_bytes = [0u8; 32];
    shared_bytes.copy_from_slice(shared.as_slice());
    Ok(shared_bytes)
}

/// ML-KEM-768 keypair, used for SPQR epoch exchanges.
pub fn ml_kem_768_keygen() -> (Vec<u8>, Vec<u8>) {
    let (dk, ek) = MlKem768::generate(&mut OsRng);
    (dk.as_bytes().to_vec(), ek.as_bytes().to_vec())
}

pub fn ml_kem_768_encap(public: &[u8]) -> Result<(Vec<u8>, [u8; 32])> {
    let encoded = Encoded::<<MlKem768 as KemCore>::EncapsulationKey>::try_from(public)
        .map_err(|_| PrimitiveError::KemFailed)?;
    let ek = <MlKem768 as KemCore>::EncapsulationKey::from_bytes(&encoded);
    let (ct, shared) = ek.encapsulate(&mut OsRng).map_err(|_| PrimitiveError::KemFailed)?;
    let mut shared_bytes = [0u8; 32];
    shared_bytes.copy_from_slice(shared.as_slice());
    Ok((ct.to_vec(), shared_bytes))
}

pub fn ml_kem_768_decap(secret: &[u8], ciphertext: &[u8]) -> Result<[u8; 32]> {
    let encoded = Encoded::<<MlKem768 as KemCore>::DecapsulationKey>::try_from(secret)
        .map_err(|_| PrimitiveError::KemFailed)?;
    let dk = <MlKem768 as KemCore>::DecapsulationKey::from_bytes(&encoded);
    let ct = ml_kem::Ciphertext::<MlKem768>::try_from(ciphertext)
        .map_err(|_| PrimitiveError::KemFailed)?;
    let shared = dk.decapsulate(&ct).map_err(|_| PrimitiveError::KemFailed)?;
    let mut shared_bytes = [0u8; 32];
    shared_bytes.copy_from_slice(shared.as_slice());
    Ok(shared_bytes)
}

/// Fill a buffer of arbitrary length with OS randomness.
pub fn fill_random(buf: &mut [u8]) {
    OsRng.fill_bytes(buf);
}

pub fn random_keypair() -> X25519Static {
    X25519Static::random_from_rng(OsRng)
}
