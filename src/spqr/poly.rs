//! GF(2^16) polynomial chunk encoder/decoder for SPQR fields.
//!
//! Each SPQR field (`hdr`, `ek`, `ct1`, `ct2`) is split into 32-byte
//! chunks; within a chunk, 16 lanes of 2 bytes each are treated as
//! elements of GF(2^16) (`NUM_POLYS = 16`). The systematic part of the
//! code (chunk indices `0..k`) is the field split verbatim; indices `>=
//! k` are Reed-Solomon-style parity chunks evaluated from a Vandermonde
//! matrix over GF(2^16), giving the sender extra chunks to retransmit
//! once the systematic set has been sent at least once (see
//! `SpqrState::send`'s round-robin counters).
//!
//! Grounded in the GF(256) Shamir secret-sharing polynomial
//! evaluation/interpolation in
//! `secure-legion-core/src/crypto/backup.rs`, generalized from GF(256)
//! to GF(2^16) and from a single evaluation/interpolation pair to a
//! systematic-plus-parity code so any `k` of the `base_len + parity`
//! chunks (not just `k` evaluation points) reconstruct the field.

use once_cell::sync::Lazy;

pub const CHUNK_SIZE: usize = 32;
pub const NUM_POLYS: usize = 16;

/// `x^16 + x^12 + x^3 + x + 1`, the CRC-16-CCITT modulus, a standard
/// irreducible (and primitive) polynomial for GF(2^16).
const GF_MODULUS: u32 = 0x1_100B;

struct GfTables {
    exp: Vec<u16>,
    log: Vec<u16>,
}

fn build_tables() -> GfTables {
    let mut exp = vec![0u16; 2 * 65535];
    let mut log = vec![0u16; 65536];
    let mut x: u32 = 1;
    for i in 0..65535usize {
        exp[i] = x as u16;
        log[x as usize] = i as u16;
        x <<= 1;
        if x & 0x1_0000 != 0 {
            x ^= GF_MODULUS;
        }
    }
    for i in 65535..exp.len() {
        exp[i] = exp[i - 65535];
    }
    GfTables { exp, log }
}

static GF: Lazy<GfTables> = Lazy::new(build_tables);

fn gf_mul(a: u16, b: u16) -> u16 {
    if a == 0 || b == 0 {
        return 0;
    }
    let la = GF.log[a as usize] as usize;
    let lb = GF.log[b as usize] as usize;
    GF.exp[la + lb]
}

fn gf_pow(a: u16, e: usize) -> u16 {
    if a == 0 {
        return 0;
    }
    let la = GF.log[a as usize] as usize;
    GF.exp[(la * e) % 65535]
}

/// Multiplicative inverse; undefined (and never called) for zero.
fn gf_inv(a: u16) -> u16 {
    let la = GF.log[a as usize] as usize;
    GF.exp[(65535 - la) % 65535]
}

fn lane_at(chunk: &[u8; CHUNK_SIZE], lane: usize) -> u16 {
    u16::from_be_bytes([chunk[lane * 2], chunk[lane * 2 + 1]])
}

fn set_lane(chunk: &mut [u8; CHUNK_SIZE], lane: usize, value: u16) {
    let bytes = value.to_be_bytes();
    chunk[lane * 2] = bytes[0];
    chunk[lane * 2 + 1] = bytes[1];
}

/// Gauss-Jordan elimination over GF(2^16), returning the inverse of the
/// `n x n` matrix `a`, or `None` if `a` is singular.
fn invert_matrix(mut a: Vec<Vec<u16>>, n: usize) -> Option<Vec<Vec<u16>>> {
    let mut inv = vec![vec![0u16; n]; n];
    for i in 0..n {
        inv[i][i] = 1;
    }
    for col in 0..n {
        let pivot_row = (col..n).find(|&row| a[row][col] != 0)?;
        a.swap(col, pivot_row);
        inv.swap(col, pivot_row);
        let pivot_inv = gf_inv(a[col][col]);
        for c in 0..n {
            a[col][c] = gf_mul(a[col][c], pivot_inv);
            inv[col][c] = gf_mul(inv[col][c], pivot_inv);
        }
        for row in 0..n {
            if row != col && a[row][col] != 0 {
                let factor = a[row][col];
                for c in 0..n {
                    a[row][c] ^= gf_mul(factor, a[col][c]);
                    inv[row][c] ^= gf_mul(factor, inv[col][c]);
                }
            }
        }
    }
    Some(inv)
}

/// Splits a byte field into `CHUNK_SIZE`-byte base chunks (the last
/// zero-padded) and produces additional parity chunks on demand.
pub struct PolyEncoder {
    base: Vec<[u8; CHUNK_SIZE]>,
}

impl PolyEncoder {
    pub fn new(field: &[u8]) -> Self {
        let mut base = Vec::with_capacity(field.len().div_ceil(CHUNK_SIZE));
        for block in field.chunks(CHUNK_SIZE) {
            let mut chunk = [0u8; CHUNK_SIZE];
            chunk[..block.len()].copy_from_slice(block);
            base.push(chunk);
        }
        if base.is_empty() {
            base.push([0u8; CHUNK_SIZE]);
        }
        PolyEncoder { base }
    }

    pub fn base_len(&self) -> usize {
        self.base.len()
    }

    /// Returns the chunk at `index`. Indices `< base_len()` are the raw
    /// field bytes (systematic); indices beyond that are Reed-Solomon
    /// parity evaluated at evaluation point `index - base_len() + 1`.
    pub fn chunk(&self, index: u32) -> [u8; CHUNK_SIZE] {
        let k = self.base.len();
        let idx = index as usize;
        if idx < k {
            return self.base[idx];
        }
        let point = (idx - k + 1) as u16;
        let mut out = [0u8; CHUNK_SIZE];
        for lane in 0..NUM_POLYS {
            let mut acc: u16 = 0;
            for (i, chunk) in self.base.iter().enumerate() {
                let coeff = lane_at(chunk, lane);
                acc ^= gf_mul(coeff, gf_pow(point, i));
            }
            set_lane(&mut out, lane, acc);
        }
        out
    }
}

/// Accepts indexed chunks out of order and duplicated, reconstructing
/// the field once enough systematic and parity chunks have arrived to
/// cover every missing systematic index.
///
/// Each received parity chunk at point `p` encodes, per GF(2^16) lane,
/// `sum_i c_i * p^i` over the (unknown) systematic coefficients `c_i`.
/// Given `m` missing systematic indices and at least `m` distinct
/// parity points, the resulting `m x m` coefficient matrix (columns are
/// the missing exponents, rows are the received points) is a
/// generalized Vandermonde matrix and therefore invertible, so any `m`
/// parity chunks recover any `m` missing systematic chunks.
pub struct PolyDecoder {
    field_len: usize,
    base_len: usize,
    systematic: Vec<Option<[u8; CHUNK_SIZE]>>,
    /// `(evaluation point, chunk)` pairs for received parity chunks,
    /// deduplicated by point.
    parity: Vec<(u16, [u8; CHUNK_SIZE])>,
}

impl PolyDecoder {
    pub fn new(field_len: usize) -> Self {
        let base_len = field_len.div_ceil(CHUNK_SIZE).max(1);
        PolyDecoder {
            field_len,
            base_len,
            systematic: vec![None; base_len],
            parity: Vec::new(),
        }
    }

    /// Accept a chunk: systematic indices (`< base_len`) overwrite
    /// directly, parity indices (`>= base_len`) are recorded by their
    /// evaluation point, deduplicating retransmissions of the same
    /// point.
    pub fn accept(&mut self, index: u32, data: [u8; CHUNK_SIZE]) {
        let idx = index as usize;
        if idx < self.base_len {
            self.systematic[idx] = Some(data);
            return;
        }
        let point = (idx - self.base_len + 1) as u16;
        if let Some(slot) = self.parity.iter_mut().find(|(p, _)| *p == point) {
            slot.1 = data;
        } else {
            self.parity.push((point, data));
        }
    }

    /// True once every missing systematic chunk can be recovered from
    /// the parity chunks received so far.
    pub fn is_complete(&self) -> bool {
        let missing = self.systematic.iter().filter(|c| c.is_none()).count();
        self.parity.len() >= missing
    }

    pub fn reconstruct(&self) -> Option<Vec<u8>> {
        if !self.is_complete() {
            return None;
        }
        let missing: Vec<usize> = (0..self.base_len).filter(|&i| self.systematic[i].is_none()).collect();

        let mut recovered = self.systematic.clone();
        if !missing.is_empty() {
            let m = missing.len();
            let chosen = &self.parity[..m];

            let mut a = vec![vec![0u16; m]; m];
            for (row, &(point, _)) in chosen.iter().enumerate() {
                for (col, &exp) in missing.iter().enumerate() {
                    a[row][col] = gf_pow(point, exp);
                }
            }
            let inv = invert_matrix(a, m)?;

            for lane in 0..NUM_POLYS {
                let mut rhs = vec![0u16; m];
                for (row, &(point, data)) in chosen.iter().enumerate() {
                    let mut value = lane_at(&data, lane);
                    for (i, known) in self.systematic.iter().enumerate() {
                        if let Some(known) = known {
                            value ^= gf_mul(lane_at(known, lane), gf_pow(point, i));
                        }
                    }
                    rhs[row] = value;
                }
                for (col, &idx) in missing.iter().enumerate() {
                    let mut value = 0u16;
                    for row in 0..m {
                        value ^= gf_mul(inv[col][row], rhs[row]);
                    }
                    set_lane(recovered[idx].get_or_insert([0u8; CHUNK_SIZE]), lane, value);
                }
            }
        }

        let mut out = Vec::with_capacity(self.base_len * CHUNK_SIZE);
        for chunk in &recovered {
            out.extend_from_slice(&chunk.expect("every systematic slot filled directly or recovered above"));
        }
        out.truncate(self.field_len);
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn systematic_chunks_equal_input() {
        let field = b"the header bytes of an SPQR exchange message...";
        let enc = PolyEncoder::new(field);
        let mut dec = PolyDecoder::new(field.len());
        for i in 0..enc.base_len() as u32 {
            dec.accept(i, enc.chunk(i));
        }
        assert!(dec.is_complete());
        let mut expected = field.to_vec();
        expected.resize(enc.base_len() * CHUNK_SIZE, 0);
        assert_eq!(dec.reconstruct().unwrap(), expected[..field.len()]);
    }

    #[test]
    fn out_of_order_and_duplicate_chunks_still_reconstruct() {
        let field = [7u8; 100];
        let enc = PolyEncoder::new(&field);
        let mut dec = PolyDecoder::new(field.len());
        let k = enc.base_len() as u32;
        dec.accept(k - 1, enc.chunk(k - 1));
        dec.accept(k - 1, enc.chunk(k - 1));
        for i in (0..k - 1).rev() {
            dec.accept(i, enc.chunk(i));
        }
        assert!(dec.is_complete());
        assert_eq!(dec.reconstruct().unwrap(), field.to_vec());
    }

    #[test]
    fn missing_systematic_chunks_recover_from_parity() {
        let field = [1u8; 200];
        let enc = PolyEncoder::new(&field);
        let k = enc.base_len() as u32;
        let mut dec = PolyDecoder::new(field.len());
        // Drop the first two systematic chunks, supply parity instead.
        for i in 2..k {
            dec.accept(i, enc.chunk(i));
        }
        assert!(!dec.is_complete());
        dec.accept(k, enc.chunk(k));
        dec.accept(k + 1, enc.chunk(k + 1));
        assert!(dec.is_complete());
        assert_eq!(dec.reconstruct().unwrap(), field.to_vec());
    }

    #[test]
    fn thirty_percent_chunk_loss_still_reconstructs() {
        let field: Vec<u8> = (0..500u32).map(|i| (i % 251) as u8).collect();
        let enc = PolyEncoder::new(&field);
        let k = enc.base_len() as u32;
        let mut dec = PolyDecoder::new(field.len());
        let drop_count = (k as f64 * 0.3).ceil() as u32;
        // Keep all but `drop_count` systematic chunks, backfill with parity.
        for i in drop_count..k {
            dec.accept(i, enc.chunk(i));
        }
        for j in 0..drop_count {
            dec.accept(k + j, enc.chunk(k + j));
        }
        assert!(dec.is_complete());
        assert_eq!(dec.reconstruct().unwrap(), field);
    }

    #[test]
    fn parity_alone_does_not_complete_when_insufficient() {
        let field = [1u8; 64];
        let enc = PolyEncoder::new(&field);
        let mut dec = PolyDecoder::new(field.len());
        dec.accept(enc.base_len() as u32, enc.chunk(enc.base_len() as u32));
        assert!(!dec.is_complete());
    }

    proptest::proptest! {
        #[test]
        fn systematic_only_round_trips_for_any_field(field: Vec<u8>) {
            let enc = PolyEncoder::new(&field);
            let mut dec = PolyDecoder::new(field.len());
            for i in 0..enc.base_len() as u32 {
                dec.accept(i, enc.chunk(i));
            }
            proptest::prop_assert!(dec.is_complete());
            proptest::prop_assert_eq!(dec.reconstruct().unwrap(), field);
        }

        #[test]
        fn any_k_of_base_plus_parity_chunks_recover_the_field(
            field: Vec<u8>,
            drop_seed in 0u32..1000,
        ) {
            let enc = PolyEncoder::new(&field);
            let k = enc.base_len() as u32;
            let drop_count = drop_seed % k;
            let mut dec = PolyDecoder::new(field.len());
            for i in drop_count..k {
                dec.accept(i, enc.chunk(i));
            }
            for j in 0..drop_count {
                dec.accept(k + j, enc.chunk(k + j));
            }
            proptest::prop_assert!(dec.is_complete());
            proptest::prop_assert_eq!(dec.reconstruct().unwrap(), field);
        }
    }
}
