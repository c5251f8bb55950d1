//! Sparse Post-Quantum Ratchet (C4): authenticator ratchet, GF(2^16)
//! chunk erasure coding, and the 11-variant send_ek/send_ct state
//! machine that produces one epoch secret per completed exchange round.

pub mod authenticator;
pub mod message;
pub mod poly;
pub mod state;

pub use authenticator::Authenticator;
pub use message::{Chunk, SpqrMessage, SpqrPayload};
pub use state::{EpochSecret, SpqrState};
