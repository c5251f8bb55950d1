//! Session layer: PQXDH bootstrap (C7), session state (C6), and the
//! session cipher (C8) that drives encrypt/decrypt over both.

pub mod cipher;
pub mod init;
pub mod state;

pub use cipher::{SessionCipher, Stats as SessionStats};
pub use init::{
    initialize_alice_session, initialize_bob_session, AliceSessionInput, AliceSessionOutput, BobSessionInput,
    BobSessionOutput, SESSION_VERSION_V4,
};
pub use state::{SessionRecord, SessionState};
