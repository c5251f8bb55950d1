// Crate-level lint configuration — suppress stylistic warnings that don't affect correctness.
// Security-relevant lints (unsafe, unchecked, etc.) remain enforced.
#![allow(
    clippy::empty_line_after_doc_comments,
    clippy::doc_lazy_continuation,
    clippy::too_many_arguments,
    clippy::type_complexity,
    clippy::inherent_to_string,
    clippy::manual_strip,
    clippy::needless_range_loop
)]

pub mod config;
pub mod crypto;
pub mod error;
pub mod pqratchet;
pub mod session;
pub mod spqr;
pub mod storage;
pub mod wire;

pub use config::SessionConfig;
pub use error::{RatchetError, Result};
pub use pqratchet::PqRatchetState;
pub use session::{SessionCipher, SessionRecord, SessionState, SessionStats};
pub use wire::CiphertextMessage;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn get_version() -> &'static str {
    VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let version = get_version();
        assert!(!version.is_empty());
    }
}
