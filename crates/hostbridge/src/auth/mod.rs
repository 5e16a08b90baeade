//! Pairing and caller authentication
//!
//! A human reads the short pair code off the daemon and types it into the
//! extension; the extension trades it for a long-lived bearer token and the
//! key for its site.

pub mod pair;
pub mod site_key;
pub mod token;

pub use pair::PairCodeManager;
pub use site_key::SiteKeyManager;
pub use token::{TokenManager, TokenRecord};

use rand::Rng;

/// Compare two secrets without short-circuiting on the first mismatch
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// `bytes` random bytes, hex encoded
pub(crate) fn random_hex(bytes: usize) -> String {
    let mut rng = rand::thread_rng();
    let raw: Vec<u8> = (0..bytes).map(|_| rng.gen()).collect();
    hex::encode(raw)
}
