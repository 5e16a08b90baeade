//! One-time pairing codes

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use std::sync::{Mutex, PoisonError};
use tracing::info;

use super::constant_time_eq;

#[derive(Debug, Clone)]
struct PairCode {
    code: String,
    expires_at: DateTime<Utc>,
}

impl PairCode {
    fn generate(ttl: Duration) -> Self {
        let n: u32 = rand::thread_rng().gen_range(0..1_000_000);
        Self {
            code: format!("{:06}", n),
            expires_at: Utc::now() + ttl,
        }
    }
}

/// Holds the single active pair code
#[derive(Debug)]
pub struct PairCodeManager {
    ttl: Duration,
    active: Mutex<PairCode>,
}

impl PairCodeManager {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            active: Mutex::new(PairCode::generate(ttl)),
        }
    }

    /// The code a human should type, issuing a fresh one if the last expired
    pub fn current(&self) -> (String, DateTime<Utc>) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if Utc::now() >= active.expires_at {
            *active = PairCode::generate(self.ttl);
            info!("Pairing code rotated: {}", active.code);
        }
        (active.code.clone(), active.expires_at)
    }

    /// Check `code`. A correct, unexpired code is consumed and replaced.
    pub fn verify(&self, code: &str) -> bool {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if Utc::now() >= active.expires_at {
            return false;
        }
        if !constant_time_eq(code.trim(), &active.code) {
            return false;
        }

        let mut next = PairCode::generate(self.ttl);
        while next.code == active.code {
            next = PairCode::generate(self.ttl);
        }
        *active = next;
        info!("Pairing code used; next code: {}", active.code);
        true
    }
}
