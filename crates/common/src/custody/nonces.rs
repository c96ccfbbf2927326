use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use super::CustodyError;
use crate::auth::Nonce;

/// How long an issued nonce stays spendable, in seconds
pub const DEFAULT_NONCE_TTL_SECS: i64 = 5 * 60;
/// Outstanding nonces a node keeps before evicting the oldest
pub const MAX_OUTSTANDING_NONCES: usize = 65_536;

/// Nonces a node has handed out and not yet seen spent
///
/// Cloning shares the underlying set.
#[derive(Debug, Clone)]
pub struct NonceStore {
    issued: Arc<Mutex<HashMap<Nonce, DateTime<Utc>>>>,
    ttl: Duration,
    capacity: usize,
}

impl Default for NonceStore {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_NONCE_TTL_SECS), MAX_OUTSTANDING_NONCES)
    }
}

impl NonceStore {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            issued: Arc::new(Mutex::new(HashMap::new())),
            ttl,
            capacity: capacity.max(1),
        }
    }

    pub fn issue_at(&self, now: DateTime<Utc>) -> Result<Nonce, CustodyError> {
        let nonce = Nonce::random()
            .map_err(|e| CustodyError::Network(format!("nonce generation failed: {}", e)))?;

        let mut issued = self.issued.lock();
        let ttl = self.ttl;
        issued.retain(|_, at| now - *at < ttl);
        if issued.len() >= self.capacity {
            let oldest = issued
                .iter()
                .min_by_key(|(_, at)| **at)
                .map(|(nonce, _)| *nonce);
            if let Some(oldest) = oldest {
                issued.remove(&oldest);
            }
        }
        issued.insert(nonce, now);
        Ok(nonce)
    }

    /// Spend `nonce`; true only the first time for a live, issued nonce
    pub fn consume_at(&self, nonce: &Nonce, now: DateTime<Utc>) -> bool {
        match self.issued.lock().remove(nonce) {
            Some(at) => now - at < self.ttl,
            None => false,
        }
    }

    pub fn outstanding(&self) -> usize {
        self.issued.lock().len()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_nonce_spends_once() {
        let store = NonceStore::default();
        let now = Utc::now();
        let nonce = store.issue_at(now).unwrap();
        assert!(store.consume_at(&nonce, now));
        assert!(!store.consume_at(&nonce, now));
    }

    #[test]
    fn test_unknown_nonce_rejected() {
        let store = NonceStore::default();
        assert!(!store.consume_at(&Nonce::random().unwrap(), Utc::now()));
    }

    #[test]
    fn test_expired_nonce_rejected() {
        let store = NonceStore::new(Duration::seconds(10), 8);
        let issued_at = Utc::now();
        let nonce = store.issue_at(issued_at).unwrap();
        assert!(!store.consume_at(&nonce, issued_at + Duration::seconds(11)));
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let store = NonceStore::new(Duration::minutes(5), 2);
        let start = Utc::now();
        let first = store.issue_at(start).unwrap();
        let second = store.issue_at(start + Duration::seconds(1)).unwrap();
        let third = store.issue_at(start + Duration::seconds(2)).unwrap();
        assert_eq!(store.outstanding(), 2);

        let now = start + Duration::seconds(3);
        assert!(!store.consume_at(&first, now));
        assert!(store.consume_at(&second, now));
        assert!(store.consume_at(&third, now));
    }
}
