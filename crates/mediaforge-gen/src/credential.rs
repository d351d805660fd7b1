//! Rotating API key pools
//!
//! Each provider owns one pool. Draws walk the keys in their configured
//! order and wrap around, spreading calls across accounts for rate limits.

use mediaforge_core::{ForgeError, Result};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A round-robin set of secrets for one provider
pub struct CredentialPool {
    name: String,
    secrets: Vec<String>,
    cursor: AtomicUsize,
}

impl CredentialPool {
    /// Create a pool; blank entries are dropped
    pub fn new<I, S>(name: &str, secrets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let secrets = secrets
            .into_iter()
            .map(|s| s.as_ref().trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        Self {
            name: name.to_string(),
            secrets,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Create a pool from a comma-separated list (`"key1,key2"`)
    pub fn from_list(name: &str, list: &str) -> Self {
        Self::new(name, list.split(','))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }

    /// Return the secret at the cursor and advance the cursor modulo the pool size
    pub fn get_next(&self) -> Result<String> {
        self.next_slot().map(|(_, secret)| secret)
    }

    /// Like `get_next`, also returning the slot index drawn
    pub fn next_slot(&self) -> Result<(usize, String)> {
        let len = self.secrets.len();
        if len == 0 {
            return Err(ForgeError::NoCredentials(self.name.clone()));
        }

        let slot = self
            .cursor
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| Some((c + 1) % len))
            .unwrap_or_else(|c| c)
            % len;

        tracing::debug!(pool = %self.name, slot, size = len, "drew credential");
        Ok((slot, self.secrets[slot].clone()))
    }

    /// The secret in a given slot, for calls that must reuse an earlier draw
    pub fn slot(&self, slot: usize) -> Result<String> {
        self.secrets
            .get(slot)
            .cloned()
            .ok_or_else(|| ForgeError::NoCredentials(self.name.clone()))
    }
}

impl fmt::Debug for CredentialPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPool")
            .field("name", &self.name)
            .field("size", &self.secrets.len())
            .field("cursor", &self.cursor.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    #[test]
    fn test_rotation_is_cyclic() {
        let pool = CredentialPool::new("flux", ["a", "b", "c"]);
        let drawn: Vec<String> = (0..7).map(|_| pool.get_next().unwrap()).collect();
        assert_eq!(drawn, vec!["a", "b", "c", "a", "b", "c", "a"]);
    }

    #[test]
    fn test_draw_counts_are_balanced() {
        let keys = ["k1", "k2", "k3", "k4"];
        let pool = CredentialPool::new("openai", keys);
        let n = 10;

        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..n {
            *counts.entry(pool.get_next().unwrap()).or_default() += 1;
        }

        let floor = n / keys.len();
        let ceil = n.div_ceil(keys.len());
        for key in keys {
            let c = counts.get(key).copied().unwrap_or(0);
            assert!(c == floor || c == ceil, "{} drawn {} times", key, c);
        }
    }

    #[test]
    fn test_empty_pool_fails_first_draw() {
        let pool = CredentialPool::new("elevenlabs", Vec::<String>::new());
        assert!(pool.is_empty());
        match pool.get_next() {
            Err(ForgeError::NoCredentials(name)) => assert_eq!(name, "elevenlabs"),
            other => panic!("expected NoCredentials, got {:?}", other),
        }
    }

    #[test]
    fn test_from_list_trims_and_skips_blanks() {
        let pool = CredentialPool::from_list("flux", " key1 , ,key2,");
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.get_next().unwrap(), "key1");
        assert_eq!(pool.get_next().unwrap(), "key2");
        assert_eq!(pool.get_next().unwrap(), "key1");
    }

    #[test]
    fn test_slot_lookup() {
        let pool = CredentialPool::new("flux", ["a", "b"]);
        let (slot, secret) = pool.next_slot().unwrap();
        assert_eq!(slot, 0);
        assert_eq!(pool.slot(slot).unwrap(), secret);
        assert!(pool.slot(5).is_err());
    }

    #[test]
    fn test_concurrent_draws_stay_balanced() {
        let pool = Arc::new(CredentialPool::new("flux", ["a", "b", "c"]));
        let handles: Vec<_> = (0..6)
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    (0..50).map(|_| pool.get_next().unwrap()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut counts: HashMap<String, usize> = HashMap::new();
        for handle in handles {
            for key in handle.join().unwrap() {
                *counts.entry(key).or_default() += 1;
            }
        }
        assert_eq!(counts["a"], 100);
        assert_eq!(counts["b"], 100);
        assert_eq!(counts["c"], 100);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let pool = CredentialPool::new("flux", ["super-secret"]);
        let text = format!("{:?}", pool);
        assert!(!text.contains("super-secret"));
        assert!(text.contains("size: 1"));
    }
}
