//! # API-key registry.
//!
//! Mints one 128-bit random token per service name, hex-encoded to 32
//! characters. Keys are minted eagerly for every service present at the
//! initial load and lazily during reconciliation for newly-observed names.
//! A key is never rotated while the supervisor lives, even across config
//! reloads and service restarts; that stability is what lets peers cache
//! keys obtained through `getApiKey`.

use std::collections::HashMap;

use rand::Rng;

/// Per-service random token store, stable for supervisor uptime.
#[derive(Debug, Default)]
pub struct KeyRegistry {
    keys: HashMap<String, String>,
}

impl KeyRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the key for `name`, minting it on first need.
    pub fn ensure(&mut self, name: &str) -> &str {
        self.keys
            .entry(name.to_string())
            .or_insert_with(mint_token)
    }

    /// Returns the key for `name` if one was ever minted.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.keys.get(name).map(String::as_str)
    }

    /// Number of minted keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// True if no key was minted yet.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// 128 bits of OS-backed randomness, lower-hex.
fn mint_token() -> String {
    format!("{:032x}", rand::rng().random::<u128>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_32_char_hex() {
        let mut reg = KeyRegistry::new();
        let key = reg.ensure("auth").to_string();
        assert_eq!(key.len(), 32);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn key_is_stable_across_ensures() {
        let mut reg = KeyRegistry::new();
        let first = reg.ensure("auth").to_string();
        let second = reg.ensure("auth").to_string();
        assert_eq!(first, second);
    }

    #[test]
    fn distinct_names_get_distinct_keys() {
        let mut reg = KeyRegistry::new();
        let a = reg.ensure("a").to_string();
        let b = reg.ensure("b").to_string();
        assert_ne!(a, b);
    }

    #[test]
    fn get_does_not_mint() {
        let reg = KeyRegistry::new();
        assert!(reg.get("ghost").is_none());
        assert!(reg.is_empty());
    }
}
