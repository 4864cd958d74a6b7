//! Key material supplied by the caller's vault
//!
//! The engine never stores card keys beyond the lifetime of a handshake; it
//! pulls them through the [`KeyProvider`] contract. [`KeySet`] is the plain
//! in-memory implementation used by provisioning flows and tests. How a
//! vault persists and encrypts key sets is an external concern.

use std::collections::BTreeMap;

use zeroize::Zeroizing;

use crate::types::{Aid, KeyType};

/// Factory default key: sixteen zero bytes
pub const FACTORY_KEY: [u8; 16] = [0u8; 16];

/// Source of card keys for authentication and key changes
pub trait KeyProvider {
    /// Look up the key for an application and key number
    ///
    /// Returns the raw key bytes and the cipher family, or `None` when the
    /// vault holds no entry.
    fn key_for(&self, aid: Aid, key_no: u8) -> Option<(Zeroizing<Vec<u8>>, KeyType)>;
}

/// In-memory key set for one application
pub struct KeySet {
    app_id: Aid,
    key_type: KeyType,
    keys: BTreeMap<u8, Zeroizing<Vec<u8>>>,
    versions: BTreeMap<u8, u8>,
}

impl KeySet {
    /// Create an empty key set
    pub fn new(app_id: Aid, key_type: KeyType) -> Self {
        Self {
            app_id,
            key_type,
            keys: BTreeMap::new(),
            versions: BTreeMap::new(),
        }
    }

    /// Key set holding only the factory default key 0
    pub fn factory(app_id: Aid, key_type: KeyType) -> Self {
        let mut set = Self::new(app_id, key_type);
        set.insert(0, FACTORY_KEY.to_vec(), 0);
        set
    }

    /// Application this set belongs to
    pub const fn app_id(&self) -> Aid {
        self.app_id
    }

    /// Cipher family of the keys
    pub const fn key_type(&self) -> KeyType {
        self.key_type
    }

    /// Insert or replace a key
    pub fn insert(&mut self, key_no: u8, key: Vec<u8>, version: u8) {
        self.keys.insert(key_no, Zeroizing::new(key));
        self.versions.insert(key_no, version);
    }

    /// Get a key by number
    pub fn key(&self, key_no: u8) -> Option<&[u8]> {
        self.keys.get(&key_no).map(|k| k.as_slice())
    }

    /// Get the version byte of a key (0 when unknown)
    pub fn version(&self, key_no: u8) -> u8 {
        self.versions.get(&key_no).copied().unwrap_or(0)
    }
}

impl KeyProvider for KeySet {
    fn key_for(&self, aid: Aid, key_no: u8) -> Option<(Zeroizing<Vec<u8>>, KeyType)> {
        if aid != self.app_id {
            return None;
        }
        self.keys
            .get(&key_no)
            .map(|key| (Zeroizing::new(key.to_vec()), self.key_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_set() {
        let aid = Aid::new(0x0000AA).unwrap();
        let set = KeySet::factory(aid, KeyType::Aes);
        assert_eq!(set.key(0), Some(FACTORY_KEY.as_slice()));
        assert_eq!(set.version(0), 0);
        assert!(set.key(1).is_none());
    }

    #[test]
    fn test_provider_scoping() {
        let aid = Aid::new(0x0000AA).unwrap();
        let mut set = KeySet::new(aid, KeyType::Aes);
        set.insert(2, vec![0x42; 16], 7);

        let (key, key_type) = set.key_for(aid, 2).unwrap();
        assert_eq!(key.as_slice(), &[0x42; 16]);
        assert_eq!(key_type, KeyType::Aes);
        assert_eq!(set.version(2), 7);

        // Wrong application yields nothing
        assert!(set.key_for(Aid::PICC, 2).is_none());
    }
}
