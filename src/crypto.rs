use crate::Result;

/// Key store collaborator: answers key-presence queries and decrypts index
/// buffers in place. Keyed by the trailer's encryption-key GUID; the zero
/// GUID addresses the embedded/default key.
pub trait KeyStore: Send + Sync {
    fn contains_key(&self, guid: u128) -> bool;
    fn decrypt(&self, guid: u128, data: &mut [u8]) -> Result<()>;
}

/// Key store with no keys at all; decryption requests fail.
#[derive(Debug, Default)]
pub struct NoKeys;

impl KeyStore for NoKeys {
    fn contains_key(&self, _guid: u128) -> bool {
        false
    }

    fn decrypt(&self, _guid: u128, _data: &mut [u8]) -> Result<()> {
        Err(crate::Error::Encrypted)
    }
}

#[cfg(feature = "encryption")]
pub use aes_store::StaticKeyStore;

#[cfg(feature = "encryption")]
mod aes_store {
    use super::KeyStore;
    use crate::Result;
    use std::collections::HashMap;

    /// In-process key store over AES-256 keys registered up front.
    #[derive(Default)]
    pub struct StaticKeyStore {
        keys: HashMap<u128, aes::Aes256>,
    }

    impl StaticKeyStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Register the embedded/default key (GUID zero).
        pub fn with_default_key(key: aes::Aes256) -> Self {
            let mut store = Self::new();
            store.add(0, key);
            store
        }

        pub fn add(&mut self, guid: u128, key: aes::Aes256) {
            self.keys.insert(guid, key);
        }
    }

    impl KeyStore for StaticKeyStore {
        fn contains_key(&self, guid: u128) -> bool {
            self.keys.contains_key(&guid)
        }

        fn decrypt(&self, guid: u128, data: &mut [u8]) -> Result<()> {
            use aes::cipher::BlockDecrypt;
            let Some(key) = self.keys.get(&guid) else {
                return Err(crate::Error::Encrypted);
            };
            for chunk in data.chunks_mut(16) {
                if chunk.len() == 16 {
                    key.decrypt_block(aes::Block::from_mut_slice(chunk));
                }
            }
            Ok(())
        }
    }
}
