//! Decrypt and transcode stages injected into the engine.

use std::sync::Arc;

use aes::Aes128;
use async_trait::async_trait;
use bytes::Bytes;
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};

use crate::error::{Error, Result};
use crate::playlist::keys::{default_iv, to_block, BLOCK_LEN};
use crate::playlist::Fragment;

/// One asynchronous stage of the per-fragment pipeline.
///
/// An `Err` is a pipeline failure and goes through the same retry ladder as
/// a failed fetch.
#[async_trait]
pub trait FragmentHook: Send + Sync {
    async fn apply(&self, data: Bytes, fragment: &Fragment) -> Result<Bytes>;
}

/// Block cipher used by [`KeyedDecryptHook`].
pub trait Decryptor: Send + Sync {
    fn decrypt(&self, data: &[u8], key: &[u8; BLOCK_LEN], iv: &[u8; BLOCK_LEN]) -> Result<Vec<u8>>;
}

/// AES-128-CBC with PKCS#7 padding, as used by HLS `METHOD=AES-128`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Aes128Decryptor;

impl Decryptor for Aes128Decryptor {
    fn decrypt(&self, data: &[u8], key: &[u8; BLOCK_LEN], iv: &[u8; BLOCK_LEN]) -> Result<Vec<u8>> {
        if data.len() % BLOCK_LEN != 0 {
            return Err(Error::InvalidKey(format!(
                "ciphertext length {} is not a multiple of {}",
                data.len(),
                BLOCK_LEN
            )));
        }

        let mut buf = data.to_vec();
        let decryptor = cbc::Decryptor::<Aes128>::new(key.into(), iv.into());
        let len = decryptor
            .decrypt_padded_mut::<Pkcs7>(&mut buf)
            .map_err(|e| Error::InvalidKey(format!("PKCS7 unpad failed: {}", e)))?
            .len();
        buf.truncate(len);
        Ok(buf)
    }
}

/// Decrypt hook that resolves key material per fragment.
///
/// Key: the override, else the fragment's fetched key. IV: the override,
/// else the playlist IV, else the fragment's sequence number. Fragments
/// with no resolvable key pass through unchanged.
pub struct KeyedDecryptHook {
    decryptor: Arc<dyn Decryptor>,
    key: Option<[u8; BLOCK_LEN]>,
    iv: Option<[u8; BLOCK_LEN]>,
}

impl KeyedDecryptHook {
    pub fn new(decryptor: Arc<dyn Decryptor>) -> Self {
        Self {
            decryptor,
            key: None,
            iv: None,
        }
    }

    /// AES-128 hook with no overrides.
    pub fn aes128() -> Self {
        Self::new(Arc::new(Aes128Decryptor))
    }

    pub fn with_key(mut self, key: Option<[u8; BLOCK_LEN]>) -> Self {
        self.key = key;
        self
    }

    pub fn with_iv(mut self, iv: Option<[u8; BLOCK_LEN]>) -> Self {
        self.iv = iv;
        self
    }

    fn resolve_key(&self, fragment: &Fragment) -> Result<Option<[u8; BLOCK_LEN]>> {
        if let Some(key) = self.key {
            return Ok(Some(key));
        }
        match fragment.decryptdata.as_ref().and_then(|d| d.key.as_deref()) {
            Some(bytes) => to_block(bytes).map(Some),
            None => Ok(None),
        }
    }

    fn resolve_iv(&self, fragment: &Fragment) -> [u8; BLOCK_LEN] {
        self.iv
            .or_else(|| fragment.decryptdata.as_ref().and_then(|d| d.iv))
            .unwrap_or_else(|| default_iv(fragment.sn))
    }
}

#[async_trait]
impl FragmentHook for KeyedDecryptHook {
    async fn apply(&self, data: Bytes, fragment: &Fragment) -> Result<Bytes> {
        let Some(key) = self.resolve_key(fragment)? else {
            tracing::warn!(
                "Fragment {} is encrypted but has no key, leaving as-is",
                fragment.index
            );
            return Ok(data);
        };
        let iv = self.resolve_iv(fragment);
        let plain = self.decryptor.decrypt(&data, &key, &iv)?;
        Ok(Bytes::from(plain))
    }
}
