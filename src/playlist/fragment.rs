//! Fragment representation.

use serde::{Deserialize, Serialize};

/// Key material attached to an encrypted fragment (`#EXT-X-KEY`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecryptData {
    /// Encryption method as written in the playlist (e.g. `AES-128`).
    pub method: String,

    /// Absolute key URI, if the playlist names one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,

    /// Raw key bytes once fetched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<Vec<u8>>,

    /// Explicit IV from the playlist.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iv: Option<[u8; 16]>,
}

/// One addressable chunk of the media asset.
///
/// Fragments are immutable once handed to an engine; mutable retry state
/// lives in the engine's own side table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fragment {
    /// Dense position within the list currently being processed.
    pub index: usize,

    /// Position in the full playlist when `index` was remapped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_index: Option<usize>,

    /// Absolute segment URL.
    pub url: String,

    /// Segment duration in seconds.
    #[serde(default)]
    pub duration: f64,

    /// Whether the segment needs decrypting.
    #[serde(default)]
    pub encrypted: bool,

    /// Key material, when the playlist supplied it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decryptdata: Option<DecryptData>,

    /// Media sequence number (IV fallback).
    #[serde(default)]
    pub sn: u64,
}

impl Fragment {
    /// Create a plain, unencrypted fragment.
    pub fn new(index: usize, url: impl Into<String>) -> Self {
        Self {
            index,
            original_index: None,
            url: url.into(),
            duration: 0.0,
            encrypted: false,
            decryptdata: None,
            sn: index as u64,
        }
    }

    /// Set the duration.
    pub fn with_duration(mut self, duration: f64) -> Self {
        self.duration = duration;
        self
    }

    /// Index in the full playlist, surviving any remapping.
    pub fn stable_index(&self) -> usize {
        self.original_index.unwrap_or(self.index)
    }

    /// Copy of this fragment moved to a new dense index.
    ///
    /// The first remap records the original index; later remaps keep it.
    pub fn remapped(&self, index: usize) -> Self {
        Self {
            index,
            original_index: Some(self.stable_index()),
            ..self.clone()
        }
    }
}
