//! M3U8 playlist parsing and loading.

use std::collections::HashMap;

use bytes::Bytes;
use m3u8_rs::{Key, KeyMethod, MediaPlaylist, Playlist};

use crate::error::{Error, Result};
use crate::fetch::{fetch_bytes, fetch_text, FetchClient};
use crate::playlist::fragment::{DecryptData, Fragment};
use crate::playlist::keys::parse_iv;

/// Result of parsing one playlist document.
#[derive(Debug, Clone)]
pub enum ParsedPlaylist {
    /// Master playlist; the best variant must be fetched next.
    Master { variant_url: String },
    /// Media playlist with its fragments.
    Media { fragments: Vec<Fragment> },
}

/// A fully loaded media playlist.
#[derive(Debug, Clone)]
pub struct LoadedPlaylist {
    /// URL of the media playlist the fragments came from.
    pub url: String,
    pub fragments: Vec<Fragment>,
}

impl LoadedPlaylist {
    /// Total duration in seconds.
    pub fn duration(&self) -> f64 {
        self.fragments.iter().map(|f| f.duration).sum()
    }
}

/// Parse playlist text fetched from `base_url`.
pub fn parse_playlist(base_url: &str, content: &[u8]) -> Result<ParsedPlaylist> {
    let playlist = m3u8_rs::parse_playlist_res(content)
        .map_err(|e| Error::M3U8(format!("Failed to parse playlist: {:?}", e)))?;

    match playlist {
        Playlist::MasterPlaylist(master) => {
            // Select highest quality variant
            let variant = master
                .variants
                .iter()
                .filter(|v| !v.is_i_frame)
                .max_by_key(|v| v.bandwidth)
                .ok_or_else(|| Error::M3U8("No variants in master playlist".into()))?;

            Ok(ParsedPlaylist::Master {
                variant_url: resolve_url(base_url, &variant.uri)?,
            })
        }
        Playlist::MediaPlaylist(media) => Ok(ParsedPlaylist::Media {
            fragments: extract_fragments(base_url, &media)?,
        }),
    }
}

/// Fetch a playlist, follow one master→media hop, and fetch key material.
pub async fn load_playlist(client: &dyn FetchClient, url: &str) -> Result<LoadedPlaylist> {
    let content = fetch_text(client, url).await?;

    let (media_url, fragments) = match parse_playlist(url, content.as_bytes())? {
        ParsedPlaylist::Media { fragments } => (url.to_string(), fragments),
        ParsedPlaylist::Master { variant_url } => {
            tracing::debug!("Master playlist, following variant {}", variant_url);
            let media_content = fetch_text(client, &variant_url).await?;
            match parse_playlist(&variant_url, media_content.as_bytes())? {
                ParsedPlaylist::Media { fragments } => (variant_url, fragments),
                ParsedPlaylist::Master { .. } => {
                    return Err(Error::M3U8("Expected media playlist".into()))
                }
            }
        }
    };

    if fragments.is_empty() {
        return Err(Error::M3U8("No segments found in playlist".into()));
    }

    let fragments = fill_keys(client, fragments).await?;

    Ok(LoadedPlaylist {
        url: media_url,
        fragments,
    })
}

/// Fetch every distinct key URI once and attach the bytes to its fragments.
async fn fill_keys(client: &dyn FetchClient, mut fragments: Vec<Fragment>) -> Result<Vec<Fragment>> {
    let mut cache: HashMap<String, Bytes> = HashMap::new();

    for fragment in fragments.iter_mut() {
        let Some(data) = fragment.decryptdata.as_mut() else {
            continue;
        };
        let Some(uri) = data.uri.clone() else {
            continue;
        };

        let key = match cache.get(&uri) {
            Some(key) => key.clone(),
            None => {
                tracing::debug!("Fetching key {}", uri);
                let key = fetch_bytes(client, &uri).await?;
                cache.insert(uri, key.clone());
                key
            }
        };
        data.key = Some(key.to_vec());
    }

    Ok(fragments)
}

/// Build fragments from a media playlist.
///
/// `#EXT-X-KEY` applies to every following segment until the next key tag.
fn extract_fragments(base_url: &str, playlist: &MediaPlaylist) -> Result<Vec<Fragment>> {
    let mut current_key: Option<DecryptData> = None;
    let mut fragments = Vec::with_capacity(playlist.segments.len());

    for (i, segment) in playlist.segments.iter().enumerate() {
        if let Some(key) = &segment.key {
            current_key = decrypt_data_from_key(base_url, key)?;
        }

        let url = resolve_url(base_url, &segment.uri)?;
        let mut fragment = Fragment::new(i, url).with_duration(segment.duration as f64);
        fragment.sn = playlist.media_sequence + i as u64;
        fragment.encrypted = current_key.is_some();
        fragment.decryptdata = current_key.clone();
        fragments.push(fragment);
    }

    Ok(fragments)
}

fn decrypt_data_from_key(base_url: &str, key: &Key) -> Result<Option<DecryptData>> {
    let method = match &key.method {
        KeyMethod::None => return Ok(None),
        KeyMethod::AES128 => "AES-128".to_string(),
        KeyMethod::SampleAES => "SAMPLE-AES".to_string(),
        KeyMethod::Other(other) => other.clone(),
    };

    let uri = key
        .uri
        .as_deref()
        .map(|uri| resolve_url(base_url, uri))
        .transpose()?;
    let iv = key.iv.as_deref().map(parse_iv).transpose()?;

    Ok(Some(DecryptData {
        method,
        uri,
        key: None,
        iv,
    }))
}

/// Resolve a potentially relative URL against a base URL.
pub fn resolve_url(base: &str, path: &str) -> Result<String> {
    if path.starts_with("http://") || path.starts_with("https://") {
        return Ok(path.to_string());
    }

    let base_url = url::Url::parse(base)?;
    let resolved = base_url.join(path)?;
    Ok(resolved.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockFetchClient, Outcome};

    const BASE: &str = "https://cdn.example.com/video/index.m3u8";

    const MEDIA: &str = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:10
#EXT-X-MEDIA-SEQUENCE:100
#EXTINF:9.5,
seg0.ts
#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\"
#EXTINF:10.0,
seg1.ts
#EXTINF:4.25,
https://other.example.com/seg2.ts
#EXT-X-ENDLIST
";

    const MASTER: &str = "#EXTM3U
#EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=640x360
low/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=2400000,RESOLUTION=1280x720
high/index.m3u8
";

    #[test]
    fn test_media_playlist_fragments() {
        let parsed = parse_playlist(BASE, MEDIA.as_bytes()).unwrap();
        let ParsedPlaylist::Media { fragments } = parsed else {
            panic!("expected media playlist");
        };

        assert_eq!(fragments.len(), 3);
        assert_eq!(fragments[0].url, "https://cdn.example.com/video/seg0.ts");
        assert_eq!(fragments[2].url, "https://other.example.com/seg2.ts");
        assert_eq!(fragments[0].sn, 100);
        assert_eq!(fragments[2].sn, 102);
        assert!((fragments[0].duration - 9.5).abs() < 1e-6);

        assert!(!fragments[0].encrypted);
        assert!(fragments[1].encrypted);
        assert!(fragments[2].encrypted);
        let key = fragments[2].decryptdata.as_ref().unwrap();
        assert_eq!(key.method, "AES-128");
        assert_eq!(key.uri.as_deref(), Some("https://cdn.example.com/video/key.bin"));
    }

    #[test]
    fn test_master_playlist_picks_highest_bandwidth() {
        let parsed = parse_playlist(BASE, MASTER.as_bytes()).unwrap();
        match parsed {
            ParsedPlaylist::Master { variant_url } => {
                assert_eq!(variant_url, "https://cdn.example.com/video/high/index.m3u8")
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_resolve_url() {
        assert_eq!(
            resolve_url("https://a.com/x/y.m3u8", "../z.ts").unwrap(),
            "https://a.com/z.ts"
        );
        assert_eq!(
            resolve_url("https://a.com/x/y.m3u8", "https://b.com/c.ts").unwrap(),
            "https://b.com/c.ts"
        );
    }

    #[tokio::test]
    async fn test_load_playlist_follows_master_and_fetches_key_once() {
        let client = MockFetchClient::new();
        client.script(BASE, vec![Outcome::body(MASTER)]);
        client.script(
            "https://cdn.example.com/video/high/index.m3u8",
            vec![Outcome::body(MEDIA)],
        );
        client.script(
            "https://cdn.example.com/video/high/key.bin",
            vec![Outcome::body(vec![9u8; 16])],
        );

        let loaded = load_playlist(&client, BASE).await.unwrap();
        assert_eq!(loaded.url, "https://cdn.example.com/video/high/index.m3u8");
        assert_eq!(loaded.fragments.len(), 3);
        assert_eq!(
            loaded.fragments[1].decryptdata.as_ref().unwrap().key,
            Some(vec![9u8; 16])
        );
        assert_eq!(
            client.request_count("https://cdn.example.com/video/high/key.bin"),
            1
        );
        assert!((loaded.duration() - 23.75).abs() < 1e-6);
    }
}
