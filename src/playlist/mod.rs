//! Playlist module for fragment representation and parsing.

pub mod fragment;
pub mod keys;
pub mod parser;

pub use fragment::{DecryptData, Fragment};
pub use keys::{default_iv, parse_iv, parse_key};
pub use parser::{load_playlist, parse_playlist, resolve_url, LoadedPlaylist, ParsedPlaylist};
