//! Segment and output filename generation.

use std::path::Path;

use crate::error::{Error, Result};
use crate::playlist::Fragment;

/// Validate and sanitize a filename by removing or replacing invalid characters.
///
/// Returns an error if the filename contains path traversal patterns.
pub fn sanitize_filename(name: &str) -> Result<String> {
    // Reject path traversal attempts
    if name.contains("..") {
        return Err(Error::InvalidSegmentName(format!(
            "Path traversal detected: '{}'",
            name
        )));
    }

    if name.contains('/') || name.contains('\\') {
        return Err(Error::InvalidSegmentName(format!(
            "Path separators not allowed in filename: '{}'",
            name
        )));
    }

    if name.contains('\0') {
        return Err(Error::InvalidSegmentName(format!(
            "Null bytes not allowed in filename: '{}'",
            name
        )));
    }

    let sanitized: String = name
        .chars()
        .map(|c| match c {
            ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.trim().is_empty() {
        return Err(Error::InvalidSegmentName(
            "Filename cannot be empty or whitespace-only".to_string(),
        ));
    }

    Ok(sanitized)
}

/// Sanitize a path component (group or title) by replacing rather than
/// rejecting separators.
pub fn sanitize_path_component(name: &str) -> Result<String> {
    if name.contains("..") {
        return Err(Error::InvalidSegmentName(format!(
            "Path traversal detected: '{}'",
            name
        )));
    }

    if name.contains('\0') {
        return Err(Error::InvalidSegmentName(format!(
            "Null bytes not allowed: '{}'",
            name
        )));
    }

    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.trim().is_empty() {
        return Err(Error::InvalidSegmentName(
            "Path component cannot be empty or whitespace-only".to_string(),
        ));
    }

    Ok(sanitized)
}

/// File name for one fragment, unique within its group.
///
/// `{NNNNN}_{last path component}`, where `NNNNN` is the fragment's stable
/// playlist index. Names without an extension get `.ts`.
pub fn segment_file_name(fragment: &Fragment) -> String {
    let index = fragment.stable_index();

    let last = url::Url::parse(&fragment.url)
        .ok()
        .and_then(|url| {
            url.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|name| !name.is_empty())
        .and_then(|name| sanitize_filename(&name).ok())
        .unwrap_or_else(|| format!("segment_{}", index));

    let last = if last.contains('.') {
        last
    } else {
        format!("{}.ts", last)
    };

    format!("{:05}_{}", index, last)
}

/// Full store name `{group}/{file}` for a fragment.
pub fn segment_name(group: &str, fragment: &Fragment) -> String {
    format!("{}/{}", group, segment_file_name(fragment))
}

/// Default segment group for an engine run without an explicit directory.
pub fn generate_group_name() -> String {
    let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H-%M-%S%.3f");
    format!("m3u8_segments_{}", timestamp)
}

/// Ensure an output filename ends in the given extension.
pub fn with_extension(name: &str, ext: &str) -> String {
    let suffix = format!(".{}", ext);
    if name.to_lowercase().ends_with(&suffix) {
        name.to_string()
    } else {
        format!("{}{}", name, suffix)
    }
}

/// Generate a unique filename by appending a number if the file exists.
pub fn make_unique_filename(path: &Path) -> std::path::PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let parent = path.parent().unwrap_or(Path::new("."));

    let mut counter = 1;
    loop {
        let new_name = if ext.is_empty() {
            format!("{}_{}", stem, counter)
        } else {
            format!("{}_{}.{}", stem, counter, ext)
        };

        let new_path = parent.join(&new_name);
        if !new_path.exists() {
            return new_path;
        }

        counter += 1;
        if counter > 1000 {
            // Safety limit
            return new_path;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_filename_valid() {
        assert_eq!(sanitize_filename("seg.ts").unwrap(), "seg.ts");
        assert_eq!(sanitize_filename("seg:1.ts").unwrap(), "seg_1.ts");
    }

    #[test]
    fn test_sanitize_filename_path_traversal() {
        assert!(sanitize_filename("../etc/passwd").is_err());
        assert!(sanitize_filename("foo/../bar").is_err());
        assert!(sanitize_filename("a/b.ts").is_err());
        assert!(sanitize_filename("").is_err());
    }

    #[test]
    fn test_sanitize_path_component() {
        assert_eq!(sanitize_path_component("My Show: Ep/1").unwrap(), "My Show_ Ep_1");
        assert!(sanitize_path_component("../evil").is_err());
    }

    #[test]
    fn test_segment_file_name_uses_url_path() {
        let fragment = Fragment::new(3, "https://cdn.example.com/hls/seg-3.ts?token=abc");
        assert_eq!(segment_file_name(&fragment), "00003_seg-3.ts");
    }

    #[test]
    fn test_segment_file_name_adds_extension() {
        let fragment = Fragment::new(1, "https://cdn.example.com/hls/chunk1");
        assert_eq!(segment_file_name(&fragment), "00001_chunk1.ts");
    }

    #[test]
    fn test_segment_file_name_falls_back_to_index() {
        let fragment = Fragment::new(12, "https://cdn.example.com/");
        assert_eq!(segment_file_name(&fragment), "00012_segment_12.ts");
    }

    #[test]
    fn test_segment_file_name_is_stable_across_remap() {
        let fragment = Fragment::new(40, "https://cdn.example.com/a.ts");
        let remapped = fragment.remapped(0);
        assert_eq!(segment_file_name(&fragment), segment_file_name(&remapped));
        assert_eq!(segment_name("g", &remapped), "g/00040_a.ts");
    }

    #[test]
    fn test_with_extension() {
        assert_eq!(with_extension("movie", "ts"), "movie.ts");
        assert_eq!(with_extension("movie.TS", "ts"), "movie.TS");
    }
}
