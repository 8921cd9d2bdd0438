//! File-name resolution for probed resources.
//!
//! Order of preference: the `Content-Disposition` header, then the last
//! path segment of the URL (query and fragment stripped), then
//! `download_<unix millis>`.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::Utc;
use regex::Regex;

fn disposition_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // filename*=UTF-8''name takes precedence over filename="name"
        Regex::new(r#"(?i)filename\*\s*=\s*(?:[\w-]+'[\w-]*')?([^;]+)|filename\s*=\s*"?([^";]+)"?"#)
            .expect("disposition pattern is valid")
    })
}

/// Extracts a file name from a `Content-Disposition` value.
pub fn filename_from_disposition(value: &str) -> Option<String> {
    let pattern = disposition_pattern();

    let mut plain = None;
    for captures in pattern.captures_iter(value) {
        if let Some(extended) = captures.get(1) {
            return sanitize(extended.as_str());
        }
        if plain.is_none() {
            plain = captures.get(2).and_then(|m| sanitize(m.as_str()));
        }
    }
    plain
}

/// Extracts the last path segment of a URL.
pub fn filename_from_url(url: &str) -> Option<String> {
    let without_fragment = url.split('#').next().unwrap_or(url);
    let without_query = without_fragment.split('?').next().unwrap_or(without_fragment);

    let path = match without_query.find("://") {
        Some(pos) => {
            let after_scheme = &without_query[pos + 3..];
            after_scheme.find('/').map(|slash| &after_scheme[slash..])?
        }
        None => without_query,
    };

    path.rsplit('/').next().and_then(sanitize)
}

/// Resolves a file name for `url`, never returning an empty name.
pub fn resolve_filename(content_disposition: Option<&str>, url: &str) -> String {
    content_disposition
        .and_then(filename_from_disposition)
        .or_else(|| filename_from_url(url))
        .unwrap_or_else(|| format!("download_{}", Utc::now().timestamp_millis()))
}

/// Final path for a download written to `output`.
///
/// When `output` is an existing directory, or ends in a separator, the
/// resolved `filename` is joined onto it; otherwise `output` is the file.
pub fn resolve_destination(output: &Path, filename: &str) -> PathBuf {
    let names_directory = output.is_dir()
        || output
            .as_os_str()
            .to_string_lossy()
            .ends_with(std::path::MAIN_SEPARATOR);
    if names_directory {
        output.join(filename)
    } else {
        output.to_path_buf()
    }
}

fn sanitize(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_matches('"');
    let name = trimmed
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(trimmed)
        .trim();
    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disposition_quoted() {
        assert_eq!(
            filename_from_disposition(r#"attachment; filename="report.pdf""#),
            Some("report.pdf".to_string())
        );
    }

    #[test]
    fn test_disposition_unquoted() {
        assert_eq!(
            filename_from_disposition("attachment; filename=data.csv"),
            Some("data.csv".to_string())
        );
    }

    #[test]
    fn test_disposition_extended_wins() {
        assert_eq!(
            filename_from_disposition(
                r#"attachment; filename="fallback.bin"; filename*=UTF-8''real.bin"#
            ),
            Some("real.bin".to_string())
        );
    }

    #[test]
    fn test_disposition_strips_path() {
        assert_eq!(
            filename_from_disposition(r#"attachment; filename="../../etc/passwd""#),
            Some("passwd".to_string())
        );
    }

    #[test]
    fn test_url_last_segment() {
        assert_eq!(
            filename_from_url("https://cdn.example.com/files/video.mp4?token=abc#t=10"),
            Some("video.mp4".to_string())
        );
    }

    #[test]
    fn test_url_without_path() {
        assert_eq!(filename_from_url("https://example.com"), None);
        assert_eq!(filename_from_url("https://example.com/"), None);
    }

    #[test]
    fn test_resolve_fallback() {
        let name = resolve_filename(None, "https://example.com/");
        assert!(name.starts_with("download_"), "{}", name);
    }

    #[test]
    fn test_resolve_prefers_disposition() {
        assert_eq!(
            resolve_filename(
                Some("inline; filename=a.txt"),
                "https://example.com/b.txt"
            ),
            "a.txt"
        );
    }

    #[test]
    fn test_destination_in_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        assert_eq!(
            resolve_destination(dir.path(), "a.iso"),
            dir.path().join("a.iso")
        );

        let file = dir.path().join("named.iso");
        assert_eq!(resolve_destination(&file, "a.iso"), file);
    }
}
