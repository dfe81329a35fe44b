use std::path::Path;

use serde::Deserialize;
use uuid::Uuid;

/// Caller-supplied destination hints, all optional. `full_path` wins over
/// the `path` + `file_name` pair.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadTarget {
    pub full_path: Option<String>,
    pub path: Option<String>,
    pub file_name: Option<String>,
}

/// Per-format fallbacks used when the caller leaves destination parts out.
#[derive(Debug, Clone, Copy)]
pub struct FileDefaults {
    pub prefix: &'static str,
    pub ext: &'static str,
}

/// Resolved destination for one artifact. `name` is the full storage key,
/// `bucket` is the leading path segment when the key contains one.
/// Built once per request and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDescriptor {
    pub name: String,
    pub mime: String,
    pub bucket: Option<String>,
}

pub fn generate_filename(ext: &str, prefix: &str) -> String {
    format!("{prefix}{}.{ext}", Uuid::new_v4().simple())
}

pub fn mime_for(name_or_ext: &str) -> &'static str {
    let ext = Path::new(name_or_ext)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or(name_or_ext);
    match ext.to_ascii_lowercase().trim_start_matches('.') {
        "png" => "image/png",
        "pdf" => "application/pdf",
        "webm" => "video/webm",
        "mp4" => "video/mp4",
        "mp3" => "audio/mpeg",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

fn trim_separators(value: Option<&str>) -> String {
    value
        .map(|v| v.trim().trim_matches('/').to_string())
        .unwrap_or_default()
}

/// Computes the final storage key, MIME type and bucket segment for one
/// request. Deterministic whenever an explicit name is given; a random
/// filename is generated only when the caller supplies none. When no
/// destination information is present at all the result is a bare
/// generated filename with no bucket, which downstream delivers inline.
pub fn resolve(target: &UploadTarget, defaults: &FileDefaults) -> OutputDescriptor {
    let full = trim_separators(target.full_path.as_deref());
    let dir = trim_separators(target.path.as_deref());
    let mut name = trim_separators(target.file_name.as_deref());

    let candidate = if full.is_empty() {
        if name.is_empty() {
            name = generate_filename(defaults.ext, defaults.prefix);
        }
        [dir.as_str(), name.as_str()]
            .iter()
            .filter(|segment| !segment.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("/")
    } else {
        full
    };

    let has_extension = Path::new(&candidate)
        .extension()
        .map(|ext| !ext.is_empty())
        .unwrap_or(false);
    let key = if has_extension {
        candidate
    } else {
        format!("{candidate}.{}", defaults.ext)
    };

    let bucket = match key.find('/') {
        Some(slash) if slash > 0 => Some(key[..slash].to_string()),
        _ => None,
    };

    OutputDescriptor {
        mime: mime_for(&key).to_string(),
        name: key,
        bucket,
    }
}
