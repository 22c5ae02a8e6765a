use percent_encoding::percent_decode_str;
use reqwest::header::{self, HeaderMap};
use reqwest::Url;
use std::error::Error;
use std::path::Path;

/// Extracts filesize from path, if file does not exist or read fails the function returns 0
pub async fn file_size(fpath: &Path) -> u64 {
    match tokio::fs::metadata(fpath).await {
        Ok(metadata) => metadata.len(),
        _ => 0,
    }
}
pub const HALF_SECOND: std::time::Duration = std::time::Duration::from_millis(500);
pub type TestResult<T> = std::result::Result<T, Box<dyn Error>>;

/**
 * Parses the filename from the download URL
 * Returns None if there is no filename or if url.path_segments() fails
 */
pub fn parse_filename(url: &Url) -> Option<&str> {
    let segments = url.path_segments()?;
    let filename = segments.last()?;
    if filename.is_empty() {
        None
    } else {
        Some(filename)
    }
}

/**
 * Reads the suggested filename out of a Content-Disposition header.
 * `filename*=UTF-8''name` wins over `filename=name`, surrounding quotes are removed and
 * any directory components are dropped so the name can't escape the download directory.
 */
pub fn parse_content_disposition(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::CONTENT_DISPOSITION)?.to_str().ok()?;
    let mut plain = None;
    let mut extended = None;
    for param in value.split(';').map(str::trim) {
        let Some((key, val)) = param.split_once('=') else {
            continue;
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "filename*" => {
                // charset'language'value
                let encoded = val.trim().trim_matches('"').rsplit('\'').next().unwrap_or_default();
                extended = percent_decode_str(encoded)
                    .decode_utf8()
                    .ok()
                    .map(|name| name.into_owned());
            }
            "filename" => plain = Some(val.trim().trim_matches('"').to_owned()),
            _ => {}
        }
    }
    let name = extended.or(plain)?;
    let name = name.rsplit(['/', '\\']).next()?.trim();
    if name.is_empty() || name == "." || name == ".." {
        None
    } else {
        Some(name.to_owned())
    }
}

pub fn kb(bytes: u64) -> f64 {
    bytes as f64 / 1024.0
}

pub fn mb(bytes: u64) -> f64 {
    bytes as f64 / 1024.0 / 1024.0
}

pub fn gb(bytes: u64) -> f64 {
    bytes as f64 / 1024.0 / 1024.0 / 1024.0
}
