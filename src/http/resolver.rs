use std::path::PathBuf;

use thiserror::Error;

/// File served for every route directory.
pub const PAGE_FILE: &str = "page.html";

/// Longest on-disk path the resolver will produce, exclusive.
pub const FILE_PATH_MAX_LEN: usize = 512;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("resolved path for {path} is {len} bytes, limit is {max}")]
    TooLong { path: String, len: usize, max: usize },
}

/// Maps a request path to `<routes_root><path>/page.html`.
///
/// Plain concatenation, no normalization. The path is expected to have passed the
/// parser's traversal check already.
pub fn resolve(routes_root: &str, path: &str) -> Result<PathBuf, ResolveError> {
    let resolved = format!("{routes_root}{path}/{PAGE_FILE}");
    if resolved.len() >= FILE_PATH_MAX_LEN {
        return Err(ResolveError::TooLong {
            path: path.to_string(),
            len: resolved.len(),
            max: FILE_PATH_MAX_LEN,
        });
    }
    Ok(PathBuf::from(resolved))
}
