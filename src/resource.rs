//! Song references held by the playlist

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{EngineError, Result};

const FILE_SCHEME: &str = "file://";

/// A playable song.
///
/// Two references are the same song when they compare equal, so the
/// playlist can find the selected song again after reordering.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SongResource {
    /// A MIDI file on disk
    File(PathBuf),
    /// A `file://` URL; other schemes fail to load
    Url(String),
    /// MIDI bytes already in memory, e.g. embedded or received from a collaborator
    Memory { name: String, data: Arc<[u8]> },
}

impl SongResource {
    pub fn file<P: Into<PathBuf>>(path: P) -> Self {
        SongResource::File(path.into())
    }

    pub fn url<S: Into<String>>(url: S) -> Self {
        SongResource::Url(url.into())
    }

    pub fn memory<S: Into<String>>(name: S, data: impl Into<Arc<[u8]>>) -> Self {
        SongResource::Memory {
            name: name.into(),
            data: data.into(),
        }
    }

    /// Empty paths, URLs and names never enter a playlist
    pub fn is_valid(&self) -> bool {
        match self {
            SongResource::File(path) => !path.as_os_str().is_empty(),
            SongResource::Url(url) => !url.trim().is_empty(),
            SongResource::Memory { name, .. } => !name.is_empty(),
        }
    }

    /// Short display name: file stem, last URL segment, or the memory name
    pub fn name(&self) -> String {
        match self {
            SongResource::File(path) => path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("Unknown")
                .to_string(),
            SongResource::Url(url) => {
                let trimmed = url.trim_end_matches('/');
                let last = trimmed.rsplit('/').next().unwrap_or(trimmed);
                let decoded = urlencoding::decode(last)
                    .map(|s| s.into_owned())
                    .unwrap_or_else(|_| last.to_string());
                Path::new(&decoded)
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .map(str::to_string)
                    .unwrap_or(decoded)
            }
            SongResource::Memory { name, .. } => name.clone(),
        }
    }

    /// Resolve the reference to raw MIDI bytes.
    pub fn read_bytes(&self) -> Result<Vec<u8>> {
        match self {
            SongResource::File(path) => {
                fs::read(path).map_err(|e| EngineError::load(self, e))
            }
            SongResource::Url(url) => {
                let path = file_url_to_path(url)?;
                fs::read(&path).map_err(|e| EngineError::load(self, e))
            }
            SongResource::Memory { data, .. } => Ok(data.to_vec()),
        }
    }
}

fn file_url_to_path(url: &str) -> Result<PathBuf> {
    let rest = url
        .strip_prefix(FILE_SCHEME)
        .ok_or_else(|| EngineError::load(url, "only file:// URLs are supported"))?;
    let decoded = urlencoding::decode(rest).map_err(|e| EngineError::load(url, e))?;
    let mut path = decoded.into_owned();
    // file:///C:/song.mid
    if cfg!(windows) && path.len() > 2 && path.starts_with('/') && path.as_bytes()[2] == b':' {
        path.remove(0);
    }
    Ok(PathBuf::from(path))
}

impl fmt::Display for SongResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SongResource::File(path) => write!(f, "{}", path.display()),
            SongResource::Url(url) => write!(f, "{}", url),
            SongResource::Memory { name, .. } => write!(f, "{}", name),
        }
    }
}

impl From<&str> for SongResource {
    fn from(s: &str) -> Self {
        if s.contains("://") {
            SongResource::Url(s.to_string())
        } else {
            SongResource::File(PathBuf::from(s))
        }
    }
}

impl From<String> for SongResource {
    fn from(s: String) -> Self {
        SongResource::from(s.as_str())
    }
}

impl From<PathBuf> for SongResource {
    fn from(path: PathBuf) -> Self {
        SongResource::File(path)
    }
}

impl From<&Path> for SongResource {
    fn from(path: &Path) -> Self {
        SongResource::File(path.to_path_buf())
    }
}

/// Whether a path looks like a standard MIDI file
pub fn is_midi_file<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref()
        .extension()
        .and_then(|s| s.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            ext == "mid" || ext == "midi" || ext == "kar"
        })
        .unwrap_or(false)
}

/// Collect the MIDI files directly inside `dir_path`, sorted by path
pub fn scan_directory<P: AsRef<Path>>(dir_path: P) -> Result<Vec<SongResource>> {
    let dir_path = dir_path.as_ref();
    if !dir_path.is_dir() {
        return Err(EngineError::InvalidArgument(format!(
            "Path is not a directory: {}",
            dir_path.display()
        )));
    }

    let mut found = Vec::new();
    for entry in fs::read_dir(dir_path)? {
        let path = entry?.path();
        if path.is_file() && is_midi_file(&path) {
            found.push(path);
        }
    }
    found.sort();
    log::debug!("Found {} MIDI files in {}", found.len(), dir_path.display());
    Ok(found.into_iter().map(SongResource::File).collect())
}
