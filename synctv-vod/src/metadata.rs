use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

use crate::capabilities::StreamCapabilities;
use crate::config::StorageConfig;
use crate::error::{Result, StreamError};
use crate::file::{FileAccess, PrivateViewAccess};
use crate::format::MediaFormat;

/// What a play request knows about a media file: at least its name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartialMetadata {
    pub file_name: String,
}

impl PartialMetadata {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
        }
    }
}

/// Fully resolved description of a media file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamMetadata {
    pub file_name: String,
    pub media_full_path: PathBuf,
    pub seek_file_path: Option<PathBuf>,
    pub format: String,
    pub file_size: u64,
    pub duration_ms: u64,
    pub frame_count: u32,
    pub has_time_index: bool,
    pub capabilities: StreamCapabilities,
}

/// Resolve `file_name` under `media_root`. Only plain relative names are
/// accepted so a request can never reach outside the media root.
pub fn resolve_media_path(media_root: &Path, file_name: &str) -> Result<PathBuf> {
    let relative = Path::new(file_name);
    if file_name.is_empty() {
        return Err(StreamError::MetadataResolution("empty file name".to_string()));
    }

    let mut resolved = media_root.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(StreamError::MetadataResolution(format!(
                    "file name {file_name:?} escapes the media root"
                )));
            }
        }
    }
    Ok(resolved)
}

/// Derive complete metadata from a partial description.
///
/// Reads the index through private views so the shared file cache is not
/// touched, and does not depend on any engine state.
pub fn resolve_complete_metadata(
    format: &dyn MediaFormat,
    storage: &StorageConfig,
    partial: &PartialMetadata,
) -> Result<StreamMetadata> {
    let media_full_path = resolve_media_path(&storage.media_root, &partial.file_name)?;

    let data = PrivateViewAccess
        .open(&media_full_path, storage.window_size)
        .map_err(|e| StreamError::MetadataResolution(e.to_string()))?;

    let seek_file_path = format
        .seek_file_path(&media_full_path)
        .filter(|path| path.is_file());
    let seek = seek_file_path
        .as_deref()
        .map(|path| PrivateViewAccess.open(path, storage.window_size))
        .transpose()
        .map_err(|e| StreamError::MetadataResolution(e.to_string()))?;

    let index = format.load_index(&data, seek.as_ref()).map_err(|e| {
        StreamError::MetadataResolution(format!("{}: {e}", media_full_path.display()))
    })?;

    let metadata = StreamMetadata {
        file_name: partial.file_name.clone(),
        file_size: data.len(),
        seek_file_path,
        format: format.name().to_string(),
        duration_ms: index.duration_ms(),
        frame_count: index.frame_count(),
        has_time_index: index.time_index().is_some(),
        capabilities: index.capabilities().clone(),
        media_full_path,
    };

    tracing::debug!(
        file = %metadata.file_name,
        frames = metadata.frame_count,
        duration_ms = metadata.duration_ms,
        "Resolved media metadata"
    );

    Ok(metadata)
}
