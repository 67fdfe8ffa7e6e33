//! Loading already-parsed inputs from disk
//!
//! Text-like files are read as UTF-8 (format extraction happens upstream);
//! images are passed through by path for the vision model.

use crate::errors::IngestionError;
use ragforge_common::embeddings::ImageRef;
use ragforge_common::models::{Document, DocumentFormat};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Inputs split by ingestion path
#[derive(Debug, Default)]
pub struct Sources {
    pub documents: Vec<Document>,
    pub images: Vec<ImageRef>,
    /// Files skipped because they are not UTF-8 text
    pub skipped: Vec<PathBuf>,
}

impl Sources {
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty() && self.images.is_empty()
    }
}

fn format_of(path: &Path) -> DocumentFormat {
    path.extension()
        .and_then(|e| e.to_str())
        .map(DocumentFormat::from_extension)
        .unwrap_or(DocumentFormat::Other)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Load files and directories (recursively), in sorted path order
pub async fn load_paths(paths: &[PathBuf]) -> Result<Sources, IngestionError> {
    let mut files = Vec::new();
    let mut pending: Vec<PathBuf> = paths.to_vec();

    while let Some(path) = pending.pop() {
        let metadata = tokio::fs::metadata(&path).await.map_err(|e| read_error(&path, e))?;
        if metadata.is_dir() {
            let mut entries = tokio::fs::read_dir(&path).await.map_err(|e| read_error(&path, e))?;
            while let Some(entry) = entries.next_entry().await.map_err(|e| read_error(&path, e))? {
                pending.push(entry.path());
            }
        } else {
            files.push(path);
        }
    }
    files.sort();
    files.dedup();

    let mut sources = Sources::default();
    for path in files {
        let format = format_of(&path);
        // Canonical paths give each file a stable document id across loads
        let canonical = tokio::fs::canonicalize(&path).await.map_err(|e| read_error(&path, e))?;
        if format.is_image() {
            sources.images.push(ImageRef::from_path(&canonical));
            continue;
        }

        let bytes = tokio::fs::read(&path).await.map_err(|e| read_error(&path, e))?;
        match String::from_utf8(bytes) {
            Ok(text) => {
                debug!(path = %path.display(), ?format, "Loaded document");
                sources.documents.push(Document::from_source(
                    &canonical.display().to_string(),
                    display_name(&path),
                    format,
                    text,
                ));
            }
            Err(_) => {
                warn!(path = %path.display(), "Skipping non-UTF-8 file; parse it upstream first");
                sources.skipped.push(path);
            }
        }
    }

    Ok(sources)
}

fn read_error(path: &Path, err: std::io::Error) -> IngestionError {
    IngestionError::Read {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}
