//! Upload collaborator. Only file metadata crosses into the engine.

use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::{EngineError, Result};
use crate::fields::UploaderRole;
use crate::task::FileDescriptor;

pub trait FileStore {
    fn upload(&self, paths: &[PathBuf], role: UploaderRole) -> Result<Vec<FileDescriptor>>;
}

/// Describes local files by their metadata; the contents are never read.
pub struct LocalFileStore;

impl FileStore for LocalFileStore {
    fn upload(&self, paths: &[PathBuf], role: UploaderRole) -> Result<Vec<FileDescriptor>> {
        paths.iter().map(|p| describe(p, role)).collect()
    }
}

fn describe(path: &Path, role: UploaderRole) -> Result<FileDescriptor> {
    let meta = std::fs::metadata(path)
        .map_err(|e| EngineError::InvalidArgument(format!("cannot attach {}: {e}", path.display())))?;
    if !meta.is_file() {
        return Err(EngineError::InvalidArgument(format!("{} is not a file", path.display())));
    }
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("attachment")
        .to_string();
    let url = std::fs::canonicalize(path)
        .map(|abs| format!("file://{}", abs.display()))
        .unwrap_or_else(|_| format!("file://{}", path.display()));
    Ok(FileDescriptor {
        content_type: content_type_for(&name).to_string(),
        name,
        url,
        size_bytes: meta.len(),
        uploaded_by: role,
        uploaded_at: Utc::now(),
    })
}

/// Guess a content type from the extension.
pub fn content_type_for(name: &str) -> &'static str {
    let ext = name.rsplit_once('.').map(|(_, e)| e.to_lowercase()).unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "txt" | "md" => "text/plain",
        "csv" => "text/csv",
        "zip" => "application/zip",
        "doc" | "docx" => "application/msword",
        "xls" | "xlsx" => "application/vnd.ms-excel",
        _ => "application/octet-stream",
    }
}
