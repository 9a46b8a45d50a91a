//! Request-scoped temp file store.
//!
//! Every request gets its own randomly named directory under the configured
//! upload root. Uploads, intermediate files and the final artifact all live
//! there, and the whole directory is removed when the [`RequestWorkspace`] is
//! dropped: on success after the download stream finishes, on any error when
//! the handler returns, and on panic during unwinding. Requests never share a
//! directory, so concurrent requests cannot see or delete each other's files.

use crate::error::ToolifyError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};
use uuid::Uuid;

static UNSAFE_NAME_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]+").expect("valid regex"));

const MAX_NAME_LEN: usize = 100;

/// A file received from the client and stored in a request workspace.
#[derive(Debug, Clone)]
pub struct Upload {
    /// Collision-resistant on-disk name: `<uuid>-<sanitised original>`.
    pub storage_name: String,
    /// File name as sent by the client.
    pub original_name: String,
    /// Declared MIME type, or a guess from the file name when none was sent.
    pub content_type: String,
    /// Bytes written to disk.
    pub size: u64,
    /// Absolute path inside the workspace.
    pub path: PathBuf,
}

impl Upload {
    /// Original name without its extension, sanitised for reuse in download names.
    pub fn stem(&self) -> String {
        let stem = Path::new(&self.original_name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let clean = sanitize_file_name(&stem);
        if clean.is_empty() {
            "file".to_string()
        } else {
            clean
        }
    }

    /// Lower-cased extension of the original name, if any.
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.original_name)
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
    }
}

/// Owns one request's working directory and deletes it on drop.
#[derive(Debug)]
pub struct RequestWorkspace {
    dir: Option<TempDir>,
}

impl RequestWorkspace {
    /// Create a fresh directory under `root`.
    pub fn create(root: &Path) -> Result<Self, ToolifyError> {
        let dir = tempfile::Builder::new()
            .prefix("req-")
            .tempdir_in(root)
            .map_err(|e| ToolifyError::io("create request workspace", e))?;
        debug!("Created workspace {}", dir.path().display());
        Ok(Self { dir: Some(dir) })
    }

    pub fn path(&self) -> &Path {
        match &self.dir {
            Some(dir) => dir.path(),
            // `dir` is only taken in `drop`.
            None => Path::new(""),
        }
    }

    /// Reserve a storage name and path for an incoming upload.
    pub fn storage_path(&self, original_name: &str) -> (String, PathBuf) {
        let storage_name = storage_name_for(original_name);
        let path = self.path().join(&storage_name);
        (storage_name, path)
    }

    /// Path for a file the request produces itself.
    pub fn file(&self, name: &str) -> PathBuf {
        self.path().join(name)
    }

    /// Create (if needed) and return a sub-directory, e.g. a tool's output dir.
    pub fn subdir(&self, name: &str) -> Result<PathBuf, ToolifyError> {
        let dir = self.path().join(name);
        std::fs::create_dir_all(&dir).map_err(|e| ToolifyError::io("create work directory", e))?;
        Ok(dir)
    }
}

impl Drop for RequestWorkspace {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            let path = dir.path().to_path_buf();
            match dir.close() {
                Ok(()) => debug!("Removed workspace {}", path.display()),
                Err(e) => warn!("Failed to remove workspace {}: {}", path.display(), e),
            }
        }
    }
}

/// Reduce a client-supplied file name to a safe, bounded single path component.
pub fn sanitize_file_name(name: &str) -> String {
    // Browsers on Windows may send a full path.
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let clean = UNSAFE_NAME_CHARS.replace_all(base, "_");
    let clean = clean.trim_matches(|c| c == '.' || c == '_');
    clean.chars().take(MAX_NAME_LEN).collect()
}

fn storage_name_for(original_name: &str) -> String {
    let clean = sanitize_file_name(original_name);
    if clean.is_empty() {
        Uuid::new_v4().to_string()
    } else {
        format!("{}-{}", Uuid::new_v4(), clean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_paths_and_odd_characters() {
        assert_eq!(sanitize_file_name("report.pdf"), "report.pdf");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\Users\\me\\my file (1).pdf"), "my_file_1_.pdf");
        assert_eq!(sanitize_file_name(".."), "");
        assert_eq!(sanitize_file_name(&"a".repeat(300)).len(), MAX_NAME_LEN);
    }

    #[test]
    fn storage_names_do_not_collide() {
        let a = storage_name_for("scan.png");
        let b = storage_name_for("scan.png");
        assert_ne!(a, b);
        assert!(a.ends_with("-scan.png"));
    }

    #[test]
    fn workspace_is_removed_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let path = {
            let ws = RequestWorkspace::create(root.path()).unwrap();
            let (_, file) = ws.storage_path("a.txt");
            std::fs::write(&file, b"hello").unwrap();
            ws.subdir("out").unwrap();
            ws.path().to_path_buf()
        };
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn upload_stem_and_extension() {
        let upload = Upload {
            storage_name: "x".into(),
            original_name: "Holiday Photo.JPG".into(),
            content_type: "image/jpeg".into(),
            size: 0,
            path: PathBuf::new(),
        };
        assert_eq!(upload.stem(), "Holiday_Photo");
        assert_eq!(upload.extension().as_deref(), Some("jpg"));
    }
}
