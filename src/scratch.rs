use std::fs;
use std::io;
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::TransferError;

/// Local staging directory for read files between download and upload.
#[derive(Debug, Clone)]
pub struct Scratch {
    root: Utf8PathBuf,
}

impl Scratch {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn ensure_root(&self) -> Result<(), TransferError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| TransferError::Filesystem(err.to_string()))
    }

    /// Scratch path for a destination filename. Only plain file names are accepted.
    pub fn path_for(&self, filename: &str) -> Result<Utf8PathBuf, TransferError> {
        let is_plain = !filename.is_empty()
            && filename != "."
            && filename != ".."
            && !filename.contains(['/', '\\'])
            && !filename.chars().any(|ch| ch.is_control());
        if !is_plain {
            return Err(TransferError::InvalidFilename(filename.to_string()));
        }
        Ok(self.root.join(filename))
    }

    /// A file counts as downloaded once it exists with a non-zero size.
    pub fn is_downloaded(&self, path: &Utf8Path) -> bool {
        fs::metadata(path.as_std_path())
            .map(|meta| meta.is_file() && meta.len() > 0)
            .unwrap_or(false)
    }

    /// Runs `fetch` against a temporary file in the scratch root and moves the
    /// result to `dest` only when it succeeds.
    pub fn fetch_atomic<F>(&self, dest: &Utf8Path, fetch: F) -> Result<u64, TransferError>
    where
        F: FnOnce(&Path) -> Result<(), TransferError>,
    {
        self.ensure_root()?;
        let temp = tempfile::Builder::new()
            .prefix(".bcm-transfer-part")
            .tempfile_in(self.root.as_std_path())
            .map_err(|err| TransferError::Filesystem(err.to_string()))?;
        fetch(temp.path())?;
        let size = fs::metadata(temp.path())
            .map_err(|err| TransferError::Filesystem(err.to_string()))?
            .len();
        temp.persist(dest.as_std_path())
            .map_err(|err| TransferError::Filesystem(err.to_string()))?;
        Ok(size)
    }

    /// Deletes a scratch file. Returns `false` when it was already gone.
    pub fn remove(&self, path: &Utf8Path) -> Result<bool, TransferError> {
        match fs::remove_file(path.as_std_path()) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(TransferError::Filesystem(format!("remove {path}: {err}"))),
        }
    }
}
