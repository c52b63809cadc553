//! A thin wrapper over `std::fs`. Exists so call sites name one type
//! (`Fs`) instead of scattering bare `std::fs` calls, and so tests can see
//! every filesystem touch point in one place.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, Default)]
pub struct Fs;

impl Fs {
    pub fn new() -> Self {
        Fs
    }

    pub fn create_dir_all(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)
            .with_context(|| format!("creating directory {}", path.display()))
    }

    pub fn remove_dir_all(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        match std::fs::remove_dir_all(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                Err(e).with_context(|| format!("removing directory {}", path.display()))
            }
        }
    }

    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        path.as_ref().exists()
    }

    pub fn read_to_string(&self, path: impl AsRef<Path>) -> Result<String> {
        let path = path.as_ref();
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
    }

    pub fn write(&self, path: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> Result<()> {
        let path = path.as_ref();
        std::fs::write(path, contents).with_context(|| format!("writing {}", path.display()))
    }

    /// Recursively copies `src` into `dst` (creating `dst`), used when
    /// snapshotting a job's working directory into `best_jobs/`.
    pub fn copy_dir_all(&self, src: impl AsRef<Path>, dst: impl AsRef<Path>) -> Result<()> {
        let src = src.as_ref();
        let dst = dst.as_ref();
        self.create_dir_all(dst)?;
        for entry in std::fs::read_dir(src)
            .with_context(|| format!("reading directory {}", src.display()))?
        {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let dst_path = dst.join(entry.file_name());
            if file_type.is_dir() {
                self.copy_dir_all(entry.path(), dst_path)?;
            } else {
                std::fs::copy(entry.path(), &dst_path).with_context(|| {
                    format!("copying {} to {}", entry.path().display(), dst_path.display())
                })?;
            }
        }
        Ok(())
    }

    /// Lists the immediate subdirectories of `dir`, or an empty vec if
    /// `dir` doesn't exist yet.
    pub fn list_dirs(&self, dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        let dir = dir.as_ref();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        for entry in std::fs::read_dir(dir)
            .with_context(|| format!("reading directory {}", dir.display()))?
        {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                out.push(entry.path());
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_dir_all_preserves_nested_structure() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let fs = Fs::new();
        fs.create_dir_all(src.path().join("nested")).unwrap();
        fs.write(src.path().join("nested/a.txt"), b"hello").unwrap();

        fs.copy_dir_all(src.path(), dst.path().join("copy")).unwrap();

        assert_eq!(
            fs.read_to_string(dst.path().join("copy/nested/a.txt")).unwrap(),
            "hello"
        );
    }

    #[test]
    fn remove_dir_all_tolerates_missing_directory() {
        let fs = Fs::new();
        assert!(fs.remove_dir_all("/nonexistent/definitely/not/here").is_ok());
    }
}
