//! Phantom-tagged path newtypes so a `ResultDir` can't be passed where a
//! `JobsDir` is expected by accident. A borrowed wrapper rather than an
//! unsized DST.

use std::marker::PhantomData;
use std::ops::Deref;
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug)]
pub struct Root<'a, T> {
    path: &'a Path,
    _marker: PhantomData<T>,
}

impl<'a, T> Deref for Root<'a, T> {
    type Target = Path;

    fn deref(&self) -> &Path {
        self.path
    }
}

#[derive(Clone, Debug)]
pub struct RootBuf<T> {
    path: PathBuf,
    _marker: PhantomData<T>,
}

impl<T> RootBuf<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        RootBuf {
            path: path.into(),
            _marker: PhantomData,
        }
    }

    pub fn as_root(&self) -> Root<'_, T> {
        Root {
            path: &self.path,
            _marker: PhantomData,
        }
    }

    pub fn join(&self, segment: impl AsRef<Path>) -> PathBuf {
        self.path.join(segment)
    }

    pub fn as_path_buf(&self) -> &PathBuf {
        &self.path
    }
}

impl<T> Deref for RootBuf<T> {
    type Target = Path;

    fn deref(&self) -> &Path {
        &self.path
    }
}

impl<T> AsRef<Path> for RootBuf<T> {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

/// Marker types for the result-run directory tree.
pub mod markers {
    pub struct ResultDir;
    pub struct JobsDir;
    pub struct WorkingDir;
    pub struct BestJobsDir;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_buf_joins_like_a_path() {
        let root: RootBuf<markers::ResultDir> = RootBuf::new("/tmp/run");
        assert_eq!(
            root.join("status.json"),
            std::path::PathBuf::from("/tmp/run/status.json")
        );
    }

    #[test]
    fn as_root_derefs_to_the_same_path() {
        let root: RootBuf<markers::ResultDir> = RootBuf::new("/tmp/run");
        assert_eq!(&*root.as_root(), std::path::Path::new("/tmp/run"));
    }
}
