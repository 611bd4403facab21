//! Source loading.
//!
//! The resolver never touches the filesystem directly: every unit is read
//! through a [`Loader`]. An empty file is valid content; only [`NotFound`]
//! means the unit could not be read.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

/// The loader could not produce content for `path`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{} not found", .path.display())]
pub struct NotFound {
    pub path: PathBuf,
}

/// Reads source units for a compilation session.
pub trait Loader {
    fn read(&self, path: &Path) -> Result<String, NotFound>;

    /// Key identifying a unit for cycle and diamond detection.
    fn canonical(&self, path: &Path) -> PathBuf {
        normalize(path)
    }
}

/// Resolve `.` and `..` components without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(out.components().next_back(), Some(Component::Normal(_)))
                    && out.pop();
                if !popped {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Reads units from disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsLoader;

impl Loader for FsLoader {
    fn read(&self, path: &Path) -> Result<String, NotFound> {
        std::fs::read_to_string(path).map_err(|err| {
            tracing::debug!(path = %path.display(), %err, "failed to read unit");
            NotFound {
                path: path.to_path_buf(),
            }
        })
    }

    fn canonical(&self, path: &Path) -> PathBuf {
        std::fs::canonicalize(path).unwrap_or_else(|_| normalize(path))
    }
}

/// Serves units from memory. Used by the wasm binding and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryLoader {
    files: HashMap<PathBuf, String>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl AsRef<Path>, content: impl Into<String>) -> Self {
        self.insert(path, content);
        self
    }

    pub fn insert(&mut self, path: impl AsRef<Path>, content: impl Into<String>) {
        self.files.insert(normalize(path.as_ref()), content.into());
    }
}

impl Loader for MemoryLoader {
    fn read(&self, path: &Path) -> Result<String, NotFound> {
        self.files
            .get(&normalize(path))
            .cloned()
            .ok_or_else(|| NotFound {
                path: path.to_path_buf(),
            })
    }
}
