use crate::error::Result;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

const INDEX_DIR_NAME: &str = "page-rag";

/// The three files that make up one document's index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPaths {
    pub vectors: PathBuf,
    pub ids: PathBuf,
    pub metadata: PathBuf,
}

impl IndexPaths {
    /// Paths for `document` embedded with `model`, named after a hash of the
    /// document's absolute path so different models never collide.
    pub fn for_document(index_dir: &Path, document: &Path, model: &str) -> Result<Self> {
        let absolute = absolute_path(document)?;
        Ok(Self::from_base(&index_dir.join(index_base_name(&absolute, model))))
    }

    pub fn from_base(base: &Path) -> Self {
        let with_suffix = |suffix: &str| {
            let mut name = base.as_os_str().to_owned();
            name.push(suffix);
            PathBuf::from(name)
        };
        Self {
            vectors: with_suffix(".bin"),
            ids: with_suffix(".ids.json"),
            metadata: with_suffix(".meta.json"),
        }
    }

    pub fn all(&self) -> [&Path; 3] {
        [self.vectors.as_path(), self.ids.as_path(), self.metadata.as_path()]
    }

    /// Deletes whichever of the three files exist.
    pub fn remove_all(&self) -> Result<()> {
        for path in self.all() {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
                Err(error) => return Err(error.into()),
            }
        }
        Ok(())
    }
}

pub fn default_index_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(INDEX_DIR_NAME)
}

pub fn absolute_path(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

fn index_base_name(absolute_document: &Path, model: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(absolute_document.to_string_lossy().as_bytes());
    let model = model.replace([':', '/', '\\'], "_");
    format!("index_{:x}_{model}", hasher.finalize())
}
