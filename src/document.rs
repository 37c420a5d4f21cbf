//! Boundary to document readers. The engine only needs extracted text.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::DocumentError;

pub trait Document {
    fn extract(&self) -> Result<String, DocumentError>;
}

/// A UTF-8 text file on disk.
#[derive(Clone, Debug)]
pub struct TextDocument {
    path: PathBuf,
}

impl TextDocument {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> Option<&str> {
        self.path.file_stem().and_then(|stem| stem.to_str())
    }
}

impl Document for TextDocument {
    fn extract(&self) -> Result<String, DocumentError> {
        let text = fs::read_to_string(&self.path)?;
        if text.trim().is_empty() {
            return Err(DocumentError::Empty(self.path.display().to_string()));
        }
        Ok(text)
    }
}
