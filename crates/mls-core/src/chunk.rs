use std::path::Path;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs::File;

use crate::{Error, Result};

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// A slice of the file as it travels on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Sequence id, starting at 1
    pub id: i64,

    /// Raw file content
    pub content: Bytes,

    /// Hex SHA-256 of `content`
    pub checksum: String,
}

impl Chunk {
    pub fn new(id: i64, content: Bytes) -> Self {
        let checksum = checksum_bytes(&content);
        Self {
            id,
            content,
            checksum,
        }
    }

    /// Recompute the checksum and compare it with the transmitted one
    pub fn verify(&self) -> bool {
        checksum_bytes(&self.content) == self.checksum
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// Name and size of the file being uploaded, captured once before streaming
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    pub name: String,
    pub size: u64,
}

impl FileMeta {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }

    /// Read metadata from an open file.
    ///
    /// `path` only supplies the name; the size comes from the handle so it
    /// matches what will actually be read.
    pub async fn from_file(file: &File, path: &Path) -> Result<Self> {
        let metadata = file
            .metadata()
            .await
            .map_err(|e| Error::Metadata(e.to_string()))?;

        if !metadata.is_file() {
            return Err(Error::Metadata(format!(
                "{} is not a regular file",
                path.display()
            )));
        }

        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::Metadata(format!("no file name in {}", path.display())))?
            .to_string();

        Ok(Self::new(name, metadata.len()))
    }
}
