// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Uploaded file spooling.
//!
//! Multipart uploads are written to a temporary file before they are pinned.
//! The file is owned by [`UploadedFile`] and removed when it is dropped, so
//! it cannot outlive the request on any exit path.

use std::{
    io::Write,
    path::{Path, PathBuf},
};

use tempfile::NamedTempFile;

/// Fallback content type when the client declares none.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// A file received with a submission, spooled to disk.
#[derive(Debug)]
pub struct UploadedFile {
    file_name: String,
    content_type: String,
    size: u64,
    spool: NamedTempFile,
}

impl UploadedFile {
    /// Write `bytes` to a fresh spool file in `spool_dir` (or the system temp dir).
    pub fn spool(
        bytes: &[u8],
        file_name: impl Into<String>,
        content_type: Option<String>,
        spool_dir: Option<&Path>,
    ) -> std::io::Result<Self> {
        let mut spool = match spool_dir {
            Some(dir) => tempfile::Builder::new()
                .prefix("upload-")
                .tempfile_in(dir)?,
            None => tempfile::Builder::new().prefix("upload-").tempfile()?,
        };
        spool.write_all(bytes)?;
        spool.flush()?;

        let file_name = file_name.into();
        let file_name = if file_name.trim().is_empty() {
            "upload.bin".to_string()
        } else {
            file_name
        };

        Ok(Self {
            file_name,
            content_type: content_type
                .filter(|ct| !ct.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            size: bytes.len() as u64,
            spool,
        })
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Location of the spool file on disk.
    pub fn path(&self) -> PathBuf {
        self.spool.path().to_path_buf()
    }

    /// Read the spooled bytes back.
    pub async fn read(&self) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(self.spool.path()).await
    }
}
