// SPDX-FileCopyrightText: 2025 fedrec contributors
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/formats/src/npz.rs

use anyhow::{Context, Result};
use ndarray_npy::{ReadNpyExt, WriteNpyExt};
use std::fs::File;
use std::io::{Cursor, Read, Write};
use std::path::Path;
use zip::{write::SimpleFileOptions, CompressionMethod, ZipArchive, ZipWriter};

/// Writer for NPZ archives (ZIP of `.npy` members, one per named array).
pub struct NpzWriter {
    zip: ZipWriter<File>,
    options: SimpleFileOptions,
}

impl NpzWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create NPZ file at {:?}", path))?;
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        Ok(Self {
            zip: ZipWriter::new(file),
            options,
        })
    }

    /// Add one named array. The `.npy` suffix is appended to `name`.
    pub fn add(&mut self, name: &str, array: &impl WriteNpyExt) -> Result<()> {
        // Serialize to a memory buffer first, then copy into the archive entry.
        let mut buffer = Vec::new();
        {
            let mut cursor = Cursor::new(&mut buffer);
            array
                .write_npy(&mut cursor)
                .with_context(|| format!("Failed to serialize array {}", name))?;
        }

        let entry_name = format!("{}.npy", name);
        self.zip
            .start_file(entry_name.as_str(), self.options)
            .with_context(|| format!("Failed to start ZIP file entry for {}", entry_name))?;
        self.zip
            .write_all(&buffer)
            .with_context(|| format!("Failed to write array {} to ZIP", entry_name))?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        self.zip
            .finish()
            .with_context(|| "Failed to finalize NPZ ZIP archive")?;
        Ok(())
    }
}

/// Reader for NPZ archives produced by [`NpzWriter`] (or numpy's `savez`).
pub struct NpzReader {
    archive: ZipArchive<File>,
}

impl NpzReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("Failed to open NPZ file at {:?}", path))?;
        let archive = ZipArchive::new(file).with_context(|| "Failed to read NPZ as ZIP archive")?;

        if archive.is_empty() {
            anyhow::bail!("NPZ file is empty");
        }

        Ok(Self { archive })
    }

    /// Names of the arrays stored in the archive, `.npy` suffix stripped.
    pub fn names(&self) -> Vec<String> {
        self.archive
            .file_names()
            .filter_map(|n| n.strip_suffix(".npy"))
            .map(str::to_string)
            .collect()
    }

    /// Read one named array as the requested array type.
    pub fn array<A: ReadNpyExt>(&mut self, name: &str) -> Result<A> {
        let entry_name = format!("{}.npy", name);
        let mut entry = self
            .archive
            .by_name(&entry_name)
            .with_context(|| format!("NPZ archive has no array named {}", name))?;

        let mut buffer = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut buffer)
            .with_context(|| format!("Failed to read ZIP entry {}", entry_name))?;

        A::read_npy(Cursor::new(buffer)).with_context(|| format!("Failed to decode array {}", name))
    }
}
