//! Entry-preserving package rewrite
//!
//! Repacking copies a package archive entry by entry, substituting the
//! rewritten manifest and appending payload files. Stored (uncompressed)
//! entries are re-emitted with 4-byte alignment, which the signing stage
//! depends on.

use apkforge_errors::{ArchiveError, Result};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// What to change while copying a package archive.
#[derive(Debug, Default)]
pub struct RepackPlan {
    replacements: HashMap<String, Vec<u8>>,
    additions: Vec<(String, PathBuf)>,
}

impl RepackPlan {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the named entry's bytes, keeping its position in the walk.
    #[must_use]
    pub fn replace(mut self, name: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.replacements.insert(name.into(), bytes);
        self
    }

    /// Append a file from disk as a new entry.
    #[must_use]
    pub fn add_file(mut self, name: impl Into<String>, source: impl Into<PathBuf>) -> Self {
        self.additions.push((name.into(), source.into()));
        self
    }
}

/// Copy `source` to `dest` applying `plan`.
///
/// No partial output is retained: `dest` is removed if the rewrite fails
/// partway through.
///
/// # Errors
///
/// Fails if the source archive cannot be read, a planned replacement names
/// a missing entry, or the destination cannot be written.
pub fn repack(source: &Path, dest: &Path, plan: &RepackPlan) -> Result<()> {
    match copy_archive(source, dest, plan) {
        Ok(()) => Ok(()),
        Err(err) => {
            let _ = fs::remove_file(dest);
            Err(err)
        }
    }
}

fn copy_archive(source: &Path, dest: &Path, plan: &RepackPlan) -> Result<()> {
    let repack_err = |message: String| ArchiveError::RepackFailed { message };

    let mut zip = ZipArchive::new(File::open(source)?)
        .map_err(|e| repack_err(format!("{}: {e}", source.display())))?;
    let mut writer = ZipWriter::new(File::create(dest)?);

    let mut replaced = 0usize;
    for index in 0..zip.len() {
        let name = zip
            .name_for_index(index)
            .ok_or_else(|| repack_err(format!("unnamed entry {index}")))?
            .to_string();

        if let Some(bytes) = plan.replacements.get(&name) {
            let options =
                SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
            writer
                .start_file(&*name, options)
                .map_err(|e| repack_err(format!("{name}: {e}")))?;
            io::Write::write_all(&mut writer, bytes)?;
            replaced += 1;
            continue;
        }

        let entry = zip
            .by_index_raw(index)
            .map_err(|e| repack_err(format!("{name}: {e}")))?;
        if entry.compression() == CompressionMethod::Stored {
            // Re-emit stored entries aligned; raw copy would shift their
            // data offsets off the 4-byte boundary.
            drop(entry);
            let mut entry = zip
                .by_index(index)
                .map_err(|e| repack_err(format!("{name}: {e}")))?;
            let options = SimpleFileOptions::default()
                .compression_method(CompressionMethod::Stored)
                .with_alignment(4);
            writer
                .start_file(&*name, options)
                .map_err(|e| repack_err(format!("{name}: {e}")))?;
            io::copy(&mut entry, &mut writer)?;
        } else {
            writer
                .raw_copy_file(entry)
                .map_err(|e| repack_err(format!("{name}: {e}")))?;
        }
    }

    if replaced != plan.replacements.len() {
        return Err(repack_err("replacement entry not present in source".to_string()).into());
    }

    for (name, path) in &plan.additions {
        let options =
            SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        writer
            .start_file(&**name, options)
            .map_err(|e| repack_err(format!("{name}: {e}")))?;
        let mut input = File::open(path)?;
        io::copy(&mut input, &mut writer)?;
    }

    writer
        .finish()
        .map_err(|e| repack_err(e.to_string()))?;
    Ok(())
}
