//! Archive validation and safe extraction

use apkforge_errors::{ArchiveError, Error, Result};
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use zip::ZipArchive;

/// Check that a downloaded file is a usable zip-family archive.
///
/// Returns `false` if the file is missing, empty, or fails to open as a
/// valid archive. Invalid files are deleted as a side effect so a retried
/// download does not collide with corrupt leftovers.
#[must_use]
pub fn validate(path: &Path) -> bool {
    let usable = match fs::metadata(path) {
        Ok(meta) if meta.len() > 0 => match File::open(path) {
            Ok(file) => ZipArchive::new(file).is_ok(),
            Err(_) => false,
        },
        _ => false,
    };
    if !usable {
        let _ = fs::remove_file(path);
    }
    usable
}

/// Extract every entry of `archive` under `target_root`.
///
/// Every output path must remain a descendant of `target_root` in
/// canonical form; an entry that escapes fails with
/// [`ArchiveError::SecurityViolation`] before any of its bytes are
/// written. On any other failure the partially created `target_root` is
/// recursively deleted before the error propagates.
///
/// Returns the number of entries extracted.
///
/// # Errors
///
/// Fails if the archive is missing, empty, has no entries, contains an
/// escaping entry, or cannot be fully written out.
pub fn extract(archive: &Path, target_root: &Path) -> Result<usize> {
    let meta = fs::metadata(archive).map_err(|_| ArchiveError::Missing {
        path: archive.display().to_string(),
    })?;
    if meta.len() == 0 {
        return Err(ArchiveError::Empty {
            path: archive.display().to_string(),
        }
        .into());
    }

    fs::create_dir_all(target_root)?;
    let canonical_root = fs::canonicalize(target_root)?;

    match extract_entries(archive, &canonical_root) {
        Ok(count) => Ok(count),
        Err(err) => {
            // Zip slip is a hard stop; everything else cleans up after
            // itself before propagating.
            if !matches!(
                err,
                Error::Archive(ArchiveError::SecurityViolation { .. })
            ) {
                let _ = fs::remove_dir_all(target_root);
            }
            Err(err)
        }
    }
}

fn extract_entries(archive: &Path, canonical_root: &Path) -> Result<usize> {
    let file = File::open(archive)?;
    let mut zip = ZipArchive::new(file).map_err(|e| ArchiveError::Invalid {
        path: archive.display().to_string(),
        message: e.to_string(),
    })?;

    if zip.is_empty() {
        return Err(ArchiveError::NoEntries {
            path: archive.display().to_string(),
        }
        .into());
    }

    for index in 0..zip.len() {
        let mut entry = zip.by_index(index).map_err(|e| ArchiveError::Invalid {
            path: archive.display().to_string(),
            message: e.to_string(),
        })?;

        // Mandatory escape check, before any byte is written.
        let out_path = secure_join(canonical_root, entry.name())?;

        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&out_path)?;
        io::copy(&mut entry, &mut out).map_err(|e| ArchiveError::ExtractionFailed {
            message: format!("{}: {e}", entry.name()),
        })?;
    }

    Ok(zip.len())
}

/// Resolve `entry` under `root` without touching the filesystem,
/// rejecting anything that would land outside `root`.
fn secure_join(root: &Path, entry: &str) -> Result<PathBuf> {
    let violation = || ArchiveError::SecurityViolation {
        entry: entry.to_string(),
    };

    let relative = Path::new(entry);
    let mut resolved = root.to_path_buf();
    let mut depth = 0usize;
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return Err(violation().into());
                }
                resolved.pop();
                depth -= 1;
            }
            // Absolute entries and drive prefixes always escape.
            Component::RootDir | Component::Prefix(_) => return Err(violation().into()),
        }
    }

    debug_assert!(resolved.starts_with(root));
    Ok(resolved)
}

/// Read a single named entry out of `archive` without extracting the rest.
///
/// # Errors
///
/// Fails if the archive cannot be opened or the entry is absent or
/// unreadable.
pub fn read_entry_bytes(archive: &Path, name: &str) -> Result<Vec<u8>> {
    let file = File::open(archive).map_err(|_| ArchiveError::Missing {
        path: archive.display().to_string(),
    })?;
    let mut zip = ZipArchive::new(file).map_err(|e| ArchiveError::Invalid {
        path: archive.display().to_string(),
        message: e.to_string(),
    })?;
    let mut entry = zip.by_name(name).map_err(|_| ArchiveError::EntryNotFound {
        name: name.to_string(),
    })?;
    let mut buf = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or(0));
    io::Read::read_to_end(&mut entry, &mut buf).map_err(|e| ArchiveError::ExtractionFailed {
        message: format!("{name}: {e}"),
    })?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::secure_join;
    use apkforge_errors::{ArchiveError, Error};
    use std::path::Path;

    #[test]
    fn secure_join_accepts_nested_entries() {
        let root = Path::new("/tmp/extract");
        let joined = secure_join(root, "lib/arm64-v8a/libapp.so").unwrap();
        assert_eq!(joined, root.join("lib/arm64-v8a/libapp.so"));
    }

    #[test]
    fn secure_join_allows_internal_parent_refs() {
        let root = Path::new("/tmp/extract");
        let joined = secure_join(root, "assets/../res/icon.png").unwrap();
        assert_eq!(joined, root.join("res/icon.png"));
    }

    #[test]
    fn secure_join_rejects_escapes() {
        let root = Path::new("/tmp/extract");
        for name in ["../evil", "../../evil", "a/../../evil", "/etc/passwd"] {
            let err = secure_join(root, name).unwrap_err();
            assert!(
                matches!(err, Error::Archive(ArchiveError::SecurityViolation { .. })),
                "{name} should be rejected"
            );
        }
    }
}
