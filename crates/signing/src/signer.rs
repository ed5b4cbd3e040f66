//! Package signing entry point

use crate::block::{compute_digest, parse_sections, write_signing_block};
use crate::identity::SigningIdentity;
use apkforge_errors::{Result, SigningError};
use byteorder::{LittleEndian, WriteBytesExt};
use std::fs;
use std::io::{Cursor, Seek, SeekFrom, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Sign `input` into `output` with signature schemes v2 and v3.
///
/// Any existing signing block in the input is replaced. The output is
/// written through a temporary file in the destination directory, so no
/// partial output file is retained on failure.
///
/// # Errors
///
/// Fails with [`SigningError::InvalidPackage`] if the input cannot be
/// opened as a zip, or [`SigningError::Signing`] if block construction or
/// output writing fails.
pub fn sign(input: &Path, output: &Path, identity: &SigningIdentity) -> Result<()> {
    let invalid = |message: String| SigningError::InvalidPackage {
        path: input.display().to_string(),
        message,
    };

    let package = fs::read(input).map_err(|e| invalid(e.to_string()))?;
    let mut reader = Cursor::new(package.as_slice());
    let sections = parse_sections(&mut reader).map_err(|e| invalid(e.to_string()))?;
    let digest = compute_digest(&mut reader, &sections)?;

    let mut block = Vec::new();
    write_signing_block(&mut block, identity, &digest)?;

    let signing_failed = |message: String| SigningError::Signing { message };

    let dir = output.parent().filter(|p| !p.as_os_str().is_empty());
    let mut staged = match dir {
        Some(dir) => NamedTempFile::new_in(dir),
        None => NamedTempFile::new(),
    }
    .map_err(|e| signing_failed(e.to_string()))?;

    let sb_start = usize::try_from(sections.sb_start)
        .map_err(|e| signing_failed(e.to_string()))?;
    let cd_start = usize::try_from(sections.cd_start)
        .map_err(|e| signing_failed(e.to_string()))?;
    let cde_start = usize::try_from(sections.cde_start)
        .map_err(|e| signing_failed(e.to_string()))?;

    staged.write_all(&package[..sb_start])?;
    staged.write_all(&block)?;
    let new_cd_start = staged.stream_position()?;
    staged.write_all(&package[cd_start..cde_start])?;
    let new_cde_start = staged.stream_position()?;
    staged.write_all(&package[cde_start..])?;

    // Point the directory end record at the relocated central directory.
    staged.seek(SeekFrom::Start(new_cde_start + 16))?;
    let offset =
        u32::try_from(new_cd_start).map_err(|_| signing_failed("package exceeds 4 GiB".into()))?;
    staged.write_u32::<LittleEndian>(offset)?;
    staged.flush()?;

    staged
        .persist(output)
        .map_err(|e| signing_failed(e.to_string()))?;
    Ok(())
}
