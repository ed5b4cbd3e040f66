//! Integration tests for archive validation, extraction, and repacking

use apkforge_archive::{extract, read_entry_bytes, repack, validate, RepackPlan};
use apkforge_errors::{ArchiveError, Error};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use tempfile::tempdir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let mut writer = ZipWriter::new(File::create(path).unwrap());
    for (name, bytes) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(bytes).unwrap();
    }
    writer.finish().unwrap();
}

#[test]
fn validate_accepts_real_archive() {
    let temp = tempdir().unwrap();
    let archive = temp.path().join("ok.zip");
    write_zip(&archive, &[("hello.txt", b"hi")]);
    assert!(validate(&archive));
    assert!(archive.exists(), "valid archives are kept");
}

#[test]
fn validate_deletes_corrupt_archive() {
    let temp = tempdir().unwrap();
    let archive = temp.path().join("junk.zip");
    fs::write(&archive, b"not a zip at all").unwrap();
    assert!(!validate(&archive));
    assert!(!archive.exists(), "corrupt files must be removed");
}

#[test]
fn validate_deletes_empty_file() {
    let temp = tempdir().unwrap();
    let archive = temp.path().join("empty.zip");
    fs::write(&archive, b"").unwrap();
    assert!(!validate(&archive));
    assert!(!archive.exists());
}

#[test]
fn validate_missing_file_is_false() {
    let temp = tempdir().unwrap();
    assert!(!validate(&temp.path().join("nope.zip")));
}

#[test]
fn extract_writes_nested_entries() {
    let temp = tempdir().unwrap();
    let archive = temp.path().join("app.zip");
    write_zip(
        &archive,
        &[
            ("AndroidManifest.xml", b"manifest"),
            ("lib/arm64-v8a/libapp.so", b"elf"),
        ],
    );

    let target = temp.path().join("out");
    let count = extract(&archive, &target).unwrap();
    assert_eq!(count, 2);
    assert_eq!(
        fs::read(target.join("lib/arm64-v8a/libapp.so")).unwrap(),
        b"elf"
    );
}

#[test]
fn extract_rejects_empty_archive() {
    let temp = tempdir().unwrap();
    let archive = temp.path().join("void.zip");
    // A syntactically valid zip with zero entries.
    ZipWriter::new(File::create(&archive).unwrap())
        .finish()
        .unwrap();

    let target = temp.path().join("out");
    let err = extract(&archive, &target).unwrap_err();
    assert!(matches!(
        err,
        Error::Archive(ArchiveError::NoEntries { .. })
    ));
    assert!(!target.exists(), "failed extraction cleans up the target");
}

#[test]
fn extract_rejects_zip_slip() {
    let temp = tempdir().unwrap();
    let archive = temp.path().join("evil.zip");
    write_zip(&archive, &[("../../evil", b"pwned")]);

    let target = temp.path().join("jail").join("root");
    let err = extract(&archive, &target).unwrap_err();
    assert!(matches!(
        err,
        Error::Archive(ArchiveError::SecurityViolation { .. })
    ));
    // Nothing may exist outside the target root.
    assert!(!temp.path().join("evil").exists());
    assert!(!temp.path().join("jail").join("evil").exists());
}

#[test]
fn read_entry_pulls_single_file() {
    let temp = tempdir().unwrap();
    let archive = temp.path().join("app.zip");
    write_zip(
        &archive,
        &[("AndroidManifest.xml", b"manifest"), ("classes.dex", b"dex")],
    );

    let bytes = read_entry_bytes(&archive, "AndroidManifest.xml").unwrap();
    assert_eq!(bytes, b"manifest");

    let err = read_entry_bytes(&archive, "missing.bin").unwrap_err();
    assert!(matches!(
        err,
        Error::Archive(ArchiveError::EntryNotFound { .. })
    ));
}

#[test]
fn repack_replaces_and_appends() {
    let temp = tempdir().unwrap();
    let source = temp.path().join("source.zip");
    write_zip(
        &source,
        &[("AndroidManifest.xml", b"old"), ("classes.dex", b"dex")],
    );

    let payload = temp.path().join("payload.bin");
    fs::write(&payload, b"payload-bytes").unwrap();

    let dest = temp.path().join("patched.zip");
    let plan = RepackPlan::new()
        .replace("AndroidManifest.xml", b"new-manifest".to_vec())
        .add_file("assets/payload.bin", &payload);
    repack(&source, &dest, &plan).unwrap();

    assert_eq!(
        read_entry_bytes(&dest, "AndroidManifest.xml").unwrap(),
        b"new-manifest"
    );
    assert_eq!(read_entry_bytes(&dest, "classes.dex").unwrap(), b"dex");
    assert_eq!(
        read_entry_bytes(&dest, "assets/payload.bin").unwrap(),
        b"payload-bytes"
    );
}

#[test]
fn repack_fails_on_missing_replacement_target() {
    let temp = tempdir().unwrap();
    let source = temp.path().join("source.zip");
    write_zip(&source, &[("classes.dex", b"dex")]);

    let dest = temp.path().join("patched.zip");
    let plan = RepackPlan::new().replace("AndroidManifest.xml", b"new".to_vec());
    let err = repack(&source, &dest, &plan).unwrap_err();
    assert!(matches!(
        err,
        Error::Archive(ArchiveError::RepackFailed { .. })
    ));
    assert!(!dest.exists(), "no partial output is retained");
}
