#[path = "../src/backup.rs"]
mod backup;

mod test_support;

use std::io::{Read, Write};
use test_support::temp_dir;

fn seed_library(prefix: &str) -> std::path::PathBuf {
    let library = temp_dir(prefix);
    std::fs::write(library.join("studyd.sqlite3"), b"SQLite format 3\0fake pages").expect("write db");
    let doc_dir = library.join("files").join("doc-1");
    std::fs::create_dir_all(&doc_dir).expect("files dir");
    std::fs::write(doc_dir.join("notes.txt"), b"mitochondria").expect("write file");
    library
}

#[test]
fn bundle_round_trip_restores_database_and_files() {
    let library = seed_library("studyd-bundle-src");
    let out_dir = temp_dir("studyd-bundle-out");
    let bundle = out_dir.join("nested").join("library.studybundle.zip");

    let export = backup::export_library_bundle(&library, &bundle).expect("export");
    assert_eq!(export.bundle_format, backup::BUNDLE_FORMAT_V1);
    assert_eq!(export.file_count, 1);
    assert_eq!(export.entry_count, 3);

    let mut archive = zip::ZipArchive::new(std::fs::File::open(&bundle).expect("open bundle")).expect("zip");
    let mut manifest = String::new();
    archive
        .by_name("manifest.json")
        .expect("manifest")
        .read_to_string(&mut manifest)
        .expect("read manifest");
    let manifest: serde_json::Value = serde_json::from_str(&manifest).expect("manifest json");
    assert_eq!(manifest["format"], "studyd-library-v1");
    assert_eq!(manifest["dbSha256"], export.db_sha256.as_str());
    assert!(archive.by_name("db/studyd.sqlite3").is_ok());
    assert!(archive.by_name("files/doc-1/notes.txt").is_ok());
    drop(archive);

    let target = temp_dir("studyd-bundle-dst");
    std::fs::create_dir_all(target.join("files").join("stale")).expect("stale dir");
    let import = backup::import_library_bundle(&bundle, &target).expect("import");
    assert_eq!(import.bundle_format_detected, backup::BUNDLE_FORMAT_V1);
    assert_eq!(import.files_restored, 1);
    assert_eq!(
        std::fs::read(target.join("studyd.sqlite3")).expect("db"),
        b"SQLite format 3\0fake pages"
    );
    assert_eq!(
        std::fs::read(target.join("files").join("doc-1").join("notes.txt")).expect("file"),
        b"mitochondria"
    );
    assert!(!target.join("files").join("stale").exists());

    for dir in [library, out_dir, target] {
        let _ = std::fs::remove_dir_all(dir);
    }
}

#[test]
fn export_requires_a_database() {
    let library = temp_dir("studyd-bundle-empty");
    let err = backup::export_library_bundle(&library, &library.join("out.zip"))
        .expect_err("missing database");
    assert!(format!("{err:#}").contains("library database not found"));
    let _ = std::fs::remove_dir_all(library);
}

#[test]
fn plain_sqlite_files_are_copied_in_place() {
    let src_dir = temp_dir("studyd-plain-src");
    let plain = src_dir.join("old.sqlite3");
    std::fs::write(&plain, b"SQLite format 3\0legacy").expect("write plain");
    let target = temp_dir("studyd-plain-dst");

    let import = backup::import_library_bundle(&plain, &target).expect("import");
    assert_eq!(import.bundle_format_detected, backup::PLAIN_SQLITE_FORMAT);
    assert_eq!(import.files_restored, 0);
    assert_eq!(
        std::fs::read(target.join("studyd.sqlite3")).expect("db"),
        b"SQLite format 3\0legacy"
    );
    let _ = std::fs::remove_dir_all(src_dir);
    let _ = std::fs::remove_dir_all(target);
}

#[test]
fn bundles_with_a_bad_checksum_are_rejected() {
    let dir = temp_dir("studyd-bundle-bad");
    let bundle = dir.join("bad.zip");
    {
        let mut zip = zip::ZipWriter::new(std::fs::File::create(&bundle).expect("create"));
        let opts = zip::write::FileOptions::default();
        zip.start_file("manifest.json", opts).expect("manifest");
        zip.write_all(br#"{"format":"studyd-library-v1","dbSha256":"00"}"#)
            .expect("write manifest");
        zip.start_file("db/studyd.sqlite3", opts).expect("db entry");
        zip.write_all(b"SQLite format 3\0").expect("write db");
        zip.finish().expect("finish");
    }
    let target = dir.join("library");
    let err = backup::import_library_bundle(&bundle, &target).expect_err("checksum");
    assert!(format!("{err:#}").contains("checksum mismatch"));
    assert!(!target.join("studyd.sqlite3").exists());
    let _ = std::fs::remove_dir_all(dir);
}
