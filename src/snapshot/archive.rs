//! tar.gz build / extract and tree copy helpers. All blocking.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::SnapshotError;

/// What went into an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveStats {
    pub files_count: u64,
    pub size_bytes: u64,
    pub subtrees: Vec<String>,
    pub config_file: Option<String>,
}

fn archive_err(context: &str, e: impl std::fmt::Display) -> SnapshotError {
    SnapshotError::Archive(format!("{context}: {e}"))
}

/// Write `subtrees` and `config_file` of `source_root` into a gzip tarball at `dest`.
///
/// Missing subtrees are skipped; an archive with nothing in it is an error.
pub fn build_archive(
    source_root: &Path,
    subtrees: &[String],
    config_file: &str,
    dest: &Path,
) -> Result<ArchiveStats, SnapshotError> {
    let present: Vec<&String> = subtrees.iter().filter(|s| source_root.join(s).is_dir()).collect();
    let config_path = source_root.join(config_file);
    let has_config = config_path.is_file();
    if present.is_empty() && !has_config {
        return Err(SnapshotError::NothingToArchive(source_root.to_path_buf()));
    }

    let file = File::create(dest).map_err(|e| SnapshotError::io(dest, e))?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    builder.follow_symlinks(false);
    let mut files_count = 0u64;

    for subtree in &present {
        for entry in WalkDir::new(source_root.join(subtree)).follow_links(false) {
            let entry = entry.map_err(|e| archive_err("walk failed", e))?;
            let rel = entry
                .path()
                .strip_prefix(source_root)
                .map_err(|e| archive_err("path outside source root", e))?;
            if entry.file_type().is_dir() {
                builder
                    .append_dir(rel, entry.path())
                    .map_err(|e| archive_err(&format!("append {}", rel.display()), e))?;
            } else {
                builder
                    .append_path_with_name(entry.path(), rel)
                    .map_err(|e| archive_err(&format!("append {}", rel.display()), e))?;
                files_count += 1;
            }
        }
    }

    if has_config {
        builder
            .append_path_with_name(&config_path, config_file)
            .map_err(|e| archive_err("append config file", e))?;
        files_count += 1;
    }

    let encoder = builder.into_inner().map_err(|e| archive_err("finish tar", e))?;
    encoder.finish().map_err(|e| archive_err("finish gzip", e))?;

    let size_bytes = std::fs::metadata(dest).map_err(|e| SnapshotError::io(dest, e))?.len();
    Ok(ArchiveStats {
        files_count,
        size_bytes,
        subtrees: present.into_iter().cloned().collect(),
        config_file: has_config.then(|| config_file.to_string()),
    })
}

/// Unpack a gzip tarball into `dest`. Entries escaping `dest` are refused by `tar`.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<(), SnapshotError> {
    let file = File::open(archive).map_err(|e| SnapshotError::io(archive, e))?;
    let mut tarball = tar::Archive::new(GzDecoder::new(file));
    tarball.set_preserve_permissions(true);
    tarball.unpack(dest).map_err(|e| archive_err("extract failed", e))
}

/// Directory inside an extraction that holds the captured items.
///
/// Archives are either rooted directly at the captured items or wrap them in
/// a single top-level directory.
pub fn locate_root(extracted: &Path, subtrees: &[String], config_file: &str) -> PathBuf {
    let holds_items = |dir: &Path| subtrees.iter().any(|s| dir.join(s).exists()) || dir.join(config_file).exists();
    if holds_items(extracted) {
        return extracted.to_path_buf();
    }

    let dirs: Vec<PathBuf> = std::fs::read_dir(extracted)
        .map(|entries| {
            entries
                .flatten()
                .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
                .map(|e| e.path())
                .collect()
        })
        .unwrap_or_default();
    match dirs.as_slice() {
        [only] if holds_items(only) => only.clone(),
        _ => extracted.to_path_buf(),
    }
}

/// Recursively copy `src` to `dst`, creating directories as needed.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<u64, SnapshotError> {
    let mut copied = 0u64;
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(|e| archive_err("walk failed", e))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| archive_err("path outside source", e))?;
        let target = dst.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| SnapshotError::io(&target, e))?;
        } else if file_type.is_symlink() {
            let link = std::fs::read_link(entry.path()).map_err(|e| SnapshotError::io(entry.path(), e))?;
            std::os::unix::fs::symlink(&link, &target).map_err(|e| SnapshotError::io(&target, e))?;
        } else {
            std::fs::copy(entry.path(), &target).map_err(|e| SnapshotError::io(&target, e))?;
            copied += 1;
        }
    }
    Ok(copied)
}
