//! Archive primitives: gzip-compressed tarballs of one directory each.
//!
//! Entry paths are relative to the *parent* of the archived directory, so the
//! directory's own name is the top-level entry and extraction reconstructs the
//! same layout wherever it runs. `*.lock` files are never bundled.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use tar::Header;
use walkdir::WalkDir;

use crate::error::SyncError;

const LOCK_SUFFIX: &str = ".lock";

fn archive_err(path: &Path, source: std::io::Error) -> SyncError {
    SyncError::Archive {
        path: path.to_path_buf(),
        source,
    }
}

fn is_lock_file(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().ends_with(LOCK_SUFFIX))
        .unwrap_or(false)
}

/// Compress `dir` into `dest`. Returns the number of files archived.
pub fn compress_dir(dir: &Path, dest: &Path) -> Result<usize, SyncError> {
    if !dir.is_dir() {
        return Err(archive_err(
            dir,
            std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
        ));
    }
    let base = dir.parent().unwrap_or_else(|| Path::new(""));
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|e| archive_err(parent, e))?;
    }

    let file = File::create(dest).map_err(|e| archive_err(dest, e))?;
    let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    let mut files = 0usize;
    for entry in WalkDir::new(dir).sort_by(|a, b| a.file_name().cmp(b.file_name())) {
        let entry = entry.map_err(|e| archive_err(dir, e.into()))?;
        let path = entry.path();
        let rel = path
            .strip_prefix(base)
            .map_err(|e| archive_err(path, std::io::Error::other(e)))?;
        let mut header = Header::new_gnu();
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);

        if entry.file_type().is_dir() {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_mode(0o755);
            header.set_size(0);
            builder
                .append_data(&mut header, rel, std::io::empty())
                .map_err(|e| archive_err(path, e))?;
        } else if entry.file_type().is_file() {
            if is_lock_file(path) {
                tracing::debug!(path = %path.display(), "skipping lock file");
                continue;
            }
            let metadata = entry.metadata().map_err(|e| archive_err(path, e.into()))?;
            header.set_entry_type(tar::EntryType::Regular);
            header.set_mode(0o644);
            header.set_size(metadata.len());
            let source = File::open(path).map_err(|e| archive_err(path, e))?;
            builder
                .append_data(&mut header, rel, source)
                .map_err(|e| archive_err(path, e))?;
            files += 1;
        }
    }

    let encoder = builder.into_inner().map_err(|e| archive_err(dest, e))?;
    let mut writer = encoder.finish().map_err(|e| archive_err(dest, e))?;
    writer.flush().map_err(|e| archive_err(dest, e))?;
    Ok(files)
}

/// Unpack an archive produced by [`compress_dir`] into `dest`.
///
/// Returns the top-level directory the archive recreated, if any.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<Option<PathBuf>, SyncError> {
    std::fs::create_dir_all(dest).map_err(|e| archive_err(dest, e))?;
    let file = File::open(archive).map_err(|e| archive_err(archive, e))?;
    let mut tarball = tar::Archive::new(GzDecoder::new(file));

    let mut top_level = None;
    for entry in tarball.entries().map_err(|e| archive_err(archive, e))? {
        let mut entry = entry.map_err(|e| archive_err(archive, e))?;
        if top_level.is_none() {
            let path = entry.path().map_err(|e| archive_err(archive, e))?;
            top_level = path.components().next().map(|c| dest.join(c.as_os_str()));
        }
        entry.unpack_in(dest).map_err(|e| archive_err(dest, e))?;
    }
    Ok(top_level)
}

/// `<output_dir>/<name>_<suffix>.tar.gz`
pub fn archive_path(output_dir: &Path, name: &str, suffix: &str) -> PathBuf {
    output_dir.join(format!("{name}_{suffix}.tar.gz"))
}
