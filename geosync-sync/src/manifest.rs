//! Hash manifest files: the change-detection artifact uploaded every sync.
//!
//! One JSON object per line:
//!
//! ```text
//! {"src_id":12,"hash":"9f2c...","anchor":[425000.5,4512000.25]}
//! ```
//!
//! Writes go to `<path>.tmp` and are renamed into place by
//! [`ManifestWriter::finish`], so an interrupted pass never leaves a
//! truncated manifest behind.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{io_err, SyncError};

/// On-disk manifest row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestLine {
    pub src_id: i64,
    pub hash: String,
    #[serde(default)]
    pub anchor: Option<[f64; 2]>,
}

/// `<dir>/<name>_hash`
pub fn manifest_dir(output_dir: &Path, name: &str) -> PathBuf {
    output_dir.join(format!("{name}_hash"))
}

/// `<dir>/<name>_hash/<name>_hashes.jsonl`
pub fn manifest_path(output_dir: &Path, name: &str) -> PathBuf {
    manifest_dir(output_dir, name).join(format!("{name}_hashes.jsonl"))
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Streaming manifest sink.
pub struct ManifestWriter {
    path: PathBuf,
    tmp: PathBuf,
    writer: BufWriter<File>,
}

impl ManifestWriter {
    pub fn create(path: &Path) -> Result<Self, SyncError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        let tmp = PathBuf::from(format!("{}.tmp", path.display()));
        let file = File::create(&tmp).map_err(|e| io_err(&tmp, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            tmp,
            writer: BufWriter::new(file),
        })
    }

    pub fn append(
        &mut self,
        src_id: i64,
        hash: &str,
        anchor: Option<(f64, f64)>,
    ) -> Result<(), SyncError> {
        let line = ManifestLine {
            src_id,
            hash: hash.to_string(),
            anchor: anchor.map(|(x, y)| [x, y]),
        };
        serde_json::to_writer(&mut self.writer, &line)?;
        self.writer
            .write_all(b"\n")
            .map_err(|e| io_err(&self.tmp, e))
    }

    /// Flush and atomically move the manifest into place.
    pub fn finish(mut self) -> Result<PathBuf, SyncError> {
        self.writer.flush().map_err(|e| io_err(&self.tmp, e))?;
        drop(self.writer);
        if let Err(e) = std::fs::rename(&self.tmp, &self.path) {
            let _ = std::fs::remove_file(&self.tmp);
            return Err(io_err(&self.path, e));
        }
        Ok(self.path)
    }
}

// ---------------------------------------------------------------------------
// Prior manifest
// ---------------------------------------------------------------------------

/// Digest → row id lookup recovered from the last published manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PriorManifest {
    lookup: HashMap<String, i64>,
}

impl PriorManifest {
    /// Load a whole manifest into memory.
    ///
    /// A digest seen twice keeps its first row id and logs a warning; manifests
    /// written by this crate never contain duplicates.
    pub fn load(path: &Path) -> Result<Self, SyncError> {
        let file = File::open(path).map_err(|e| io_err(path, e))?;
        let mut lookup = HashMap::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| io_err(path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            let row: ManifestLine = serde_json::from_str(&line)?;
            if let Some(existing) = lookup.get(&row.hash) {
                tracing::warn!(
                    hash = %row.hash,
                    first = existing,
                    duplicate = row.src_id,
                    "duplicate digest in prior manifest"
                );
                continue;
            }
            lookup.insert(row.hash, row.src_id);
        }
        Ok(Self { lookup })
    }

    pub fn from_digests<I, S>(digests: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let lookup = digests
            .into_iter()
            .enumerate()
            .map(|(i, d)| (d.into(), i as i64))
            .collect();
        Self { lookup }
    }

    pub fn contains(&self, digest: &str) -> bool {
        self.lookup.contains_key(digest)
    }

    pub fn row_id(&self, digest: &str) -> Option<i64> {
        self.lookup.get(digest).copied()
    }

    pub fn digests(&self) -> impl Iterator<Item = &str> {
        self.lookup.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.lookup.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn writer_roundtrips_through_prior_manifest() {
        let tmp = TempDir::new().unwrap();
        let path = manifest_path(tmp.path(), "Counties");
        let mut writer = ManifestWriter::create(&path).unwrap();
        writer.append(1, "aaa", Some((1.0, 2.0))).unwrap();
        writer.append(2, "bbb", None).unwrap();
        writer.finish().unwrap();

        let prior = PriorManifest::load(&path).unwrap();
        assert_eq!(prior.len(), 2);
        assert_eq!(prior.row_id("aaa"), Some(1));
        assert!(prior.contains("bbb"));
    }

    #[test]
    fn tmp_file_removed_after_finish() {
        let tmp = TempDir::new().unwrap();
        let path = manifest_path(tmp.path(), "Counties");
        ManifestWriter::create(&path).unwrap().finish().unwrap();
        assert!(path.exists());
        assert!(!PathBuf::from(format!("{}.tmp", path.display())).exists());
    }

    #[test]
    fn unfinished_writer_leaves_no_manifest() {
        let tmp = TempDir::new().unwrap();
        let path = manifest_path(tmp.path(), "Counties");
        {
            let mut writer = ManifestWriter::create(&path).unwrap();
            writer.append(1, "aaa", None).unwrap();
        }
        assert!(!path.exists());
    }

    #[test]
    fn duplicate_digest_keeps_first_row() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("dupes.jsonl");
        std::fs::write(
            &path,
            "{\"src_id\":1,\"hash\":\"x\"}\n{\"src_id\":2,\"hash\":\"x\"}\n\n",
        )
        .unwrap();
        let prior = PriorManifest::load(&path).unwrap();
        assert_eq!(prior.len(), 1);
        assert_eq!(prior.row_id("x"), Some(1));
    }
}
