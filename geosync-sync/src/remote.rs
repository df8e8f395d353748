//! Remote store collaborator.
//!
//! [`RemoteStore`] is the session the orchestrator is handed explicitly; it is
//! opened once per run and never recreated behind the caller's back.
//! [`DirectoryRemote`] implements it as a local distribution tree:
//!
//! ```text
//! <root>/
//!   index.json             folders, files, revision history
//!   objects/<id>/<rev>     file contents, one blob per revision
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use geosync_core::RemoteId;

use crate::error::{io_err, remote_err, SyncError};

/// MIME type used for every archive upload.
pub const ARCHIVE_MIME: &str = "application/gzip";

/// Folder and file operations against the distribution service.
pub trait RemoteStore {
    /// Identifier of the folder called `name` directly under `parent`, if any.
    fn find_folder(&self, name: &str, parent: &RemoteId) -> Result<Option<RemoteId>, SyncError>;

    fn create_folder(&mut self, name: &str, parent: &RemoteId) -> Result<RemoteId, SyncError>;

    /// Identifier of the file called `name` filed under `parent`, if any.
    fn find_file(&self, name: &str, parent: &RemoteId) -> Result<Option<RemoteId>, SyncError>;

    /// Upload `local` as a new file under every folder in `parents`.
    fn create_file(
        &mut self,
        name: &str,
        parents: &[RemoteId],
        local: &Path,
        mime: &str,
    ) -> Result<RemoteId, SyncError>;

    /// Replace the content of an existing file.
    fn update_file(&mut self, id: &RemoteId, local: &Path, mime: &str) -> Result<(), SyncError>;

    /// Retain the file's current content as a recoverable revision.
    fn keep_revision(&mut self, id: &RemoteId) -> Result<(), SyncError>;

    fn download_file(&self, id: &RemoteId, dest: &Path) -> Result<(), SyncError>;
}

// ---------------------------------------------------------------------------
// DirectoryRemote
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFolder {
    pub name: String,
    pub parent: RemoteId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub number: u32,
    pub sha256: String,
    pub size: u64,
    #[serde(default)]
    pub keep: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub name: String,
    pub parents: Vec<RemoteId>,
    pub mime: String,
    pub revisions: Vec<Revision>,
}

impl RemoteFile {
    pub fn head(&self) -> Option<&Revision> {
        self.revisions.last()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RemoteIndex {
    next_id: u64,
    #[serde(default)]
    folders: BTreeMap<RemoteId, RemoteFolder>,
    #[serde(default)]
    files: BTreeMap<RemoteId, RemoteFile>,
}

/// Distribution store rooted at a local directory.
#[derive(Debug)]
pub struct DirectoryRemote {
    root: PathBuf,
    index: RemoteIndex,
}

impl DirectoryRemote {
    /// Open (or initialise) the store at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, SyncError> {
        let root = root.into();
        let index_path = root.join("index.json");
        let index = if index_path.exists() {
            let contents =
                std::fs::read_to_string(&index_path).map_err(|e| io_err(&index_path, e))?;
            serde_json::from_str(&contents)?
        } else {
            RemoteIndex::default()
        };
        Ok(Self { root, index })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn folder_count(&self) -> usize {
        self.index.folders.len()
    }

    pub fn file_count(&self) -> usize {
        self.index.files.len()
    }

    pub fn file(&self, id: &RemoteId) -> Option<&RemoteFile> {
        self.index.files.get(id)
    }

    pub fn folder(&self, id: &RemoteId) -> Option<&RemoteFolder> {
        self.index.folders.get(id)
    }

    fn allocate_id(&mut self, prefix: &str) -> RemoteId {
        self.index.next_id += 1;
        RemoteId(format!("{prefix}{:08x}", self.index.next_id))
    }

    fn blob_path(&self, id: &RemoteId, revision: u32) -> PathBuf {
        self.root.join("objects").join(&id.0).join(revision.to_string())
    }

    fn save_index(&self) -> Result<(), SyncError> {
        std::fs::create_dir_all(&self.root).map_err(|e| io_err(&self.root, e))?;
        let path = self.root.join("index.json");
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(&self.index)?;
        std::fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
        std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))
    }

    fn store_blob(&self, id: &RemoteId, number: u32, local: &Path) -> Result<Revision, SyncError> {
        let bytes = std::fs::read(local).map_err(|e| io_err(local, e))?;
        let blob = self.blob_path(id, number);
        if let Some(parent) = blob.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        std::fs::write(&blob, &bytes).map_err(|e| io_err(&blob, e))?;
        Ok(Revision {
            number,
            sha256: hex::encode(Sha256::digest(&bytes)),
            size: bytes.len() as u64,
            keep: false,
            created_at: Utc::now(),
        })
    }
}

impl RemoteStore for DirectoryRemote {
    fn find_folder(&self, name: &str, parent: &RemoteId) -> Result<Option<RemoteId>, SyncError> {
        Ok(self
            .index
            .folders
            .iter()
            .find(|(_, f)| f.name == name && &f.parent == parent)
            .map(|(id, _)| id.clone()))
    }

    fn create_folder(&mut self, name: &str, parent: &RemoteId) -> Result<RemoteId, SyncError> {
        let id = self.allocate_id("d");
        self.index.folders.insert(
            id.clone(),
            RemoteFolder {
                name: name.to_string(),
                parent: parent.clone(),
            },
        );
        self.save_index()?;
        Ok(id)
    }

    fn find_file(&self, name: &str, parent: &RemoteId) -> Result<Option<RemoteId>, SyncError> {
        Ok(self
            .index
            .files
            .iter()
            .find(|(_, f)| f.name == name && f.parents.contains(parent))
            .map(|(id, _)| id.clone()))
    }

    fn create_file(
        &mut self,
        name: &str,
        parents: &[RemoteId],
        local: &Path,
        mime: &str,
    ) -> Result<RemoteId, SyncError> {
        let id = self.allocate_id("f");
        let revision = self.store_blob(&id, 1, local)?;
        self.index.files.insert(
            id.clone(),
            RemoteFile {
                name: name.to_string(),
                parents: parents.to_vec(),
                mime: mime.to_string(),
                revisions: vec![revision],
            },
        );
        self.save_index()?;
        Ok(id)
    }

    fn update_file(&mut self, id: &RemoteId, local: &Path, mime: &str) -> Result<(), SyncError> {
        let number = match self.index.files.get(id) {
            Some(file) => file.head().map(|r| r.number + 1).unwrap_or(1),
            None => return Err(remote_err("update_file", format!("no file with id {id}"))),
        };
        let revision = self.store_blob(id, number, local)?;

        // Unkept revisions are superseded by the new head.
        let mut dropped = Vec::new();
        if let Some(file) = self.index.files.get_mut(id) {
            file.revisions.retain(|r| {
                if !r.keep {
                    dropped.push(r.number);
                }
                r.keep
            });
            file.revisions.push(revision);
            file.mime = mime.to_string();
        }
        for number in dropped {
            let _ = std::fs::remove_file(self.blob_path(id, number));
        }
        self.save_index()
    }

    fn keep_revision(&mut self, id: &RemoteId) -> Result<(), SyncError> {
        let head = self
            .index
            .files
            .get_mut(id)
            .and_then(|f| f.revisions.last_mut())
            .ok_or_else(|| remote_err("keep_revision", format!("no file with id {id}")))?;
        head.keep = true;
        self.save_index()
    }

    fn download_file(&self, id: &RemoteId, dest: &Path) -> Result<(), SyncError> {
        let head = self
            .index
            .files
            .get(id)
            .and_then(RemoteFile::head)
            .ok_or_else(|| remote_err("download_file", format!("no file with id {id}")))?;
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        let blob = self.blob_path(id, head.number);
        std::fs::copy(&blob, dest).map_err(|e| io_err(&blob, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn root() -> RemoteId {
        RemoteId::from("root")
    }

    #[test]
    fn folders_are_found_by_name_and_parent() {
        let tmp = TempDir::new().unwrap();
        let mut remote = DirectoryRemote::open(tmp.path()).unwrap();
        let boundaries = remote.create_folder("BOUNDARIES", &root()).unwrap();
        assert_eq!(remote.find_folder("BOUNDARIES", &root()).unwrap(), Some(boundaries.clone()));
        assert_eq!(remote.find_folder("BOUNDARIES", &boundaries).unwrap(), None);
    }

    #[test]
    fn files_are_found_by_name_under_any_parent() {
        let tmp = TempDir::new().unwrap();
        let local = tmp.path().join("a.tar.gz");
        std::fs::write(&local, "v1").unwrap();
        let mut remote = DirectoryRemote::open(tmp.path().join("remote")).unwrap();
        let mirror = RemoteId::from("mirror");
        let id = remote
            .create_file("a.tar.gz", &[root(), mirror.clone()], &local, ARCHIVE_MIME)
            .unwrap();

        assert_eq!(remote.find_file("a.tar.gz", &mirror).unwrap(), Some(id));
        assert_eq!(remote.find_file("b.tar.gz", &root()).unwrap(), None);
        assert_eq!(remote.find_file("a.tar.gz", &RemoteId::from("other")).unwrap(), None);
    }

    #[test]
    fn index_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        let id = {
            let mut remote = DirectoryRemote::open(tmp.path()).unwrap();
            remote.create_folder("WATER", &root()).unwrap()
        };
        let remote = DirectoryRemote::open(tmp.path()).unwrap();
        assert_eq!(remote.find_folder("WATER", &root()).unwrap(), Some(id));
    }

    #[test]
    fn update_replaces_content_and_keeps_marked_revisions() {
        let tmp = TempDir::new().unwrap();
        let local = tmp.path().join("a.tar.gz");
        std::fs::write(&local, "v1").unwrap();
        let mut remote = DirectoryRemote::open(tmp.path().join("remote")).unwrap();
        let id = remote.create_file("a.tar.gz", &[root()], &local, ARCHIVE_MIME).unwrap();
        remote.keep_revision(&id).unwrap();

        std::fs::write(&local, "v2").unwrap();
        remote.update_file(&id, &local, ARCHIVE_MIME).unwrap();
        std::fs::write(&local, "v3").unwrap();
        remote.update_file(&id, &local, ARCHIVE_MIME).unwrap();

        let file = remote.file(&id).unwrap();
        let numbers: Vec<u32> = file.revisions.iter().map(|r| r.number).collect();
        assert_eq!(numbers, vec![1, 3], "unkept revision 2 is superseded");
        assert_eq!(remote.file_count(), 1);

        let out = tmp.path().join("download.tar.gz");
        remote.download_file(&id, &out).unwrap();
        assert_eq!(std::fs::read_to_string(out).unwrap(), "v3");
    }

    #[test]
    fn update_unknown_file_is_remote_error() {
        let tmp = TempDir::new().unwrap();
        let local = tmp.path().join("a");
        std::fs::write(&local, "x").unwrap();
        let mut remote = DirectoryRemote::open(tmp.path().join("remote")).unwrap();
        let err = remote
            .update_file(&RemoteId::from("missing"), &local, ARCHIVE_MIME)
            .unwrap_err();
        assert!(matches!(err, SyncError::Remote { .. }));
    }
}
