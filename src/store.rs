//! JSON state documents kept between runs
//!
//! Each concern lives in its own document inside the state directory. Reads
//! never fail: a missing or unreadable document is treated as empty. Writes
//! replace the whole document through a temp file and a rename, so a crash
//! leaves either the old or the new version on disk.

use crate::error::Error;
use crate::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const DEAD_SOURCES_FILE: &str = "dead_sources.json";
pub const SOURCE_FAILS_FILE: &str = "source_fail_counts.json";
pub const GOOD_PROXIES_FILE: &str = "good_proxies.json";
pub const BAD_PROXIES_FILE: &str = "bad_proxies.json";

/// Handle on the state directory
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Load a document, falling back to `T::default()` when it is missing or corrupt
    pub fn load<T: DeserializeOwned + Default>(&self, name: &str) -> T {
        let path = self.path(name);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "state document missing, starting empty");
                return T::default();
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot read state document, starting empty");
                return T::default();
            }
        };

        match serde_json::from_str(&content) {
            Ok(value) => value,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "corrupt state document, starting empty");
                T::default()
            }
        }
    }

    /// Replace a single document
    pub fn save<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        self.save_many(&[(name, self.encode(name, value)?)])
    }

    /// Encode a document without writing it, for use with [`StateStore::save_many`]
    pub fn encode<T: Serialize>(&self, name: &str, value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(value).map_err(|source| Error::Encode {
            path: self.path(name),
            source,
        })
    }

    /// Replace several documents. All temp files are written and synced
    /// before any of them is renamed into place; on failure the temp files
    /// still on disk are removed.
    pub fn save_many(&self, documents: &[(&str, Vec<u8>)]) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| Error::persistence(&self.dir, e))?;

        let mut staged = Vec::with_capacity(documents.len());
        let result = self.stage_and_commit(documents, &mut staged);
        if result.is_err() {
            for (tmp, _) in &staged {
                if let Err(e) = fs::remove_file(tmp) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!(path = %tmp.display(), error = %e, "cannot remove staged document");
                    }
                }
            }
        }
        result
    }

    fn stage_and_commit(
        &self,
        documents: &[(&str, Vec<u8>)],
        staged: &mut Vec<(PathBuf, PathBuf)>,
    ) -> Result<()> {
        for (name, bytes) in documents {
            let target = self.path(name);
            let tmp = self.path(&format!("{}.tmp", name));
            staged.push((tmp.clone(), target));
            write_synced(&tmp, bytes).map_err(|e| Error::persistence(&tmp, e))?;
        }

        for (tmp, target) in staged.iter() {
            fs::rename(tmp, target).map_err(|e| Error::persistence(target, e))?;
            debug!(path = %target.display(), "state document written");
        }

        Ok(())
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}
