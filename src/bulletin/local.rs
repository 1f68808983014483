use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use data_encoding::HEXLOWER;
use serde::Serialize;

use super::{ContentHash, StorageBackend};
use crate::error::{Error, Result};

const EXTENSION: &str = "json";

/// One `<hash>.json` file per record under a root directory.
pub struct LocalBackend {
    root: PathBuf,
}

/// Outcome of re-hashing every record on disk.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    /// Records whose contents match their address.
    pub intact: usize,
    /// Addresses whose contents no longer hash to the address.
    pub tampered: Vec<String>,
    /// Files in the directory that are not records.
    pub ignored: Vec<String>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.tampered.is_empty()
    }
}

impl LocalBackend {
    /// Open (creating if needed) a storage directory.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| {
            Error::Storage(format!("cannot create storage at {}: {e}", root.display()))
        })?;
        debug!("Bulletin storage at {}", root.display());
        Ok(Self { root })
    }

    /// Open a storage directory that must already exist.
    pub fn existing(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(Error::Storage(format!(
                "no storage directory at {}",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, hash: &ContentHash) -> PathBuf {
        self.root.join(format!("{hash}.{EXTENSION}"))
    }

    /// Every record address currently on disk, sorted.
    pub fn list(&self) -> Result<Vec<ContentHash>> {
        let mut hashes = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            if let Some(hash) = record_hash(&entry?.path()) {
                hashes.push(hash);
            }
        }
        hashes.sort();
        Ok(hashes)
    }

    /// Re-hash a single record.
    pub fn check(&self, hash: &ContentHash) -> Result<bool> {
        let bytes = self
            .get(hash)?
            .ok_or_else(|| Error::not_found(format!("bulletin record {hash}")))?;
        Ok(ContentHash::of(&bytes) == *hash)
    }

    /// Re-hash every record on disk.
    pub fn audit(&self) -> Result<AuditReport> {
        let mut report = AuditReport::default();
        let mut entries = fs::read_dir(&self.root)?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<Vec<_>>>()?;
        entries.sort();
        for path in entries {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            match record_hash(&path) {
                Some(hash) => {
                    if ContentHash::of(&fs::read(&path)?) == hash {
                        report.intact += 1;
                    } else {
                        warn!("Bulletin record {hash} does not match its address");
                        report.tampered.push(hash.to_string());
                    }
                }
                None => report.ignored.push(name),
            }
        }
        Ok(report)
    }
}

/// The address encoded in a record's file name, if it is one.
fn record_hash(path: &Path) -> Option<ContentHash> {
    if !path.is_file() || path.extension()? != EXTENSION {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}

impl StorageBackend for LocalBackend {
    fn put(&self, hash: &ContentHash, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(hash);
        if path.exists() {
            return Ok(());
        }
        // Write under a temporary name and rename, so a record is either absent or whole.
        let suffix: [u8; 6] = rand::random();
        let tmp = self
            .root
            .join(format!(".{hash}.{}.tmp", HEXLOWER.encode(&suffix)));
        let written = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp)
            .and_then(|mut file: File| {
                file.write_all(bytes)?;
                file.sync_all()
            })
            .and_then(|_| fs::rename(&tmp, &path));
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            error!("Failed to write bulletin record {hash}: {e}");
            return Err(e.into());
        }
        Ok(())
    }

    fn get(&self, hash: &ContentHash) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(hash)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn contains(&self, hash: &ContentHash) -> Result<bool> {
        Ok(self.path_for(hash).is_file())
    }
}
