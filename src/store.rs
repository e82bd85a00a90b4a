//! Where received payloads land on disk.
//!
//! Names come from the peer's `file_name` field. With confinement on they are
//! resolved strictly under the receive directory; with it off they are joined
//! verbatim, which lets a peer write anywhere the process can.

use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("refusing file name {name:?}: {reason}")]
    UnsafePath { name: String, reason: String },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Outcome of the final persist step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    Written,
    /// Target appeared between the collision check and the rename
    AlreadyExists,
}

#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
    overwrite: bool,
    confine: bool,
}

impl Store {
    /// Open (creating if needed) the receive directory
    pub fn open(root: &Path, overwrite: bool, confine: bool) -> io::Result<Self> {
        fs::create_dir_all(root)?;
        let root = root.canonicalize()?;
        Ok(Self {
            root,
            overwrite,
            confine,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn overwrite(&self) -> bool {
        self.overwrite
    }

    pub fn confined(&self) -> bool {
        self.confine
    }

    /// Map a peer-supplied name to a target path
    pub fn resolve(&self, name: &str) -> Result<PathBuf, TransferError> {
        if !self.confine {
            return Ok(self.root.join(name));
        }
        let safe = sanitize(name).map_err(|reason| TransferError::UnsafePath {
            name: name.to_string(),
            reason,
        })?;
        let joined = self.root.join(&safe);

        // Symlinked directories inside the root must not lead out of it
        let mut probe = joined.parent();
        while let Some(dir) = probe {
            if dir.exists() {
                let real = dir.canonicalize().map_err(|e| TransferError::UnsafePath {
                    name: name.to_string(),
                    reason: format!("cannot resolve {}: {}", dir.display(), e),
                })?;
                if !real.starts_with(&self.root) {
                    return Err(TransferError::UnsafePath {
                        name: name.to_string(),
                        reason: format!("escapes {}", self.root.display()),
                    });
                }
                break;
            }
            probe = dir.parent();
        }
        Ok(joined)
    }

    pub fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    /// Write `payload` to `path` through a temp file in the same directory, so the
    /// target only ever holds a complete payload.
    pub fn write(&self, path: &Path, payload: &[u8]) -> Result<WriteStatus, TransferError> {
        let wrap = |source: io::Error| TransferError::Write {
            path: path.to_path_buf(),
            source,
        };
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).map_err(wrap)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(wrap)?;
        tmp.write_all(payload).map_err(wrap)?;
        tmp.flush().map_err(wrap)?;

        if self.overwrite {
            tmp.persist(path).map_err(|e| wrap(e.error))?;
        } else {
            match tmp.persist_noclobber(path) {
                Ok(_) => {}
                Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                    return Ok(WriteStatus::AlreadyExists)
                }
                Err(e) => return Err(wrap(e.error)),
            }
        }
        Ok(WriteStatus::Written)
    }
}

/// Keep only plain components of a relative path
fn sanitize(name: &str) -> Result<PathBuf, String> {
    if name.contains('\0') {
        return Err("contains NUL byte".into());
    }
    let mut safe = PathBuf::new();
    for component in Path::new(name).components() {
        match component {
            Component::CurDir => {}
            Component::Normal(s) => {
                #[cfg(windows)]
                if s.to_string_lossy().contains(':') {
                    return Err("component contains colon".into());
                }
                safe.push(s);
            }
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(format!("disallowed component {:?}", component));
            }
        }
    }
    if safe.as_os_str().is_empty() {
        return Err("empty path".into());
    }
    Ok(safe)
}

/// Name used when a frame carries no `file_name`
pub fn fallback_name(attempt: u64) -> String {
    format!("blob_{attempt}.bin")
}
