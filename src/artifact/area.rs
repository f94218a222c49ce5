//! Shared artifact directories.
//!
//! Each area tracks its live artifacts in a concurrent map keyed by id, so
//! release and live-set queries never enumerate a directory that other
//! requests are writing into. All operations touch exactly one artifact.

use crate::artifact::{Area, Artifact, ArtifactId, ArtifactNamer, RequestId};
use crate::config::StorageConfig;
use crate::error::{PicvoiceError, Result};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// What `release` found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Released {
    /// The artifact was live or its file existed, and is now gone.
    Removed,
    /// Nothing left to delete.
    AlreadyGone,
}

/// Manager of one shared directory.
///
/// Blocking: every method performs synchronous file I/O. Async callers go
/// through `tokio::task::spawn_blocking`.
#[derive(Debug)]
pub struct AreaManager {
    area: Area,
    root: PathBuf,
    namer: ArtifactNamer,
    live: DashMap<ArtifactId, RequestId>,
    /// Slots taken against `max_live`; claimed before the live entry exists.
    reserved: AtomicUsize,
    max_live: usize,
    allocated_total: AtomicU64,
}

impl AreaManager {
    /// Open an area rooted at `root`, creating the directory.
    ///
    /// With `wipe` set, files left over from a previous process are removed.
    /// This is the only place whole-directory deletion happens and it runs
    /// before any request can hold an artifact.
    pub fn open(area: Area, root: impl Into<PathBuf>, max_live: usize, wipe: bool) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| PicvoiceError::from_io(&root, e))?;

        if wipe {
            let removed = wipe_files(&root)?;
            if removed > 0 {
                tracing::info!("Cold start: removed {} stale file(s) from {}", removed, root.display());
            }
        }

        Ok(Self {
            area,
            root,
            namer: ArtifactNamer::new(),
            live: DashMap::new(),
            reserved: AtomicUsize::new(0),
            max_live,
            allocated_total: AtomicU64::new(0),
        })
    }

    pub fn area(&self) -> Area {
        self.area
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reserve a fresh artifact for `owner`. The file is not created yet.
    ///
    /// Performs no file I/O, so async callers may call it inline.
    pub fn allocate(&self, owner: RequestId) -> Result<Artifact> {
        self.reserved
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |held| {
                (held < self.max_live).then_some(held + 1)
            })
            .map_err(|held| PicvoiceError::ResourceExhausted {
                message: format!(
                    "{} area holds {} live artifacts (limit {})",
                    self.area, held, self.max_live
                ),
            })?;

        loop {
            let id = self.namer.new_id();
            if let Entry::Vacant(slot) = self.live.entry(id) {
                slot.insert(owner);
                self.allocated_total.fetch_add(1, Ordering::Relaxed);
                return Ok(Artifact::new(id, self.area, &self.root, owner));
            }
        }
    }

    /// Create or overwrite the artifact's file.
    ///
    /// Bytes go to a scratch file first and are renamed into place, so a
    /// reader never observes a half-written artifact. A release that lands
    /// while the bytes are in flight wins: the file is removed again and the
    /// write reports `NotFound`.
    pub fn write(&self, artifact: &Artifact, bytes: &[u8]) -> Result<()> {
        self.ensure_live(artifact)?;

        let partial = artifact.partial_path();
        fs::write(&partial, bytes).map_err(|e| {
            discard(&partial);
            PicvoiceError::from_io(&partial, e)
        })?;
        fs::rename(&partial, artifact.path()).map_err(|e| {
            discard(&partial);
            PicvoiceError::from_io(artifact.path(), e)
        })?;

        // release drops the live entry before touching files
        if !self.contains(&artifact.id()) {
            remove_if_present(artifact.path())?;
            return Err(PicvoiceError::NotFound {
                artifact: artifact.to_string(),
            });
        }
        Ok(())
    }

    /// Read the artifact's bytes.
    pub fn read(&self, artifact: &Artifact) -> Result<Vec<u8>> {
        self.ensure_live(artifact)?;

        fs::read(artifact.path()).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                PicvoiceError::NotFound {
                    artifact: artifact.to_string(),
                }
            } else {
                PicvoiceError::from_io(artifact.path(), e)
            }
        })
    }

    /// Delete exactly this artifact. Idempotent.
    ///
    /// The live entry goes first, so a concurrent `write` either fails its
    /// liveness check or sees the entry gone after its rename.
    pub fn release(&self, artifact: &Artifact) -> Result<Released> {
        self.ensure_area(artifact)?;

        let was_live = match self.live.entry(artifact.id()) {
            Entry::Occupied(entry) if *entry.get() != artifact.owner() => {
                return Err(PicvoiceError::OwnershipViolation {
                    artifact: artifact.to_string(),
                    owner: entry.get().to_string(),
                    requested_by: artifact.owner().to_string(),
                });
            }
            Entry::Occupied(entry) => {
                entry.remove();
                true
            }
            Entry::Vacant(_) => false,
        };
        if was_live {
            self.reserved.fetch_sub(1, Ordering::AcqRel);
        }

        let removed_file = remove_if_present(artifact.path())?;
        remove_if_present(&artifact.partial_path())?;

        if removed_file || was_live {
            Ok(Released::Removed)
        } else {
            Ok(Released::AlreadyGone)
        }
    }

    /// True while the artifact sits between allocation and release.
    pub fn contains(&self, id: &ArtifactId) -> bool {
        self.live.contains_key(id)
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Number of allocations since the area was opened.
    pub fn allocated_total(&self) -> u64 {
        self.allocated_total.load(Ordering::Relaxed)
    }

    fn ensure_area(&self, artifact: &Artifact) -> Result<()> {
        if artifact.area() != self.area {
            return Err(PicvoiceError::WrongArea {
                artifact: artifact.to_string(),
                area: self.area.to_string(),
            });
        }
        Ok(())
    }

    fn ensure_live(&self, artifact: &Artifact) -> Result<()> {
        self.ensure_area(artifact)?;
        match self.live.get(&artifact.id()) {
            Some(owner) if *owner == artifact.owner() => Ok(()),
            Some(owner) => Err(PicvoiceError::OwnershipViolation {
                artifact: artifact.to_string(),
                owner: owner.to_string(),
                requested_by: artifact.owner().to_string(),
            }),
            None => Err(PicvoiceError::NotFound {
                artifact: artifact.to_string(),
            }),
        }
    }
}

/// The staging and output areas, opened together at startup.
#[derive(Debug, Clone)]
pub struct Areas {
    pub staging: Arc<AreaManager>,
    pub output: Arc<AreaManager>,
}

impl Areas {
    pub fn open(config: &StorageConfig) -> Result<Self> {
        Ok(Self {
            staging: Arc::new(AreaManager::open(
                Area::Staging,
                &config.staging_dir,
                config.max_live_artifacts,
                config.wipe_on_start,
            )?),
            output: Arc::new(AreaManager::open(
                Area::Output,
                &config.output_dir,
                config.max_live_artifacts,
                config.wipe_on_start,
            )?),
        })
    }

    pub fn get(&self, area: Area) -> &Arc<AreaManager> {
        match area {
            Area::Staging => &self.staging,
            Area::Output => &self.output,
        }
    }
}

fn remove_if_present(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(PicvoiceError::from_io(path, e)),
    }
}

fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path)
        && e.kind() != ErrorKind::NotFound
    {
        tracing::debug!("Could not remove {}: {}", path.display(), e);
    }
}

/// Remove regular files directly under `root`. Subdirectories are left alone.
fn wipe_files(root: &Path) -> Result<usize> {
    let mut removed = 0;
    let entries = fs::read_dir(root).map_err(|e| PicvoiceError::from_io(root, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| PicvoiceError::from_io(root, e))?;
        let path = entry.path();
        let is_file = entry
            .file_type()
            .map(|t| t.is_file())
            .map_err(|e| PicvoiceError::from_io(&path, e))?;
        if is_file && remove_if_present(&path)? {
            removed += 1;
        }
    }
    Ok(removed)
}
