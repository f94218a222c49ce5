//! Identifiers and descriptors for the ephemeral files a request owns.
//!
//! An [`Artifact`] is a reservation: its path is derived from its area and id,
//! and the file behind it exists only between the first write and release.

pub mod area;

use crate::defaults;
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub use area::{AreaManager, Areas, Released};

/// Globally unique artifact identifier (128-bit random).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArtifactId(Uuid);

impl ArtifactId {
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.as_hyphenated())
    }
}

/// Identifier of one inbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.as_hyphenated())
    }
}

/// Generates collision-free artifact identifiers.
///
/// Stateless: every id is a fresh v4 UUID from the OS-seeded thread RNG, so
/// any number of threads can call [`ArtifactNamer::new_id`] without
/// coordination.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArtifactNamer;

impl ArtifactNamer {
    pub fn new() -> Self {
        Self
    }

    pub fn new_id(&self) -> ArtifactId {
        ArtifactId(Uuid::new_v4())
    }
}

/// The two shared directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Area {
    /// Downloaded image bytes awaiting description.
    Staging,
    /// Synthesized audio awaiting delivery.
    Output,
}

impl Area {
    pub fn extension(self) -> &'static str {
        match self {
            Area::Staging => defaults::STAGING_EXTENSION,
            Area::Output => defaults::OUTPUT_EXTENSION,
        }
    }

    /// File name of an artifact in this area. Pure function of `(area, id)`.
    pub fn file_name(self, id: &ArtifactId) -> String {
        format!("{}.{}", id, self.extension())
    }
}

impl fmt::Display for Area {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Area::Staging => write!(f, "staging"),
            Area::Output => write!(f, "output"),
        }
    }
}

/// A reserved location owned by exactly one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    id: ArtifactId,
    area: Area,
    path: PathBuf,
    owner: RequestId,
}

impl Artifact {
    pub(crate) fn new(id: ArtifactId, area: Area, root: &Path, owner: RequestId) -> Self {
        Self {
            id,
            area,
            path: root.join(area.file_name(&id)),
            owner,
        }
    }

    pub fn id(&self) -> ArtifactId {
        self.id
    }

    pub fn area(&self) -> Area {
        self.area
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn owner(&self) -> RequestId {
        self.owner
    }

    /// Scratch path used while writing, renamed over `path` once complete.
    pub(crate) fn partial_path(&self) -> PathBuf {
        self.path.with_extension(format!("{}.part", self.area.extension()))
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.area, self.id)
    }
}
