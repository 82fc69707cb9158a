//! ArtifactStore — versioned config archives on local disk.
//!
//! Archives live flat in one directory as `<version>.tar.gz`. A stored
//! archive is never rewritten; builds go through a temp file in the same
//! directory and are published with a no-clobber rename, so a reader sees
//! either nothing or the complete archive.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use confgrid_core::{ConfigVersion, ProjectSet};

use crate::error::{ArtifactError, ArtifactResult};
use crate::package::pack_dir;
use crate::render::Renderer;

/// Content type served for archives.
pub const ARTIFACT_CONTENT_TYPE: &str = "application/gzip";

const ARCHIVE_SUFFIX: &str = ".tar.gz";

/// Summary of a freshly built archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactInfo {
    pub version: ConfigVersion,
    pub file_name: String,
    pub size_bytes: u64,
    pub sha256: String,
    /// Number of rendered config files inside.
    pub files: usize,
}

/// A stored archive read back for download.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub version: ConfigVersion,
    pub file_name: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

impl Artifact {
    pub fn size_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Thread-safe handle to the artifact directory.
#[derive(Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
    renderer: Arc<dyn Renderer>,
    /// Keep this many newest archives; 0 keeps everything.
    retention: usize,
}

impl std::fmt::Debug for ArtifactStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactStore")
            .field("dir", &self.dir)
            .field("retention", &self.retention)
            .finish()
    }
}

impl ArtifactStore {
    /// Open (or create) the artifact directory.
    pub fn open(dir: &Path, renderer: Arc<dyn Renderer>) -> ArtifactResult<Self> {
        fs::create_dir_all(dir)?;
        debug!(dir = %dir.display(), "artifact store opened");
        Ok(Self {
            dir: dir.to_path_buf(),
            renderer,
            retention: 20,
        })
    }

    /// Set how many archives to keep after each build.
    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_name(version: ConfigVersion) -> String {
        format!("{version}{ARCHIVE_SUFFIX}")
    }

    fn path_for(&self, version: ConfigVersion) -> PathBuf {
        self.dir.join(Self::file_name(version))
    }

    /// Render `projects`, pack them and publish the archive for `version`.
    ///
    /// Blocking; async callers should run it on the blocking pool.
    pub fn build(
        &self,
        version: ConfigVersion,
        projects: &ProjectSet,
    ) -> ArtifactResult<ArtifactInfo> {
        let target = self.path_for(version);
        if target.exists() {
            return Err(ArtifactError::AlreadyExists(version));
        }

        let staging = tempfile::Builder::new()
            .prefix(".render-")
            .tempdir_in(&self.dir)?;
        self.renderer.render(projects, staging.path())?;
        let packed = pack_dir(staging.path())?;

        let mut tmp = tempfile::Builder::new()
            .prefix(".artifact-")
            .suffix(".tmp")
            .tempfile_in(&self.dir)?;
        tmp.write_all(&packed.bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist_noclobber(&target).map_err(|e| {
            if e.error.kind() == io::ErrorKind::AlreadyExists {
                ArtifactError::AlreadyExists(version)
            } else {
                ArtifactError::Io(e.error)
            }
        })?;

        let info = ArtifactInfo {
            version,
            file_name: Self::file_name(version),
            size_bytes: packed.bytes.len() as u64,
            sha256: packed.sha256,
            files: packed.files,
        };
        info!(
            version,
            size_bytes = info.size_bytes,
            files = info.files,
            sha256 = %info.sha256,
            "artifact published"
        );

        if let Err(e) = self.prune() {
            warn!(error = %e, "artifact pruning failed");
        }
        Ok(info)
    }

    /// Read the archive for `version`, or `None` if it was never built
    /// (or has been pruned).
    pub fn fetch(&self, version: ConfigVersion) -> ArtifactResult<Option<Artifact>> {
        match fs::read(self.path_for(version)) {
            Ok(bytes) => Ok(Some(Artifact {
                version,
                file_name: Self::file_name(version),
                content_type: ARTIFACT_CONTENT_TYPE,
                bytes,
            })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Versions currently stored, ascending.
    pub fn versions(&self) -> ArtifactResult<Vec<ConfigVersion>> {
        let mut versions = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(version) = parse_file_name(name) {
                versions.push(version);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    /// Delete all but the newest `retention` archives. Returns the
    /// versions removed.
    pub fn prune(&self) -> ArtifactResult<Vec<ConfigVersion>> {
        if self.retention == 0 {
            return Ok(Vec::new());
        }
        let versions = self.versions()?;
        let excess = versions.len().saturating_sub(self.retention);
        let mut removed = Vec::with_capacity(excess);
        for version in versions.into_iter().take(excess) {
            match fs::remove_file(self.path_for(version)) {
                Ok(()) => removed.push(version),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        if !removed.is_empty() {
            info!(count = removed.len(), retention = self.retention, "pruned old artifacts");
        }
        Ok(removed)
    }
}

fn parse_file_name(name: &str) -> Option<ConfigVersion> {
    let stem = name.strip_suffix(ARCHIVE_SUFFIX)?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}
