//! Deterministic `.tar.gz` packing.
//!
//! Entries are added in sorted path order with zeroed mtime, uid and gid
//! and fixed modes, and the gzip header carries no timestamp, so packing
//! the same directory twice yields identical bytes.

use std::fs;
use std::io;
use std::path::Path;

use flate2::Compression;
use flate2::write::GzEncoder;
use sha2::{Digest, Sha256};
use tar::{EntryType, Header};
use walkdir::WalkDir;

use crate::error::{ArtifactError, ArtifactResult};

/// Output of packing a directory.
#[derive(Debug, Clone)]
pub struct PackResult {
    pub bytes: Vec<u8>,
    pub sha256: String,
    /// Regular files in the archive.
    pub files: usize,
}

/// Pack everything below `src` into a gzip-compressed tarball.
///
/// Paths in the archive are relative to `src`.
pub fn pack_dir(src: &Path) -> ArtifactResult<PackResult> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    let mut files = 0;

    for entry in WalkDir::new(src).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| ArtifactError::Package(e.to_string()))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| ArtifactError::Package(e.to_string()))?;

        let mut header = Header::new_gnu();
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);

        let file_type = entry.file_type();
        if file_type.is_dir() {
            header.set_entry_type(EntryType::Directory);
            header.set_mode(0o755);
            header.set_size(0);
            builder.append_data(&mut header, rel, io::empty())?;
        } else if file_type.is_file() {
            let data = fs::read(entry.path())?;
            header.set_entry_type(EntryType::Regular);
            header.set_mode(0o644);
            header.set_size(data.len() as u64);
            builder.append_data(&mut header, rel, data.as_slice())?;
            files += 1;
        } else {
            return Err(ArtifactError::Package(format!(
                "unsupported file type at {}",
                entry.path().display()
            )));
        }
    }

    let bytes = builder.into_inner()?.finish()?;
    Ok(PackResult {
        sha256: sha256_hex(&bytes),
        bytes,
        files,
    })
}

/// Lowercase hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;

    fn fill(dir: &Path) {
        fs::write(dir.join("b.conf"), "server { }\n").unwrap();
        fs::write(dir.join("a.conf"), "server { listen 80; }\n").unwrap();
        fs::create_dir(dir.join("nested")).unwrap();
        fs::write(dir.join("nested/c.conf"), "# c\n").unwrap();
    }

    #[test]
    fn same_tree_packs_to_same_bytes() {
        let one = tempfile::tempdir().unwrap();
        let two = tempfile::tempdir().unwrap();
        fill(one.path());
        fill(two.path());

        let a = pack_dir(one.path()).unwrap();
        let b = pack_dir(two.path()).unwrap();
        assert_eq!(a.bytes, b.bytes);
        assert_eq!(a.sha256, b.sha256);
        assert_eq!(a.files, 3);
    }

    #[test]
    fn archive_lists_relative_sorted_paths() {
        let dir = tempfile::tempdir().unwrap();
        fill(dir.path());
        let packed = pack_dir(dir.path()).unwrap();

        let mut archive = tar::Archive::new(GzDecoder::new(packed.bytes.as_slice()));
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().trim_end_matches('/').to_string())
            .collect();
        assert_eq!(names, vec!["a.conf", "b.conf", "nested", "nested/c.conf"]);
    }

    #[test]
    fn empty_directory_is_a_valid_archive() {
        let dir = tempfile::tempdir().unwrap();
        let packed = pack_dir(dir.path()).unwrap();
        assert_eq!(packed.files, 0);

        let mut archive = tar::Archive::new(GzDecoder::new(packed.bytes.as_slice()));
        assert_eq!(archive.entries().unwrap().count(), 0);
    }

    #[test]
    fn sha256_is_lowercase_hex() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
