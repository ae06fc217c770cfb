use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChecksumError {
    #[error("can't open {path} for checksum")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("can't read {path} for checksum")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn open(path: &Path) -> Result<File, ChecksumError> {
    File::open(path).map_err(|source| ChecksumError::Open {
        path: path.to_path_buf(),
        source,
    })
}

fn digest(mut file: File, path: &Path) -> Result<[u8; 32], ChecksumError> {
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(|source| ChecksumError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    Ok(out)
}

/// SHA-256 of the file at `path`, streamed.
pub fn file_digest(path: &Path) -> Result<[u8; 32], ChecksumError> {
    digest(open(path)?, path)
}

/// Whether both files hold the same bytes. Both are opened before either is
/// hashed, so a missing second file is reported without reading the first.
pub fn equal_content(left: &Path, right: &Path) -> Result<bool, ChecksumError> {
    let left_file = open(left)?;
    let right_file = open(right)?;
    Ok(digest(left_file, left)? == digest(right_file, right)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn identical_files_match() {
        let dir = tempfile::tempdir().expect("tempdir");
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::write(&a, b"same bytes").expect("write");
        fs::write(&b, b"same bytes").expect("write");
        assert!(equal_content(&a, &b).expect("compare"));
    }

    #[test]
    fn one_byte_difference_is_detected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::write(&a, b"same bytes").expect("write");
        fs::write(&b, b"same bytez").expect("write");
        assert!(!equal_content(&a, &b).expect("compare"));
    }

    #[test]
    fn missing_file_is_an_error_not_a_mismatch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let a = dir.path().join("a");
        fs::write(&a, b"bytes").expect("write");
        let err = equal_content(&a, &dir.path().join("missing")).expect_err("must fail");
        assert!(matches!(err, ChecksumError::Open { .. }));
    }

    #[test]
    fn digest_matches_known_vector() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("abc");
        fs::write(&path, b"abc").expect("write");
        let digest = file_digest(&path).expect("digest");
        assert_eq!(digest[..4], [0xba, 0x78, 0x16, 0xbf]);
    }
}
